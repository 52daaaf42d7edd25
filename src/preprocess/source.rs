//! Line records linking preprocessed output back to original sources.

use std::path::{Path, PathBuf};
use std::rc::Rc;

/// What one original line produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineRecord {
    /// Output lines attributed to this line.
    pub emitted: usize,
    /// The file an `INCLUDE` on this line expanded to.
    pub include: Option<Box<SourceFile>>,
}

/// One preprocessed file and the record of each of its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub lines: Vec<LineRecord>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: Vec::new(),
        }
    }

    /// Output lines this file produced, includes counted.
    pub fn emitted(&self) -> usize {
        self.lines.iter().map(|l| l.emitted).sum()
    }

    /// Original location of every output line, in output order.
    pub fn origins(&self) -> Vec<Origin> {
        let mut out = Vec::with_capacity(self.emitted());
        self.collect_origins(&mut out);
        out
    }

    fn collect_origins(&self, out: &mut Vec<Origin>) {
        let file: Rc<Path> = Rc::from(self.path.as_path());
        for (index, record) in self.lines.iter().enumerate() {
            match &record.include {
                Some(child) => child.collect_origins(out),
                None => out.extend((0..record.emitted).map(|_| Origin {
                    file: file.clone(),
                    line: index + 1,
                })),
            }
        }
    }
}

/// Original file and 1-based line of an output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub file: Rc<Path>,
    pub line: usize,
}

/// Preprocessor output for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preprocessed {
    pub text: String,
    pub source: SourceFile,
}

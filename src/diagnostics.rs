//! Diagnostic context for the build pipeline.
//!
//! Every error and warning names the phase the pipeline was in, the file
//! being processed and the line inside it. That state lives in a
//! [`Diagnostics`] value owned by the unit being processed and passed down
//! explicitly, so processing several units never mixes up their locations.
//!
//! # Example
//!
//! ```rust
//! use pspl::diagnostics::{Diagnostics, Phase, WarningKind};
//!
//! let mut diag = Diagnostics::new();
//! diag.set_phase(Phase::Preprocess);
//! diag.set_file("shaders/main.pspl");
//! diag.set_line(3);
//! diag.warn(WarningKind::UnrecognizedDirective { name: "FOOBAR".to_string() });
//!
//! assert_eq!(diag.warnings().len(), 1);
//! assert_eq!(diag.here().to_string(), "[preprocess] shaders/main.pspl:3");
//! ```

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Pipeline phase, reported with every diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Registry setup and extension `init` hooks.
    #[default]
    Init,
    /// Directive expansion.
    Preprocess,
    /// Heading/command parsing.
    Compile,
    /// Merging units and writing containers.
    Package,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Preprocess => "preprocess",
            Phase::Compile => "compile",
            Phase::Package => "package",
        };
        f.write_str(name)
    }
}

/// A snapshot of where the pipeline was when something was reported.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Where {
    /// Phase at the time of the report.
    pub phase: Phase,
    /// File being processed, if any.
    pub file: Option<PathBuf>,
    /// 1-based line in `file`, if known.
    pub line: Option<usize>,
}

impl Where {
    /// A location that only knows the phase.
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase,
            file: None,
            line: None,
        }
    }

    /// Location of a whole file.
    pub fn file(phase: Phase, file: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            file: Some(file.into()),
            line: None,
        }
    }

    /// Whether neither a file nor a line is known.
    pub fn is_unknown(&self) -> bool {
        self.file.is_none() && self.line.is_none()
    }

    /// `file:line` (or just the file) for naming definers in messages.
    pub fn short(&self) -> String {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{}:{}", file.display(), line),
            (Some(file), None) => file.display().to_string(),
            (None, Some(line)) => format!("line {line}"),
            (None, None) => "<unknown>".to_string(),
        }
    }
}

impl fmt::Display for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.phase)?;
        if !self.is_unknown() {
            write!(f, " {}", self.short())?;
        }
        Ok(())
    }
}

/// Non-fatal conditions. Everything else is an [`crate::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    /// A `[DIRECTIVE ...]` nobody claims; the line is dropped.
    UnrecognizedDirective { name: String },
    /// Several extensions weakly claim a name; the last registered one wins.
    WeakClaimOverride {
        namespace: String,
        name: String,
        winner: String,
        overridden: String,
    },
    /// A staged object is older than its source file and is used anyway.
    StaleStagedObject { source: PathBuf, staged: String },
    /// Free-text message raised by an extension hook.
    Extension { extension: String, message: String },
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::UnrecognizedDirective { name } => {
                write!(f, "unrecognized preprocessor directive '{name}'; line dropped")
            }
            WarningKind::WeakClaimOverride {
                namespace,
                name,
                winner,
                overridden,
            } => write!(
                f,
                "{namespace} '{name}' is weakly claimed by both '{overridden}' and '{winner}'; using '{winner}'"
            ),
            WarningKind::StaleStagedObject { source, staged } => write!(
                f,
                "'{}' is newer than its staged object {staged}; using the stale object (clean the staging area to rebuild)",
                source.display()
            ),
            WarningKind::Extension { extension, message } => write!(f, "{extension}: {message}"),
        }
    }
}

/// A reported warning with its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// Where the warning was raised.
    pub at: Where,
    /// What happened.
    pub kind: WarningKind,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.at, self.kind)
    }
}

/// Per-unit diagnostic state: current phase, file and line plus the
/// warnings collected so far.
#[derive(Debug, Default)]
pub struct Diagnostics {
    phase: Phase,
    file: Option<PathBuf>,
    line: Option<usize>,
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Create an empty context in the `init` phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context for the given file.
    pub fn for_file(phase: Phase, file: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            file: Some(file.into()),
            ..Default::default()
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Switch to a new file; the line is reset.
    pub fn set_file(&mut self, file: impl Into<PathBuf>) {
        self.file = Some(file.into());
        self.line = None;
    }

    pub fn set_line(&mut self, line: usize) {
        self.line = Some(line);
    }

    pub fn clear_line(&mut self) {
        self.line = None;
    }

    /// Replace file and line together and return the previous pair, so a
    /// caller descending into an include can restore it afterwards.
    pub fn swap_position(
        &mut self,
        file: Option<PathBuf>,
        line: Option<usize>,
    ) -> (Option<PathBuf>, Option<usize>) {
        let previous = (self.file.take(), self.line.take());
        self.file = file;
        self.line = line;
        previous
    }

    /// Snapshot of the current location.
    pub fn here(&self) -> Where {
        Where {
            phase: self.phase,
            file: self.file.clone(),
            line: self.line,
        }
    }

    /// Record a warning at the current location and log it.
    pub fn warn(&mut self, kind: WarningKind) {
        let warning = Warning { at: self.here(), kind };
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Record an already located warning and log it.
    pub fn push_warning(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Take all warnings, leaving the context empty.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_display() {
        let at = Where {
            phase: Phase::Compile,
            file: Some(PathBuf::from("a.pspl")),
            line: Some(12),
        };
        assert_eq!(at.to_string(), "[compile] a.pspl:12");
        assert_eq!(Where::phase(Phase::Package).to_string(), "[package]");
    }

    #[test]
    fn test_swap_position_restores() {
        let mut diag = Diagnostics::for_file(Phase::Preprocess, "parent.pspl");
        diag.set_line(4);

        let saved = diag.swap_position(Some(PathBuf::from("child.pspl")), None);
        diag.set_line(1);
        assert_eq!(diag.here().short(), "child.pspl:1");

        diag.swap_position(saved.0, saved.1);
        assert_eq!(diag.here().short(), "parent.pspl:4");
    }

    #[test]
    fn test_warnings_are_collected() {
        let mut diag = Diagnostics::new();
        diag.warn(WarningKind::UnrecognizedDirective {
            name: "FOOBAR".to_string(),
        });
        assert!(diag.has_warnings());
        let taken = diag.take_warnings();
        assert_eq!(taken.len(), 1);
        assert!(taken[0].to_string().contains("FOOBAR"));
        assert!(!diag.has_warnings());
    }
}

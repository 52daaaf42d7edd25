//! Directive expansion.
//!
//! A line whose first non-blank character is `[` opens a directive; it runs
//! to the matching `]`, possibly across lines. `INCLUDE path` splices another
//! file in place. Any other directive goes to the extension claiming its
//! name, which may emit lines of its own. Everything else is copied with
//! comments removed.
//!
//! ```text
//! main.pspl                   output
//! 1  # Embed                  # Embed
//! 2  [INCLUDE shared.pspl] ─▶ TEXT(a, 1)      ◀─ shared.pspl:1
//! 3  TEXT(b, 2)               TEXT(b, 2)
//! ```
//!
//! Each file keeps one [`LineRecord`] per original line, so compile errors
//! can be reported against the file and line that produced them.
//!
//! - [`scanner`] - comments, quotes and directive tokens
//! - [`source`] - line records and origin mapping

pub(crate) mod scanner;
pub mod source;

use std::fs;
use std::path::{Path, PathBuf};

use crate::buffer::Buffer;
use crate::compiler::parse::LevelTracker;
use crate::diagnostics::{Phase, WarningKind};
use crate::error::{Error, Result};
use crate::extension::{DirectiveOutput, ExtensionRegistry};
use crate::unit::Unit;
use scanner::{Directive, ScanError, Scanned, Scanner};

pub use source::{LineRecord, Origin, Preprocessed, SourceFile};

/// Name of the built-in include directive.
pub const INCLUDE: &str = "INCLUDE";

/// Preprocess the unit's source file.
pub fn preprocess(registry: &mut ExtensionRegistry, unit: &mut Unit) -> Result<Preprocessed> {
    unit.diag.set_phase(Phase::Preprocess);
    let path = unit.path().to_path_buf();
    let tab_width = unit.config().tab_width;
    let mut preprocessor = Preprocessor {
        registry,
        unit,
        tab_width,
        stack: Vec::new(),
        output: Buffer::new(),
        levels: LevelTracker::default(),
    };
    let source = preprocessor.process_file(&path)?;
    let text = preprocessor.output.to_string_lossy();
    log::debug!(
        "preprocessed {} into {} line(s)",
        path.display(),
        source.emitted()
    );
    Ok(Preprocessed { text, source })
}

struct Preprocessor<'a> {
    registry: &'a mut ExtensionRegistry,
    unit: &'a mut Unit,
    tab_width: usize,
    /// Canonical paths of the files being expanded, outermost first.
    stack: Vec<PathBuf>,
    output: Buffer,
    /// Heading level of the output so far, for directive hooks.
    levels: LevelTracker,
}

impl Preprocessor<'_> {
    fn process_file(&mut self, path: &Path) -> Result<SourceFile> {
        let here = self.unit.diag.here();
        let canonical = path
            .canonicalize()
            .map_err(|e| Error::io(here.clone(), "failed to open", path, e))?;
        if self.stack.contains(&canonical) {
            let chain: Vec<String> = self
                .stack
                .iter()
                .chain(std::iter::once(&canonical))
                .map(|p| p.display().to_string())
                .collect();
            return Err(Error::syntax(here, format!("include cycle: {}", chain.join(" -> "))));
        }
        let bytes = fs::read(path).map_err(|e| Error::io(here, "failed to read", path, e))?;
        let text = String::from_utf8_lossy(&bytes);

        self.stack.push(canonical);
        let saved = self.unit.diag.swap_position(Some(path.to_path_buf()), None);
        let result = self.process_text(path, &text);
        self.unit.diag.swap_position(saved.0, saved.1);
        self.stack.pop();
        result
    }

    fn process_text(&mut self, path: &Path, text: &str) -> Result<SourceFile> {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut source = SourceFile::new(path);
        let mut scanner = Scanner::new(self.tab_width);

        for (index, line) in text.lines().enumerate() {
            let number = index + 1;
            self.unit.diag.set_line(number);
            let scanned = scanner.scan_line(line, number).map_err(|e| self.scan_error(e))?;
            match scanned {
                Scanned::Text(stripped) => {
                    self.emit(&stripped)?;
                    source.lines.push(LineRecord {
                        emitted: 1,
                        include: None,
                    });
                }
                Scanned::Continued => source.lines.push(LineRecord::default()),
                Scanned::Directive(directive) => {
                    source.lines.push(LineRecord::default());
                    // output is attributed to the line the directive started on
                    self.unit.diag.set_line(directive.start_line);
                    let record = self.expand(&dir, &directive)?;
                    source.lines[directive.start_line - 1] = record;
                }
            }
        }
        scanner.finish().map_err(|e| self.scan_error(e))?;
        Ok(source)
    }

    fn expand(&mut self, dir: &Path, directive: &Directive) -> Result<LineRecord> {
        let name = directive.tokens[0].as_str();
        let args = &directive.tokens[1..];

        if name == INCLUDE {
            let [target] = args else {
                return Err(Error::syntax(
                    self.unit.diag.here(),
                    format!("{INCLUDE} expects exactly one path, got {}", args.len()),
                ));
            };
            let child = self.process_file(&dir.join(target))?;
            return Ok(LineRecord {
                emitted: child.emitted(),
                include: Some(Box::new(child)),
            });
        }

        let Some(owner) = self.registry.directive_owner(name) else {
            self.unit.diag.warn(WarningKind::UnrecognizedDirective { name: name.to_string() });
            return Ok(LineRecord::default());
        };
        self.unit.require(self.registry.name(owner));
        let mut out = DirectiveOutput::new();
        self.unit.heading_level = self.levels.level();
        self.registry
            .invoke(owner, self.unit, |ext, ctx| ext.directive(ctx, &mut out, name, args))?;
        let indent = "\t".repeat(directive.indent);
        for line in out.lines() {
            self.emit(&format!("{indent}{line}"))?;
        }
        Ok(LineRecord {
            emitted: out.len(),
            include: None,
        })
    }

    fn emit(&mut self, line: &str) -> Result<()> {
        self.levels.observe(line);
        self.output
            .append_str(line)
            .and_then(|_| self.output.append_char('\n'))
            .map_err(|e| e.located(self.unit.diag.here()))
    }

    fn scan_error(&self, error: ScanError) -> Error {
        let mut at = self.unit.diag.here();
        at.line = Some(error.line);
        Error::syntax(at, error.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::extension::embed::Embed;
    use std::fs;

    fn registry() -> ExtensionRegistry {
        ExtensionRegistry::builder().register(Embed::new()).build().unwrap()
    }

    fn run(dir: &Path, main: &str) -> (Result<Preprocessed>, Unit) {
        let mut registry = registry();
        let config = BuildConfig::builder().staging_dir(dir.join("stage")).build();
        let mut unit = Unit::for_source(dir.join(main), &config);
        registry.begin_unit(&mut unit).unwrap();
        let result = preprocess(&mut registry, &mut unit);
        (result, unit)
    }

    #[test]
    fn test_include_expands_in_place_with_origins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shared.pspl"), "TEXT(a, 1) // shared\n").unwrap();
        fs::write(
            dir.path().join("main.pspl"),
            "# Embed\n[INCLUDE shared.pspl]\nTEXT(b, 2)\n",
        )
        .unwrap();

        let (result, unit) = run(dir.path(), "main.pspl");
        let pre = result.unwrap();
        assert_eq!(pre.text, "# Embed\nTEXT(a, 1)\nTEXT(b, 2)\n");
        let origins = pre.source.origins();
        assert!(origins[1].file.ends_with("shared.pspl"));
        assert_eq!(origins[1].line, 1);
        assert_eq!(origins[2].line, 3);
        assert!(!unit.diag.has_warnings());
    }

    #[test]
    fn test_include_of_unrecognized_directive_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("junk.pspl"), "[FOOBAR 1 2]\n").unwrap();
        fs::write(dir.path().join("main.pspl"), "[INCLUDE junk.pspl]\n").unwrap();

        let (result, unit) = run(dir.path(), "main.pspl");
        let pre = result.unwrap();
        assert_eq!(pre.text, "");
        assert_eq!(pre.source.emitted(), 0);
        assert_eq!(unit.diag.warnings().len(), 1);
        assert!(matches!(
            &unit.diag.warnings()[0].kind,
            WarningKind::UnrecognizedDirective { name } if name == "FOOBAR"
        ));
        assert!(unit.diag.warnings()[0].at.file.as_ref().unwrap().ends_with("junk.pspl"));
    }

    #[test]
    fn test_claimed_directive_output_is_indented() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.pspl"), "\t[EMBED_TEXT motd\n  \"hi there\"]\nnext\n").unwrap();

        let (result, _unit) = run(dir.path(), "main.pspl");
        let pre = result.unwrap();
        assert_eq!(
            pre.text,
            "\t# Embed\n\tTEXT(motd, \"hi there\")\n\t#^\nnext\n"
        );
        let lines: Vec<usize> = pre.source.lines.iter().map(|l| l.emitted).collect();
        assert_eq!(lines, vec![3, 0, 1]);
    }

    #[test]
    fn test_directive_heading_nests_under_open_heading() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("part.pspl"), "## Inner\n").unwrap();
        fs::write(
            dir.path().join("main.pspl"),
            "[EMBED_TEXT a 1]\n# Embed\n[EMBED_TEXT b 2]\n[INCLUDE part.pspl]\n[EMBED_TEXT c\n3]\n",
        )
        .unwrap();

        let (result, unit) = run(dir.path(), "main.pspl");
        assert!(unit.requires("Embed"));
        let pre = result.unwrap();
        assert_eq!(
            pre.text,
            "# Embed\nTEXT(a, 1)\n#^\n# Embed\n## Embed\nTEXT(b, 2)\n##^\n## Inner\n### Embed\nTEXT(c, 3)\n###^\n"
        );
    }

    #[test]
    fn test_multiline_hook_output_keeps_line_records_aligned() {
        struct Lines;
        impl crate::extension::Extension for Lines {
            fn descriptor(&self) -> crate::extension::ExtensionDescriptor {
                crate::extension::ExtensionDescriptor::new("Lines").directive("TWO")
            }
            fn directive(
                &mut self,
                _ctx: &mut crate::extension::HookContext<'_>,
                out: &mut DirectiveOutput,
                _name: &str,
                _args: &[String],
            ) -> Result<()> {
                out.line("one\ntwo");
                Ok(())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.pspl"), "[TWO]\nafter\n").unwrap();
        let mut registry = ExtensionRegistry::builder().register(Lines).build().unwrap();
        let config = BuildConfig::builder().staging_dir(dir.path().join("stage")).build();
        let mut unit = Unit::for_source(dir.path().join("main.pspl"), &config);
        registry.begin_unit(&mut unit).unwrap();

        let pre = preprocess(&mut registry, &mut unit).unwrap();
        assert_eq!(pre.text, "one\ntwo\nafter\n");
        let origins = pre.source.origins();
        assert_eq!(origins.len(), 3);
        assert_eq!(origins[2].line, 2);
    }

    #[test]
    fn test_include_cycle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pspl"), "[INCLUDE b.pspl]\n").unwrap();
        fs::write(dir.path().join("b.pspl"), "[INCLUDE a.pspl]\n").unwrap();

        let (result, _unit) = run(dir.path(), "a.pspl");
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Source { .. }));
        assert!(err.to_string().contains("include cycle"));
    }

    #[test]
    fn test_unterminated_directive_reports_start_line() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.pspl"), "ok\n[EMBED_TEXT a\nb\n").unwrap();

        let (result, _unit) = run(dir.path(), "main.pspl");
        let err = result.unwrap_err();
        assert_eq!(err.location().line, Some(2));
        assert_eq!(err.location().phase, Phase::Preprocess);
    }
}

//! What a hook can see and do.

use std::any::Any;
use std::borrow::Cow;
use std::path::Path;

use super::{ExtensionId, ExtensionRegistry};
use crate::diagnostics::{WarningKind, Where};
use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::indexer::{FileConverter, ObjectData, Platforms, StagedObject};
use crate::unit::Unit;

/// Handed to every hook. Borrows the registry and the unit being processed
/// for the duration of one call.
pub struct HookContext<'a> {
    registry: &'a mut ExtensionRegistry,
    unit: &'a mut Unit,
    current: ExtensionId,
    in_init: bool,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(
        registry: &'a mut ExtensionRegistry,
        unit: &'a mut Unit,
        current: ExtensionId,
        in_init: bool,
    ) -> Self {
        Self {
            registry,
            unit,
            current,
            in_init,
        }
    }
}

impl HookContext<'_> {
    /// Name of the extension whose hook is running.
    pub fn extension_name(&self) -> &str {
        self.registry.name(self.current)
    }

    pub fn unit_name(&self) -> &str {
        self.unit.name()
    }

    /// Directory the unit's relative paths resolve against.
    pub fn unit_dir(&self) -> &Path {
        self.unit.dir()
    }

    /// Current phase, file and line.
    pub fn here(&self) -> Where {
        self.unit.diag.here()
    }

    /// Level of the heading open where a directive's output lands; 0 at
    /// the root. Outside the preprocessor this is the level reached at the
    /// end of preprocessing.
    pub fn heading_level(&self) -> usize {
        self.unit.heading_level
    }

    /// Value of a configured define; bare defines have an empty value.
    pub fn define(&self, name: &str) -> Option<&str> {
        self.unit.config().define(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.unit.config().is_defined(name)
    }

    /// Names of the registered platform extensions.
    pub fn platform_names(&self) -> Vec<String> {
        self.registry.platforms().map(|(_, d)| d.name.clone()).collect()
    }

    /// Raise a non-fatal warning at the current location.
    pub fn warn(&mut self, message: impl Into<String>) {
        let extension = self.extension_name().to_string();
        self.unit.diag.warn(WarningKind::Extension {
            extension,
            message: message.into(),
        });
    }

    /// Build the error a hook returns to fail the unit.
    pub fn fail(&self, code: i32, message: impl Into<String>) -> Error {
        Error::Extension {
            at: self.here(),
            extension: self.extension_name().to_string(),
            code,
            message: message.into(),
        }
    }

    /// Initialize another extension now. Only allowed from `init`; asking
    /// for an extension that is already initialized does nothing.
    pub fn require_extension(&mut self, name: &str) -> Result<()> {
        if !self.in_init {
            return Err(Error::config(
                self.here(),
                format!(
                    "'{}' requested early init of '{name}' outside of its own init hook",
                    self.extension_name()
                ),
            ));
        }
        let Some(id) = self.registry.find(name) else {
            return Err(Error::config(
                self.here(),
                format!("'{}' requires unknown extension '{name}'", self.extension_name()),
            ));
        };
        self.registry.ensure_initialized(id, self.unit)
    }

    /// Send `payload` to every platform extension's `instruction` hook.
    pub fn broadcast(&mut self, payload: &dyn Any) -> Result<()> {
        self.registry.broadcast(self.current, self.unit, payload)
    }

    /// Define an object keyed by a string. `swapped` is the byte-swapped
    /// copy of `native` for endian-sensitive data.
    pub fn add_hash_object(
        &mut self,
        platforms: &Platforms,
        key: &str,
        native: &[u8],
        swapped: Option<&[u8]>,
    ) -> Result<ObjectHash> {
        let data = self.object_data(platforms, native, swapped)?;
        let extension = self.extension_name().to_string();
        let at = self.here();
        self.unit.indexer.add_hash_object(&extension, platforms, key, data, at)
    }

    /// Define an object keyed by an integer.
    pub fn add_integer_object(
        &mut self,
        platforms: &Platforms,
        key: u32,
        native: &[u8],
        swapped: Option<&[u8]>,
    ) -> Result<()> {
        let data = self.object_data(platforms, native, swapped)?;
        let extension = self.extension_name().to_string();
        let at = self.here();
        self.unit.indexer.add_integer_object(&extension, platforms, key, data, at)
    }

    /// Reference a file, relative to the unit's directory. The file is
    /// staged once per unit; later references return the same object.
    pub fn add_file_stub(
        &mut self,
        platforms: &Platforms,
        path: &Path,
        converter: Option<&dyn FileConverter>,
        move_output: bool,
    ) -> Result<StagedObject> {
        self.check_platforms(platforms)?;
        let at = self.here();
        // lexical, so a path whose source was moved away still resolves
        let resolved = self.unit.resolve(path);

        let unit = &mut *self.unit;
        let staging = unit.staging.clone();
        let progress = unit.progress.clone();
        let mut stale = false;
        let staged = unit.indexer.add_file_stub(platforms, resolved.clone(), &at, |source| {
            let outcome = staging.stage(source, converter, move_output, progress.as_ref(), &at)?;
            stale = outcome.stale;
            Ok(outcome.object)
        })?;
        if stale {
            unit.diag.warn(WarningKind::StaleStagedObject {
                source: resolved,
                staged: staged.hash.to_hex(),
            });
        }
        Ok(staged)
    }

    fn object_data(&self, platforms: &Platforms, native: &[u8], swapped: Option<&[u8]>) -> Result<ObjectData> {
        self.check_platforms(platforms)?;
        if let Some(swapped) = swapped {
            if swapped.len() != native.len() {
                return Err(self.fail(
                    -1,
                    format!(
                        "swapped copy is {} bytes but native data is {} bytes",
                        swapped.len(),
                        native.len()
                    ),
                ));
            }
        }
        Ok(ObjectData::from_native(native, swapped))
    }

    fn check_platforms(&self, platforms: &Platforms) -> Result<()> {
        for name in platforms.names() {
            if self.registry.platform_demand(name).is_none() {
                return Err(Error::config(self.here(), format!("unknown platform '{name}'")));
            }
        }
        Ok(())
    }
}

/// Lines produced by a directive hook, in order. Indentation is relative to
/// the directive's own indent level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveOutput {
    lines: Vec<String>,
}

impl DirectiveOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text; each `\n` in it starts another line.
    pub fn line(&mut self, text: impl Into<String>) {
        self.indented_line(0, &text.into());
    }

    /// Lines `extra` indent levels deeper than the directive.
    pub fn indented_line(&mut self, extra: usize, text: &str) {
        let indent = "\t".repeat(extra);
        self.lines
            .extend(text.split('\n').map(|part| format!("{indent}{part}")));
    }

    /// Open a heading at `level`.
    pub fn heading(&mut self, level: usize, name: &str, args: &[&str]) {
        let mut line = format!("{} {}", "#".repeat(level.max(1)), name);
        if !args.is_empty() {
            let args: Vec<Cow<'_, str>> = args.iter().map(|a| quote_arg(a)).collect();
            line.push('(');
            line.push_str(&args.join(" "));
            line.push(')');
        }
        self.lines.push(line);
    }

    /// Return to the heading level above `level`.
    pub fn pop_heading(&mut self, level: usize) {
        self.lines.push(format!("{}^", "#".repeat(level.max(1))));
    }

    /// A command call line.
    pub fn command(&mut self, name: &str, args: &[&str]) {
        let args: Vec<Cow<'_, str>> = args.iter().map(|a| quote_arg(a)).collect();
        self.lines.push(format!("{}({})", name, args.join(", ")));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Quote an argument when it would not survive argument splitting as is.
pub(crate) fn quote_arg(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && !arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '(' | ')' | '"' | '\\'));
    if plain {
        return Cow::Borrowed(arg);
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::extension::embed::{EMBED, Embed};
    use std::fs;

    #[test]
    fn test_directive_output_lines() {
        let mut out = DirectiveOutput::new();
        out.heading(2, "Embed", &[]);
        out.command("TEXT", &["greeting", "hello, world"]);
        out.indented_line(1, "body");
        out.pop_heading(2);
        assert_eq!(
            out.lines(),
            ["## Embed", "TEXT(greeting, \"hello, world\")", "\tbody", "##^"]
        );
    }

    #[test]
    fn test_embedded_newlines_become_separate_lines() {
        let mut out = DirectiveOutput::new();
        out.line("first\nsecond");
        out.indented_line(1, "a\nb");
        assert_eq!(out.lines(), ["first", "second", "\ta", "\tb"]);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_moved_file_can_be_referenced_again() {
        let dir = tempfile::tempdir().unwrap();
        let generated = dir.path().join("gen.bin");
        fs::write(&generated, b"generated").unwrap();
        let config = BuildConfig::builder().staging_dir(dir.path().join("stage")).build();
        let mut registry = ExtensionRegistry::builder().register(Embed::new()).build().unwrap();
        let id = registry.find(EMBED).unwrap();

        let mut unit = Unit::for_source(dir.path().join("main.pspl"), &config);
        let (first, second) = registry
            .invoke(id, &mut unit, |_, ctx| {
                let first = ctx.add_file_stub(&Platforms::All, Path::new("gen.bin"), None, true)?;
                let second = ctx.add_file_stub(&Platforms::All, Path::new("./sub/../gen.bin"), None, true)?;
                Ok((first, second))
            })
            .unwrap();
        assert!(!generated.exists());
        assert_eq!(first, second);
        assert_eq!(unit.indexer.stubs().len(), 1);

        // a later unit finds the staged copy through the staging record
        let mut other = Unit::for_source(dir.path().join("other.pspl"), &config);
        let third = registry
            .invoke(id, &mut other, |_, ctx| {
                ctx.add_file_stub(&Platforms::All, Path::new("gen.bin"), None, true)
            })
            .unwrap();
        assert_eq!(third, first);
        assert!(!other.diag.has_warnings());
    }

    #[test]
    fn test_quote_arg() {
        assert_eq!(quote_arg("plain"), "plain");
        assert_eq!(quote_arg(""), "\"\"");
        assert_eq!(quote_arg("a \"b\""), "\"a \\\"b\\\"\"");
        assert_eq!(quote_arg("x\ny"), "\"x\\ny\"");
    }
}

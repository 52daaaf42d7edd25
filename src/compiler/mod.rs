//! Heading and command parsing of preprocessed text.
//!
//! ```text
//! Title                 level 0, root (never owned)
//! =====
//! # Embed               level 1, owned by the extension claiming "Embed"
//! ## Textures           level 2, owner inherited from "Embed"
//! FILE(grass.png)       command, sent to the active owner
//! ##^                   pop back to level 1
//! ```
//!
//! Commands outside any owned heading go to the extension claiming the
//! command name globally. Other non-blank lines go to the owner's `line`
//! hook, or are ignored at the root.
//!
//! - [`heading`] - heading context stack
//! - [`parse`] - line classification

pub mod heading;
pub(crate) mod parse;

use crate::diagnostics::{Phase, Where};
use crate::error::{Error, Result};
use crate::extension::{CommandOutcome, ExtensionId, ExtensionRegistry};
use crate::preprocess::{Origin, Preprocessed};
use crate::unit::Unit;
use heading::HeadingStack;
use parse::{Line, classify};

/// Compile preprocessed text, dispatching to the registry's extensions.
/// Returns the heading stack as it stood at the end of input.
pub fn compile(registry: &mut ExtensionRegistry, unit: &mut Unit, input: &Preprocessed) -> Result<HeadingStack> {
    unit.diag.set_phase(Phase::Compile);
    let mut compiler = Compiler {
        registry,
        unit,
        stack: HeadingStack::new(),
    };
    let origins = input.source.origins();
    let lines: Vec<&str> = input.text.lines().collect();

    let mut index = 0;
    while index < lines.len() {
        compiler.locate(origins.get(index));
        let (line, consumed_next) = classify(lines[index], lines.get(index + 1).copied())
            .map_err(|message| Error::syntax(compiler.unit.diag.here(), message))?;
        compiler.line(line, lines[index])?;
        index += if consumed_next { 2 } else { 1 };
    }
    log::debug!(
        "compiled {}: {} object(s), {} integer object(s), {} file(s)",
        compiler.unit.name(),
        compiler.unit.indexer.hash_objects().len(),
        compiler.unit.indexer.integer_objects().len(),
        compiler.unit.indexer.stubs().len()
    );
    log::debug!(
        "{} requires {}",
        compiler.unit.name(),
        compiler.unit.required_extensions().join(", ")
    );
    Ok(compiler.stack)
}

struct Compiler<'a> {
    registry: &'a mut ExtensionRegistry,
    unit: &'a mut Unit,
    stack: HeadingStack,
}

impl Compiler<'_> {
    /// Point diagnostics at the original file and line of an output line.
    fn locate(&mut self, origin: Option<&Origin>) {
        let Some(origin) = origin else {
            return;
        };
        if self.unit.diag.file() != Some(origin.file.as_ref()) {
            self.unit.diag.set_file(origin.file.to_path_buf());
        }
        self.unit.diag.set_line(origin.line);
    }

    fn here(&self) -> Where {
        self.unit.diag.here()
    }

    fn line(&mut self, line: Line, raw: &str) -> Result<()> {
        match line {
            Line::Blank => Ok(()),
            Line::Heading { level, name, args } => {
                let claimant = self.registry.heading_owner(&name);
                let at = self.here();
                self.stack.declare(level, &name, args, claimant, &at)?;
                self.switched()
            }
            Line::Pop { level } => {
                let at = self.here();
                self.stack.pop_to(level, &at)?;
                self.switched()
            }
            Line::Command { name, args } => self.command(&name, &args),
            Line::Text => {
                let Some(owner) = self.stack.active().owner() else {
                    log::trace!("{}: ignoring text outside owned headings", self.here());
                    return Ok(());
                };
                self.require(owner);
                let stack = &self.stack;
                self.registry
                    .invoke(owner, self.unit, |ext, ctx| ext.line(ctx, stack, raw))
            }
        }
    }

    /// Tell the owner of the now active heading about it.
    fn switched(&mut self) -> Result<()> {
        let Some(owner) = self.stack.active().owner() else {
            return Ok(());
        };
        self.require(owner);
        let stack = &self.stack;
        self.registry
            .invoke(owner, self.unit, |ext, ctx| ext.heading_switch(ctx, stack))
    }

    fn require(&mut self, id: ExtensionId) {
        self.unit.require(self.registry.name(id));
    }

    fn command(&mut self, name: &str, args: &[String]) -> Result<()> {
        let active = self.stack.active();
        let target = match active.owner() {
            Some(owner) => owner,
            None => match self.registry.command_owner(name) {
                Some(owner) => owner,
                None => {
                    return Err(Error::syntax(self.here(), format!("unrecognized command '{name}'")));
                }
            },
        };

        self.require(target);
        let stack = &self.stack;
        let outcome = self
            .registry
            .invoke(target, self.unit, |ext, ctx| ext.command(ctx, stack, name, args))?;
        if outcome == CommandOutcome::Unrecognized && !self.registry.descriptor(target).tolerates_unknown_commands {
            let heading = self.stack.active().name();
            let place = if heading.is_empty() {
                String::new()
            } else {
                format!(" under heading '{heading}'")
            };
            return Err(Error::syntax(
                self.here(),
                format!(
                    "unrecognized command '{name}'{place} (handled by '{}')",
                    self.registry.name(target)
                ),
            ));
        }
        Ok(())
    }
}

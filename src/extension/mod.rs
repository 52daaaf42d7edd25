//! Extension protocol.
//!
//! Extensions are the pluggable units that give PSPL sources their meaning.
//! Each one declares which heading names, global command names and
//! preprocessor directive names it claims, strongly (exclusive) or weakly
//! (fallback), and implements whichever hooks it needs.
//!
//! # Dispatch
//!
//! ```text
//!  [DIRECTIVE a b]  ──▶ directive claims ──▶ Extension::directive
//!  # Heading        ──▶ heading claims   ──▶ Extension::heading_switch
//!  NAME(a, b)       ──▶ active heading owner, else global command claims
//!                                        ──▶ Extension::command
//!  other text       ──▶ active heading owner ──▶ Extension::line
//!  ctx.broadcast(p) ──▶ every platform extension ──▶ Extension::instruction
//! ```
//!
//! - [`registry`] - claim resolution, lifecycle and hook invocation
//! - [`context`] - the [`HookContext`] handed to every hook
//! - [`platform`] - generic target platform extension
//! - [`embed`] - built-in `Embed` heading

pub mod context;
pub mod embed;
pub mod platform;
pub mod registry;

use std::any::Any;
use std::fmt;

use crate::binary::ByteOrder;
use crate::compiler::heading::HeadingStack;
use crate::error::Result;

pub use context::{DirectiveOutput, HookContext};
pub use registry::{ExtensionRegistry, RegistryBuilder};

/// Index of a registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(pub(crate) usize);

impl ExtensionId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Names claimed in one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    /// Exclusive claims. Two extensions claiming the same name strongly is a
    /// configuration error.
    pub strong: Vec<String>,
    /// Fallback claims, overridden by any strong claim.
    pub weak: Vec<String>,
}

impl Claims {
    pub fn is_empty(&self) -> bool {
        self.strong.is_empty() && self.weak.is_empty()
    }
}

/// Platform role of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformRole {
    /// Byte order the platform's consumer requires, `None` if it reads either.
    pub byte_order: Option<ByteOrder>,
}

/// Static description of an extension, read once at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    pub name: String,
    pub headings: Claims,
    pub commands: Claims,
    pub directives: Claims,
    /// Set when the extension is a target platform backend.
    pub platform: Option<PlatformRole>,
    /// Unknown commands under this extension's headings are ignored instead
    /// of failing the unit.
    pub tolerates_unknown_commands: bool,
}

impl ExtensionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn heading(mut self, name: impl Into<String>) -> Self {
        self.headings.strong.push(name.into());
        self
    }

    pub fn weak_heading(mut self, name: impl Into<String>) -> Self {
        self.headings.weak.push(name.into());
        self
    }

    pub fn command(mut self, name: impl Into<String>) -> Self {
        self.commands.strong.push(name.into());
        self
    }

    pub fn weak_command(mut self, name: impl Into<String>) -> Self {
        self.commands.weak.push(name.into());
        self
    }

    pub fn directive(mut self, name: impl Into<String>) -> Self {
        self.directives.strong.push(name.into());
        self
    }

    pub fn weak_directive(mut self, name: impl Into<String>) -> Self {
        self.directives.weak.push(name.into());
        self
    }

    pub fn platform(mut self, byte_order: Option<ByteOrder>) -> Self {
        self.platform = Some(PlatformRole { byte_order });
        self
    }

    pub fn tolerate_unknown_commands(mut self) -> Self {
        self.tolerates_unknown_commands = true;
        self
    }
}

/// Result of offering a command to an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Handled,
    /// The extension does not know the command.
    Unrecognized,
}

/// A pluggable unit. Every hook has a no-op default.
pub trait Extension {
    fn descriptor(&self) -> ExtensionDescriptor;

    /// Runs at most once per compiled unit, before the extension's first
    /// use. May call [`HookContext::require_extension`].
    fn init(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs once per unit for every initialized extension.
    fn finish(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Expand a claimed `[NAME args...]` directive into zero or more lines.
    fn directive(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _out: &mut DirectiveOutput,
        _name: &str,
        _args: &[String],
    ) -> Result<()> {
        Ok(())
    }

    /// A heading owned by this extension became the active one.
    fn heading_switch(&mut self, _ctx: &mut HookContext<'_>, _headings: &HeadingStack) -> Result<()> {
        Ok(())
    }

    /// A `NAME(args...)` line under an owned heading, or a claimed global
    /// command.
    fn command(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _headings: &HeadingStack,
        _name: &str,
        _args: &[String],
    ) -> Result<CommandOutcome> {
        Ok(CommandOutcome::Unrecognized)
    }

    /// Any other non-blank line under an owned heading.
    fn line(&mut self, _ctx: &mut HookContext<'_>, _headings: &HeadingStack, _text: &str) -> Result<()> {
        Ok(())
    }

    /// Payload broadcast by another extension to every platform.
    fn instruction(&mut self, _ctx: &mut HookContext<'_>, _sender: &str, _payload: &dyn Any) -> Result<()> {
        Ok(())
    }
}

//! Built-in `Embed` heading.
//!
//! ```text
//! # Embed
//! FILE(textures/grass.png, GL2)
//! TEXT(greeting, "hello, world")
//! U32(7, 0x1234)
//!
//! [EMBED_TEXT motd "welcome back"]
//! ```
//!
//! Trailing arguments name the platforms an entry is limited to; without
//! them it applies to every platform. `EMBED_TEXT` expands to an `Embed`
//! heading one level below the open one, holding one `TEXT` command, and
//! closes it again so the enclosing heading stays active.

use std::fmt;
use std::path::Path;

use super::{CommandOutcome, DirectiveOutput, Extension, ExtensionDescriptor, HookContext};
use crate::compiler::heading::HeadingStack;
use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::indexer::Platforms;

pub const EMBED: &str = "Embed";
pub const EMBED_TEXT: &str = "EMBED_TEXT";

/// Broadcast to platforms after every embedded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embedded {
    File { path: String, hash: ObjectHash },
    Text { key: String, hash: ObjectHash },
    Integer { key: u32 },
}

impl fmt::Display for Embedded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Embedded::File { path, hash } => write!(f, "file '{path}' ({hash})"),
            Embedded::Text { key, hash } => write!(f, "text '{key}' ({hash})"),
            Embedded::Integer { key } => write!(f, "integer {key}"),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Embed {
    entries: usize,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Extension for Embed {
    fn descriptor(&self) -> ExtensionDescriptor {
        ExtensionDescriptor::new(EMBED).heading(EMBED).weak_directive(EMBED_TEXT)
    }

    fn init(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        self.entries = 0;
        Ok(())
    }

    fn finish(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        if self.entries > 0 {
            log::debug!("embedded {} entries in {}", self.entries, ctx.unit_name());
        }
        Ok(())
    }

    fn directive(
        &mut self,
        ctx: &mut HookContext<'_>,
        out: &mut DirectiveOutput,
        name: &str,
        args: &[String],
    ) -> Result<()> {
        let [key, value] = args else {
            return Err(Error::syntax(
                ctx.here(),
                format!("{name} expects a key and a value, got {} argument(s)", args.len()),
            ));
        };
        let level = ctx.heading_level() + 1;
        out.heading(level, EMBED, &[]);
        out.command("TEXT", &[key.as_str(), value.as_str()]);
        out.pop_heading(level);
        Ok(())
    }

    fn heading_switch(&mut self, _ctx: &mut HookContext<'_>, headings: &HeadingStack) -> Result<()> {
        log::trace!("entering {} at level {}", headings.active().name(), headings.level());
        Ok(())
    }

    fn command(
        &mut self,
        ctx: &mut HookContext<'_>,
        _headings: &HeadingStack,
        name: &str,
        args: &[String],
    ) -> Result<CommandOutcome> {
        let embedded = match name {
            "FILE" => {
                let (path, platforms) = split_args(ctx, name, args, 1)?;
                let staged = ctx.add_file_stub(&platforms, Path::new(&path[0]), None, false)?;
                Embedded::File {
                    path: path[0].clone(),
                    hash: staged.hash,
                }
            }
            "TEXT" => {
                let (fields, platforms) = split_args(ctx, name, args, 2)?;
                let hash = ctx.add_hash_object(&platforms, &fields[0], fields[1].as_bytes(), None)?;
                Embedded::Text {
                    key: fields[0].clone(),
                    hash,
                }
            }
            "U32" => {
                let (fields, platforms) = split_args(ctx, name, args, 2)?;
                let key = parse_u32(ctx, &fields[0])?;
                let value = parse_u32(ctx, &fields[1])?;
                ctx.add_integer_object(
                    &platforms,
                    key,
                    &value.to_ne_bytes(),
                    Some(&value.swap_bytes().to_ne_bytes()),
                )?;
                Embedded::Integer { key }
            }
            _ => return Ok(CommandOutcome::Unrecognized),
        };
        self.entries += 1;
        ctx.broadcast(&embedded)?;
        Ok(CommandOutcome::Handled)
    }

    fn line(&mut self, ctx: &mut HookContext<'_>, _headings: &HeadingStack, text: &str) -> Result<()> {
        ctx.warn(format!("ignoring text under {EMBED}: '{}'", text.trim()));
        Ok(())
    }
}

/// Split `required` leading fields from trailing platform names.
fn split_args<'a>(
    ctx: &HookContext<'_>,
    command: &str,
    args: &'a [String],
    required: usize,
) -> Result<(&'a [String], Platforms)> {
    if args.len() < required {
        return Err(Error::syntax(
            ctx.here(),
            format!("{command} expects at least {required} argument(s), got {}", args.len()),
        ));
    }
    let (fields, platforms) = args.split_at(required);
    Ok((fields, Platforms::from_names(platforms.to_vec())))
}

fn parse_u32(ctx: &HookContext<'_>, text: &str) -> Result<u32> {
    parse_number(text).ok_or_else(|| Error::syntax(ctx.here(), format!("'{text}' is not a 32-bit unsigned integer")))
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

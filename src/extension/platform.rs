//! Generic target platform.
//!
//! Platforms named in the build configuration are registered as
//! [`TargetPlatform`]s. They carry the platform's byte-order demand into
//! endianness resolution and receive broadcast instructions; generating
//! platform code from those instructions is left to dedicated backends.

use std::any::Any;

use super::embed::Embedded;
use super::{Extension, ExtensionDescriptor, HookContext};
use crate::binary::ByteOrder;
use crate::config::PlatformSpec;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct TargetPlatform {
    name: String,
    byte_order: Option<ByteOrder>,
    received: usize,
}

impl TargetPlatform {
    pub fn new(name: impl Into<String>, byte_order: Option<ByteOrder>) -> Self {
        Self {
            name: name.into(),
            byte_order,
            received: 0,
        }
    }

    /// Instructions received for the unit in progress.
    pub fn received(&self) -> usize {
        self.received
    }
}

impl From<&PlatformSpec> for TargetPlatform {
    fn from(spec: &PlatformSpec) -> Self {
        Self::new(spec.name.clone(), spec.byte_order)
    }
}

impl Extension for TargetPlatform {
    fn descriptor(&self) -> ExtensionDescriptor {
        ExtensionDescriptor::new(self.name.clone()).platform(self.byte_order)
    }

    fn init(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        self.received = 0;
        Ok(())
    }

    fn instruction(&mut self, ctx: &mut HookContext<'_>, sender: &str, payload: &dyn Any) -> Result<()> {
        self.received += 1;
        match payload.downcast_ref::<Embedded>() {
            Some(embedded) => log::debug!(
                "{}: {} embedded {} in {}",
                self.name,
                sender,
                embedded,
                ctx.unit_name()
            ),
            None => log::debug!("{}: opaque instruction from {}", self.name, sender),
        }
        Ok(())
    }

    fn finish(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        log::debug!(
            "{}: {} instruction(s) for {}",
            self.name,
            self.received,
            ctx.unit_name()
        );
        Ok(())
    }
}

//! Claim resolution, per-unit lifecycle and hook invocation.
//!
//! While a hook runs, its extension is taken out of its slot so the hook can
//! receive a [`HookContext`] that borrows the registry mutably. Other
//! extensions stay reachable through that context (early init, broadcast);
//! re-entering the running extension itself is a configuration error.

use ahash::AHashMap;
use std::any::Any;

use super::{Claims, Extension, ExtensionDescriptor, ExtensionId, HookContext};
use crate::binary::ByteOrder;
use crate::diagnostics::{Phase, Warning, WarningKind, Where};
use crate::error::{Error, Result};
use crate::unit::Unit;

struct Slot {
    descriptor: ExtensionDescriptor,
    extension: Option<Box<dyn Extension>>,
}

#[derive(Debug, Clone, Copy)]
enum Namespace {
    Heading,
    Command,
    Directive,
}

impl Namespace {
    fn claims(self, descriptor: &ExtensionDescriptor) -> &Claims {
        match self {
            Namespace::Heading => &descriptor.headings,
            Namespace::Command => &descriptor.commands,
            Namespace::Directive => &descriptor.directives,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Namespace::Heading => "heading",
            Namespace::Command => "command",
            Namespace::Directive => "directive",
        }
    }
}

/// Collects extensions in registration order.
#[derive(Default)]
pub struct RegistryBuilder {
    extensions: Vec<Box<dyn Extension>>,
}

impl RegistryBuilder {
    pub fn register(self, extension: impl Extension + 'static) -> Self {
        self.register_boxed(Box::new(extension))
    }

    pub fn register_boxed(mut self, extension: Box<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Resolve every claim. Conflicting strong claims and duplicate
    /// extension names fail here, before any source is read.
    pub fn build(self) -> Result<ExtensionRegistry> {
        let at = Where::phase(Phase::Init);
        let mut slots = Vec::with_capacity(self.extensions.len());
        let mut names = AHashMap::new();

        for extension in self.extensions {
            let descriptor = extension.descriptor();
            if descriptor.name.is_empty() {
                return Err(Error::config(at, "extension registered without a name"));
            }
            let id = ExtensionId(slots.len());
            if names.insert(descriptor.name.clone(), id).is_some() {
                return Err(Error::config(
                    at,
                    format!("two extensions are named '{}'", descriptor.name),
                ));
            }
            slots.push(Slot {
                descriptor,
                extension: Some(extension),
            });
        }

        let mut warnings = Vec::new();
        let headings = resolve_claims(&slots, Namespace::Heading, &mut warnings)?;
        let commands = resolve_claims(&slots, Namespace::Command, &mut warnings)?;
        let directives = resolve_claims(&slots, Namespace::Directive, &mut warnings)?;
        for warning in &warnings {
            log::warn!("{warning}");
        }

        log::debug!("registered {} extension(s)", slots.len());
        let initialized = vec![false; slots.len()];
        Ok(ExtensionRegistry {
            slots,
            names,
            headings,
            commands,
            directives,
            initialized,
            warnings,
        })
    }
}

fn resolve_claims(
    slots: &[Slot],
    namespace: Namespace,
    warnings: &mut Vec<Warning>,
) -> Result<AHashMap<String, ExtensionId>> {
    let mut strong: AHashMap<&str, ExtensionId> = AHashMap::new();
    let mut weak: AHashMap<&str, ExtensionId> = AHashMap::new();
    let mut overrides = Vec::new();

    for (index, slot) in slots.iter().enumerate() {
        let id = ExtensionId(index);
        let claims = namespace.claims(&slot.descriptor);
        for name in &claims.strong {
            match strong.get(name.as_str()).copied() {
                Some(previous) if previous != id => {
                    return Err(Error::config(
                        Where::phase(Phase::Init),
                        format!(
                            "{} '{}' is strongly claimed by both '{}' and '{}'",
                            namespace.name(),
                            name,
                            slots[previous.0].descriptor.name,
                            slot.descriptor.name
                        ),
                    ));
                }
                _ => {
                    strong.insert(name, id);
                }
            }
        }
        for name in &claims.weak {
            match weak.insert(name, id) {
                Some(previous) if previous != id => overrides.push((name.as_str(), previous, id)),
                _ => {}
            }
        }
    }

    for (name, overridden, winner) in overrides {
        if strong.contains_key(name) {
            continue;
        }
        warnings.push(Warning {
            at: Where::phase(Phase::Init),
            kind: WarningKind::WeakClaimOverride {
                namespace: namespace.name().to_string(),
                name: name.to_string(),
                winner: slots[winner.0].descriptor.name.clone(),
                overridden: slots[overridden.0].descriptor.name.clone(),
            },
        });
    }

    let mut resolved: AHashMap<String, ExtensionId> =
        weak.into_iter().map(|(name, id)| (name.to_string(), id)).collect();
    resolved.extend(strong.into_iter().map(|(name, id)| (name.to_string(), id)));
    Ok(resolved)
}

/// Every registered extension with its resolved claims.
pub struct ExtensionRegistry {
    slots: Vec<Slot>,
    names: AHashMap<String, ExtensionId>,
    headings: AHashMap<String, ExtensionId>,
    commands: AHashMap<String, ExtensionId>,
    directives: AHashMap<String, ExtensionId>,
    /// Extensions whose `init` ran for the unit in progress.
    initialized: Vec<bool>,
    warnings: Vec<Warning>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field(
                "extensions",
                &self.slots.iter().map(|s| s.descriptor.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ExtensionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn descriptor(&self, id: ExtensionId) -> &ExtensionDescriptor {
        &self.slots[id.0].descriptor
    }

    pub fn name(&self, id: ExtensionId) -> &str {
        &self.slots[id.0].descriptor.name
    }

    pub fn find(&self, name: &str) -> Option<ExtensionId> {
        self.names.get(name).copied()
    }

    pub fn heading_owner(&self, name: &str) -> Option<ExtensionId> {
        self.headings.get(name).copied()
    }

    pub fn command_owner(&self, name: &str) -> Option<ExtensionId> {
        self.commands.get(name).copied()
    }

    pub fn directive_owner(&self, name: &str) -> Option<ExtensionId> {
        self.directives.get(name).copied()
    }

    /// Warnings raised while resolving weak claims.
    pub fn claim_warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Platform extensions in registration order.
    pub fn platforms(&self) -> impl Iterator<Item = (ExtensionId, &ExtensionDescriptor)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.descriptor.platform.is_some())
            .map(|(index, slot)| (ExtensionId(index), &slot.descriptor))
    }

    /// `Some(demand)` when `name` is a registered platform.
    pub fn platform_demand(&self, name: &str) -> Option<Option<ByteOrder>> {
        let id = self.find(name)?;
        self.descriptor(id).platform.map(|role| role.byte_order)
    }

    pub fn is_initialized(&self, id: ExtensionId) -> bool {
        self.initialized[id.0]
    }

    /// Start a unit: reset the initialized set and run every `init` hook in
    /// registration order.
    pub fn begin_unit(&mut self, unit: &mut Unit) -> Result<()> {
        self.initialized.iter_mut().for_each(|done| *done = false);
        unit.diag.set_phase(Phase::Init);
        unit.diag.clear_line();
        for index in 0..self.slots.len() {
            self.ensure_initialized(ExtensionId(index), unit)?;
        }
        Ok(())
    }

    /// Run `finish` on every initialized extension, then clear the set. The
    /// set is cleared even when a hook fails; the first failure is returned.
    pub fn finish_unit(&mut self, unit: &mut Unit) -> Result<()> {
        let mut first_error = None;
        for index in 0..self.slots.len() {
            if !self.initialized[index] {
                continue;
            }
            if let Err(err) = self.call(ExtensionId(index), unit, false, |ext, ctx| ext.finish(ctx)) {
                first_error.get_or_insert(err);
            }
        }
        self.initialized.iter_mut().for_each(|done| *done = false);
        first_error.map_or(Ok(()), Err)
    }

    /// Initialize `id` for the current unit unless that already happened.
    pub(crate) fn ensure_initialized(&mut self, id: ExtensionId, unit: &mut Unit) -> Result<()> {
        if self.initialized[id.0] {
            return Ok(());
        }
        // marked first so cyclic requests from inside init are no-ops
        self.initialized[id.0] = true;
        log::debug!("initializing extension '{}' for {}", self.name(id), unit.name());
        self.call(id, unit, true, |ext, ctx| ext.init(ctx))
    }

    /// Run a hook of `id`, initializing it first when needed.
    pub(crate) fn invoke<R>(
        &mut self,
        id: ExtensionId,
        unit: &mut Unit,
        hook: impl FnOnce(&mut dyn Extension, &mut HookContext<'_>) -> Result<R>,
    ) -> Result<R> {
        self.ensure_initialized(id, unit)?;
        self.call(id, unit, false, hook)
    }

    /// Deliver `payload` to every platform extension except the sender.
    pub(crate) fn broadcast(&mut self, sender: ExtensionId, unit: &mut Unit, payload: &dyn Any) -> Result<()> {
        let sender_name = self.name(sender).to_string();
        let targets: Vec<ExtensionId> = self
            .platforms()
            .map(|(id, _)| id)
            .filter(|id| *id != sender)
            .collect();
        for target in targets {
            self.invoke(target, unit, |ext, ctx| ext.instruction(ctx, &sender_name, payload))?;
        }
        Ok(())
    }

    fn call<R>(
        &mut self,
        id: ExtensionId,
        unit: &mut Unit,
        in_init: bool,
        hook: impl FnOnce(&mut dyn Extension, &mut HookContext<'_>) -> Result<R>,
    ) -> Result<R> {
        let Some(mut extension) = self.slots[id.0].extension.take() else {
            return Err(Error::config(
                unit.diag.here(),
                format!("extension '{}' was re-entered from its own hook", self.name(id)),
            ));
        };
        let result = {
            let mut ctx = HookContext::new(self, unit, id, in_init);
            hook(extension.as_mut(), &mut ctx)
        };
        self.slots[id.0].extension = Some(extension);
        result.map_err(|err| err.located(unit.diag.here()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extension::CommandOutcome;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(crate) type Journal = Rc<RefCell<Vec<String>>>;

    /// Extension recording every hook call into a shared journal.
    pub(crate) struct Recorder {
        pub descriptor: ExtensionDescriptor,
        pub journal: Journal,
        pub requires: Vec<String>,
    }

    impl Recorder {
        pub(crate) fn new(descriptor: ExtensionDescriptor, journal: &Journal) -> Self {
            Self {
                descriptor,
                journal: journal.clone(),
                requires: Vec::new(),
            }
        }

        fn log(&self, event: String) {
            self.journal.borrow_mut().push(format!("{}:{}", self.descriptor.name, event));
        }
    }

    impl Extension for Recorder {
        fn descriptor(&self) -> ExtensionDescriptor {
            self.descriptor.clone()
        }

        fn init(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
            self.log("init".to_string());
            for name in self.requires.clone() {
                ctx.require_extension(&name)?;
            }
            Ok(())
        }

        fn finish(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
            self.log("finish".to_string());
            Ok(())
        }

        fn command(
            &mut self,
            _ctx: &mut HookContext<'_>,
            headings: &crate::compiler::heading::HeadingStack,
            name: &str,
            args: &[String],
        ) -> Result<CommandOutcome> {
            self.log(format!("command {}@{} {:?}", name, headings.active().name(), args));
            Ok(if name.starts_with("UNKNOWN") {
                CommandOutcome::Unrecognized
            } else {
                CommandOutcome::Handled
            })
        }

        fn instruction(&mut self, _ctx: &mut HookContext<'_>, sender: &str, payload: &dyn Any) -> Result<()> {
            let text = payload.downcast_ref::<&'static str>().copied().unwrap_or("?");
            self.log(format!("instruction from {sender}: {text}"));
            Ok(())
        }
    }

    pub(crate) fn journal() -> Journal {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn unit() -> (tempfile::TempDir, Unit) {
        let dir = tempfile::tempdir().unwrap();
        let unit = Unit::for_source(dir.path().join("test.pspl"), &crate::config::BuildConfig::default());
        (dir, unit)
    }

    #[test]
    fn test_strong_conflict_names_both() {
        let j = journal();
        let err = ExtensionRegistry::builder()
            .register(Recorder::new(ExtensionDescriptor::new("A").heading("Shader"), &j))
            .register(Recorder::new(ExtensionDescriptor::new("B").heading("Shader"), &j))
            .build()
            .unwrap_err();
        let text = err.to_string();
        assert!(matches!(err, Error::Config { .. }));
        assert!(text.contains("'A'") && text.contains("'B'"), "{text}");
    }

    #[test]
    fn test_strong_beats_weak_and_last_weak_wins() {
        let j = journal();
        let registry = ExtensionRegistry::builder()
            .register(Recorder::new(ExtensionDescriptor::new("A").weak_directive("X").weak_heading("H"), &j))
            .register(Recorder::new(ExtensionDescriptor::new("B").heading("H"), &j))
            .register(Recorder::new(ExtensionDescriptor::new("C").weak_directive("X").weak_heading("H"), &j))
            .build()
            .unwrap();
        assert_eq!(registry.heading_owner("H"), registry.find("B"));
        assert_eq!(registry.directive_owner("X"), registry.find("C"));
        assert_eq!(registry.command_owner("nothing"), None);

        // only the directive tie is reported, the heading went to a strong claim
        assert_eq!(registry.claim_warnings().len(), 1);
        assert!(matches!(
            &registry.claim_warnings()[0].kind,
            WarningKind::WeakClaimOverride { winner, overridden, .. } if winner == "C" && overridden == "A"
        ));
    }

    #[test]
    fn test_duplicate_extension_names_rejected() {
        let j = journal();
        let result = ExtensionRegistry::builder()
            .register(Recorder::new(ExtensionDescriptor::new("A"), &j))
            .register(Recorder::new(ExtensionDescriptor::new("A"), &j))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_init_once_and_finish_clears() {
        let j = journal();
        let mut first = Recorder::new(ExtensionDescriptor::new("A"), &j);
        // cyclic requests are no-ops
        first.requires = vec!["B".to_string(), "A".to_string()];
        let mut second = Recorder::new(ExtensionDescriptor::new("B"), &j);
        second.requires = vec!["A".to_string()];
        let mut registry = ExtensionRegistry::builder()
            .register(first)
            .register(second)
            .build()
            .unwrap();
        let (_dir, mut unit) = unit();

        registry.begin_unit(&mut unit).unwrap();
        assert_eq!(*j.borrow(), vec!["A:init", "B:init"]);
        registry.finish_unit(&mut unit).unwrap();
        assert!(!registry.is_initialized(ExtensionId(0)));

        registry.begin_unit(&mut unit).unwrap();
        registry.finish_unit(&mut unit).unwrap();
        assert_eq!(
            *j.borrow(),
            vec!["A:init", "B:init", "A:finish", "B:finish", "A:init", "B:init", "A:finish", "B:finish"]
        );
    }

    #[test]
    fn test_require_outside_init_is_config_error() {
        struct Eager;
        impl Extension for Eager {
            fn descriptor(&self) -> ExtensionDescriptor {
                ExtensionDescriptor::new("Eager")
            }
            fn finish(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
                ctx.require_extension("Eager")
            }
        }
        let mut registry = ExtensionRegistry::builder().register(Eager).build().unwrap();
        let (_dir, mut unit) = unit();
        registry.begin_unit(&mut unit).unwrap();
        let err = registry.finish_unit(&mut unit).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_broadcast_reaches_platforms_lazily() {
        struct Sender;
        impl Extension for Sender {
            fn descriptor(&self) -> ExtensionDescriptor {
                ExtensionDescriptor::new("Sender")
            }
            fn finish(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
                ctx.broadcast(&"draw")
            }
        }
        let j = journal();
        let mut registry = ExtensionRegistry::builder()
            .register(Sender)
            .register(Recorder::new(ExtensionDescriptor::new("GL2").platform(None), &j))
            .register(Recorder::new(ExtensionDescriptor::new("Other"), &j))
            .build()
            .unwrap();
        let (_dir, mut unit) = unit();

        // no begin_unit: the platform is initialized on first delivery
        registry.ensure_initialized(ExtensionId(0), &mut unit).unwrap();
        registry.finish_unit(&mut unit).unwrap();
        assert_eq!(
            *j.borrow(),
            vec!["GL2:init", "GL2:instruction from Sender: draw", "GL2:finish"]
        );
    }
}

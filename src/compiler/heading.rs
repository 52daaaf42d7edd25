//! Heading context stack.
//!
//! Level 0 is the document root. A heading at level L replaces whatever was
//! open at L and deeper, so every frame's parent is the frame one level up
//! that was active when it was pushed.

use crate::diagnostics::Where;
use crate::error::{Error, Result};
use crate::extension::ExtensionId;

/// Maximum number of simultaneously open levels, root included.
pub const MAX_HEADING_DEPTH: usize = 16;

/// Identity of one pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingContext {
    id: FrameId,
    parent: Option<FrameId>,
    level: usize,
    name: String,
    args: Vec<String>,
    owner: Option<ExtensionId>,
}

impl HeadingContext {
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Frame this one was pushed under; `None` for the root.
    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Heading text; empty for the implicit root.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Extension that receives this heading's commands and lines.
    pub fn owner(&self) -> Option<ExtensionId> {
        self.owner
    }
}

#[derive(Debug, Clone)]
pub struct HeadingStack {
    frames: Vec<HeadingContext>,
    next_id: u64,
}

impl Default for HeadingStack {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadingStack {
    pub fn new() -> Self {
        Self {
            frames: vec![HeadingContext {
                id: FrameId(0),
                parent: None,
                level: 0,
                name: String::new(),
                args: Vec::new(),
                owner: None,
            }],
            next_id: 1,
        }
    }

    /// Level of the active heading.
    pub fn level(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn active(&self) -> &HeadingContext {
        // the root frame is never removed without a replacement
        &self.frames[self.frames.len() - 1]
    }

    /// Open frames from the root down to the active one.
    pub fn frames(&self) -> &[HeadingContext] {
        &self.frames
    }

    /// The parent of `frame`, if it is still open.
    pub fn trace(&self, frame: &HeadingContext) -> Option<&HeadingContext> {
        let parent = frame.parent?;
        self.frames.iter().find(|f| f.id == parent)
    }

    /// Open a heading at `level`. `claimant` is the extension claiming the
    /// heading's name; without one the parent's owner is inherited.
    pub(crate) fn declare(
        &mut self,
        level: usize,
        name: &str,
        args: Vec<String>,
        claimant: Option<ExtensionId>,
        at: &Where,
    ) -> Result<&HeadingContext> {
        if level >= MAX_HEADING_DEPTH {
            return Err(Error::syntax(
                at.clone(),
                format!("heading '{name}' at level {level} exceeds the maximum nesting depth of {MAX_HEADING_DEPTH}"),
            ));
        }
        if level > self.level() + 1 {
            return Err(Error::syntax(
                at.clone(),
                format!(
                    "heading '{name}' at level {level} skips a level (the active heading is at level {})",
                    self.level()
                ),
            ));
        }

        self.frames.truncate(level);
        let parent = self.frames.last();
        let owner = if level == 0 {
            None
        } else {
            claimant.or_else(|| parent.and_then(|p| p.owner))
        };
        let frame = HeadingContext {
            id: FrameId(self.next_id),
            parent: parent.map(|p| p.id),
            level,
            name: name.to_string(),
            args,
            owner,
        };
        self.next_id += 1;
        self.frames.push(frame);
        Ok(self.active())
    }

    /// Close every frame at `level` and deeper.
    pub(crate) fn pop_to(&mut self, level: usize, at: &Where) -> Result<()> {
        if level == 0 {
            return Err(Error::syntax(at.clone(), "the root heading cannot be popped"));
        }
        if level <= self.level() {
            self.frames.truncate(level);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Phase;

    fn at() -> Where {
        Where::phase(Phase::Compile)
    }

    #[test]
    fn test_push_replace_and_trace() {
        let mut stack = HeadingStack::new();
        let owner = Some(ExtensionId(3));
        let a = stack.declare(1, "A", vec![], owner, &at()).unwrap().clone();
        let b = stack.declare(2, "B", vec![], None, &at()).unwrap().clone();
        assert_eq!(stack.level(), 2);
        assert_eq!(b.owner(), owner, "owner is inherited");
        assert_eq!(stack.trace(&b).map(HeadingContext::name), Some("A"));

        // a sibling at level 1 replaces A and drops B
        let c = stack.declare(1, "C", vec!["x".to_string()], None, &at()).unwrap().clone();
        assert_eq!(stack.level(), 1);
        assert_ne!(c.id(), a.id());
        assert_eq!(c.owner(), None);
        assert_eq!(c.parent(), Some(stack.frames()[0].id()));

        // every open frame points at the frame one level up
        let d = stack.declare(2, "D", vec![], None, &at()).unwrap().clone();
        assert_eq!(stack.trace(&d).map(HeadingContext::id), Some(c.id()));
    }

    #[test]
    fn test_depth_limit_and_skipped_level() {
        let mut stack = HeadingStack::new();
        for level in 1..MAX_HEADING_DEPTH {
            stack.declare(level, "h", vec![], None, &at()).unwrap();
        }
        assert_eq!(stack.level(), MAX_HEADING_DEPTH - 1);
        assert!(stack.declare(MAX_HEADING_DEPTH, "deep", vec![], None, &at()).is_err());

        let mut stack = HeadingStack::new();
        assert!(stack.declare(2, "skip", vec![], None, &at()).is_err());
    }

    #[test]
    fn test_level_zero_replaces_root_without_owner() {
        let mut stack = HeadingStack::new();
        stack.declare(1, "A", vec![], Some(ExtensionId(0)), &at()).unwrap();
        let root = stack.declare(0, "Title", vec![], Some(ExtensionId(0)), &at()).unwrap();
        assert_eq!(root.owner(), None);
        assert_eq!(root.parent(), None);
        assert_eq!(stack.level(), 0);
    }

    #[test]
    fn test_pop_marker() {
        let mut stack = HeadingStack::new();
        stack.declare(1, "A", vec![], None, &at()).unwrap();
        stack.declare(2, "B", vec![], None, &at()).unwrap();
        stack.pop_to(2, &at()).unwrap();
        assert_eq!(stack.active().name(), "A");
        stack.pop_to(5, &at()).unwrap();
        assert_eq!(stack.level(), 1);
        assert!(stack.pop_to(0, &at()).is_err());
    }
}

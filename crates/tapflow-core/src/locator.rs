//! Node lookup over the observed UI tree.
//!
//! Tree walks are bounded and iterative: [`Ancestors`] and [`Descendants`]
//! are lazy, finite, single-pass iterators, so "first match" stops early.

use crate::LocatorConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Shared handle to a node of the observed tree.
pub type Node = Arc<dyn UiNode>;

/// Bounding box in screen pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
}

/// One element of the target application's UI, as observed.
pub trait UiNode: Send + Sync + fmt::Debug {
    fn text(&self) -> Option<String>;
    fn bounds(&self) -> Rect;
    fn is_clickable(&self) -> bool;
    /// Element class, used to recognise editable text fields.
    fn class_name(&self) -> Option<String>;
    fn parent(&self) -> Option<Node>;
    fn children(&self) -> Vec<Node>;
    /// Element-targeted activation. Returns `false` if the element refused it.
    fn perform_click(&self) -> bool;
}

/// Access to the currently observed tree.
pub trait UiTree: Send + Sync {
    /// Root of the active window; `None` while the UI is not ready.
    fn root(&self) -> Option<Node>;

    /// All nodes under `root` whose text contains `literal`, case-insensitively.
    fn find_all_by_text(&self, root: &Node, literal: &str) -> Vec<Node> {
        let needle = literal.to_lowercase();
        Descendants::new(root.clone())
            .filter(|node| {
                node.text()
                    .map(|text| text.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .collect()
    }
}

/// Walks up the parent chain, yielding at most `max_depth` nodes.
pub struct Ancestors {
    next: Option<Node>,
    remaining: usize,
}

impl Ancestors {
    /// Starts at the parent of `node`.
    pub fn new(node: &Node, max_depth: usize) -> Self {
        Self {
            next: node.parent(),
            remaining: max_depth,
        }
    }

    /// Starts at `node` itself.
    pub fn inclusive(node: &Node, max_depth: usize) -> Self {
        Self {
            next: Some(node.clone()),
            remaining: max_depth,
        }
    }
}

impl Iterator for Ancestors {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next.take()?;
        self.remaining -= 1;
        self.next = current.parent();
        Some(current)
    }
}

/// Pre-order walk of a subtree using an explicit stack.
pub struct Descendants {
    stack: Vec<Node>,
}

impl Descendants {
    pub fn new(root: Node) -> Self {
        Self { stack: vec![root] }
    }
}

impl Iterator for Descendants {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let node = self.stack.pop()?;
        let mut children = node.children();
        children.reverse();
        self.stack.extend(children);
        Some(node)
    }
}

/// Why a lookup produced nothing to click. All of these are retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupFailure {
    #[error("UI not ready")]
    TreeNotReady,
    #[error("\"{0}\" not found")]
    NotFound(String),
    #[error("no usable match for \"{0}\"")]
    NoCandidate(String),
    #[error("\"{0}\" is not clickable")]
    NotClickable(String),
}

/// How to pick among several text matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Take the first match.
    First,
    /// Skip echoes inside editable fields; prefer an exact match, else a match
    /// below `section_header`.
    Disambiguate { section_header: Option<String> },
}

#[derive(Debug, Clone, Default)]
pub struct NodeLocator {
    config: LocatorConfig,
}

impl NodeLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    pub fn find_by_text(&self, tree: &dyn UiTree, root: &Node, text: &str) -> Vec<Node> {
        tree.find_all_by_text(root, text)
    }

    /// `node` if clickable, else the nearest clickable ancestor within `max_depth` levels.
    pub fn find_clickable_ancestor(&self, node: &Node, max_depth: usize) -> Option<Node> {
        if node.is_clickable() {
            return Some(node.clone());
        }
        Ancestors::new(node, max_depth).find(|n| n.is_clickable())
    }

    /// Whether `node` or one of its first ancestors is an editable text field.
    pub fn is_descendant_of_editable_field(&self, node: &Node, max_depth: usize) -> bool {
        Ancestors::inclusive(node, max_depth).any(|n| self.is_editable(&n))
    }

    fn is_editable(&self, node: &Node) -> bool {
        node.class_name()
            .map(|class| self.config.editable_classes.iter().any(|c| *c == class))
            .unwrap_or(false)
    }

    /// Resolve `text` to a clickable node of the current tree.
    pub fn locate(
        &self,
        tree: &dyn UiTree,
        text: &str,
        strategy: &SelectionStrategy,
    ) -> Result<Node, LookupFailure> {
        let root = tree.root().ok_or(LookupFailure::TreeNotReady)?;
        self.select(tree, &root, text, strategy)
    }

    pub fn select(
        &self,
        tree: &dyn UiTree,
        root: &Node,
        text: &str,
        strategy: &SelectionStrategy,
    ) -> Result<Node, LookupFailure> {
        let matches = self.find_by_text(tree, root, text);
        if matches.is_empty() {
            return Err(LookupFailure::NotFound(text.to_string()));
        }
        debug!(text, count = matches.len(), ?strategy, "text matches");

        let target = match strategy {
            SelectionStrategy::First => matches.into_iter().next(),
            SelectionStrategy::Disambiguate { section_header } => {
                let depth = self.config.editable_field_depth;
                let candidates: Vec<Node> = matches
                    .into_iter()
                    .filter(|n| !self.is_descendant_of_editable_field(n, depth))
                    .collect();
                let exact = candidates
                    .iter()
                    .find(|n| n.text().as_deref() == Some(text))
                    .cloned();
                exact.or_else(|| {
                    let header = section_header.as_deref()?;
                    let header_node = self.find_by_text(tree, root, header).into_iter().next()?;
                    candidates
                        .into_iter()
                        .find(|n| is_below(n, &header_node))
                })
            }
        };

        let target = target.ok_or_else(|| LookupFailure::NoCandidate(text.to_string()))?;
        self.find_clickable_ancestor(&target, self.config.clickable_ancestor_depth)
            .ok_or_else(|| LookupFailure::NotClickable(text.to_string()))
    }

    /// Short visible texts under `root`, for diagnostics.
    pub fn visible_texts(&self, root: &Node, limit: usize) -> Vec<String> {
        Descendants::new(root.clone())
            .filter_map(|n| n.text())
            .filter(|t| !t.trim().is_empty() && t.chars().count() < 20)
            .take(limit)
            .collect()
    }
}

/// Whether `node` starts below the top of `header` on screen.
fn is_below(node: &Node, header: &Node) -> bool {
    node.bounds().top > header.bounds().top
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNode, FakeTree};

    const EDIT: &str = "android.widget.EditText";

    fn locator() -> NodeLocator {
        NodeLocator::new(LocatorConfig::default())
    }

    fn disambiguate() -> SelectionStrategy {
        SelectionStrategy::Disambiguate {
            section_header: Some("Contacts".into()),
        }
    }

    #[test]
    fn test_descendants_preorder() {
        let root = FakeNode::new("root");
        let a = FakeNode::new("a").attach_to(&root);
        FakeNode::new("a1").attach_to(&a);
        FakeNode::new("b").attach_to(&root);
        let texts: Vec<String> = Descendants::new(root.node())
            .filter_map(|n| n.text())
            .collect();
        assert_eq!(texts, ["root", "a", "a1", "b"]);
    }

    #[test]
    fn test_ancestors_bounded() {
        let root = FakeNode::new("0");
        let mut leaf = root.clone();
        for i in 1..=30 {
            leaf = FakeNode::new(&i.to_string()).attach_to(&leaf);
        }
        assert_eq!(Ancestors::new(&leaf.node(), 10).count(), 10);
        assert_eq!(Ancestors::inclusive(&leaf.node(), 100).count(), 31);
    }

    #[test]
    fn test_editable_echo_is_skipped() {
        let root = FakeNode::new("");
        let field = FakeNode::new("").class(EDIT).attach_to(&root);
        FakeNode::new("Grandma").clickable().attach_to(&field);
        let label = FakeNode::new("Grandma").clickable().attach_to(&root);
        let tree = FakeTree::new(root);

        let picked = locator().locate(&tree, "Grandma", &disambiguate()).unwrap();
        assert!(Arc::ptr_eq(&picked, &label.node()));
    }

    #[test]
    fn test_first_strategy_takes_echo() {
        let root = FakeNode::new("");
        let field = FakeNode::new("").class(EDIT).clickable().attach_to(&root);
        let echo = FakeNode::new("Grandma").attach_to(&field);
        FakeNode::new("Grandma").clickable().attach_to(&root);
        let tree = FakeTree::new(root);

        let picked = locator()
            .locate(&tree, "Grandma", &SelectionStrategy::First)
            .unwrap();
        // echo is not clickable, its field is
        assert!(Arc::ptr_eq(&picked, &echo.node().parent().unwrap()));
    }

    #[test]
    fn test_falls_back_to_section_below_header() {
        let root = FakeNode::new("");
        FakeNode::new("Grandma (frequent)")
            .bounds(Rect::new(0, 100, 100, 150))
            .clickable()
            .attach_to(&root);
        FakeNode::new("Contacts")
            .bounds(Rect::new(0, 300, 100, 320))
            .attach_to(&root);
        let wanted = FakeNode::new("Grandma (home)")
            .bounds(Rect::new(0, 400, 100, 450))
            .clickable()
            .attach_to(&root);
        let tree = FakeTree::new(root);

        let picked = locator().locate(&tree, "Grandma", &disambiguate()).unwrap();
        assert!(Arc::ptr_eq(&picked, &wanted.node()));
    }

    #[test]
    fn test_no_header_no_exact_is_no_candidate() {
        let root = FakeNode::new("");
        FakeNode::new("Grandma2").clickable().attach_to(&root);
        let tree = FakeTree::new(root);
        assert_eq!(
            locator().locate(&tree, "Grandma", &disambiguate()).unwrap_err(),
            LookupFailure::NoCandidate("Grandma".into())
        );
    }

    #[test]
    fn test_clickable_ancestor_resolution() {
        let root = FakeNode::new("");
        let row = FakeNode::new("").clickable().attach_to(&root);
        let inner = FakeNode::new("").attach_to(&row);
        let label = FakeNode::new("Video").attach_to(&inner);
        let tree = FakeTree::new(root);

        let picked = locator()
            .locate(&tree, "Video", &SelectionStrategy::First)
            .unwrap();
        assert!(Arc::ptr_eq(&picked, &row.node()));
        assert!(locator().find_clickable_ancestor(&label.node(), 1).is_none());
    }

    #[test]
    fn test_nothing_clickable_fails() {
        let root = FakeNode::new("");
        FakeNode::new("Video").attach_to(&root);
        let tree = FakeTree::new(root);
        assert_eq!(
            locator()
                .locate(&tree, "Video", &SelectionStrategy::First)
                .unwrap_err(),
            LookupFailure::NotClickable("Video".into())
        );
    }

    #[test]
    fn test_missing_root_and_text() {
        let tree = FakeTree::empty();
        assert_eq!(
            locator().locate(&tree, "x", &SelectionStrategy::First).unwrap_err(),
            LookupFailure::TreeNotReady
        );
        let tree = FakeTree::new(FakeNode::new("hello"));
        assert_eq!(
            locator().locate(&tree, "x", &SelectionStrategy::First).unwrap_err(),
            LookupFailure::NotFound("x".into())
        );
    }

    #[test]
    fn test_visible_texts_filters_long_and_blank() {
        let root = FakeNode::new("");
        FakeNode::new("Chats").attach_to(&root);
        FakeNode::new("  ").attach_to(&root);
        FakeNode::new("a very long message preview text").attach_to(&root);
        FakeNode::new("Me").attach_to(&root);
        assert_eq!(locator().visible_texts(&root.node(), 8), ["Chats", "Me"]);
    }
}

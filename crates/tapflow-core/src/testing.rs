//! In-memory fakes for the platform boundaries.

use crate::gesture::{
    Clipboard, ClipboardError, Display, DisplaySize, GestureDispatcher, TapOutcome,
};
use crate::locator::{Node, Rect, UiNode, UiTree};
use crate::overlay::{Layer, LayerKind, OverlayError, OverlayRenderer};
use crate::recorder::{RecordLauncher, RecordTarget};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Default)]
pub struct FakeNodeData {
    text: String,
    class: Option<String>,
    clickable: bool,
    bounds: Rect,
    parent: Mutex<Weak<FakeNodeData>>,
    children: Mutex<Vec<Arc<FakeNodeData>>>,
    clicks: AtomicUsize,
    refuse_clicks: bool,
}

impl UiNode for FakeNodeData {
    fn text(&self) -> Option<String> {
        (!self.text.is_empty()).then(|| self.text.clone())
    }

    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn is_clickable(&self) -> bool {
        self.clickable
    }

    fn class_name(&self) -> Option<String> {
        self.class.clone()
    }

    fn parent(&self) -> Option<Node> {
        let parent = self.parent.lock().unwrap().upgrade()?;
        Some(parent as Node)
    }

    fn children(&self) -> Vec<Node> {
        self.children
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.clone() as Node)
            .collect()
    }

    fn perform_click(&self) -> bool {
        self.clicks.fetch_add(1, Ordering::SeqCst);
        !self.refuse_clicks
    }
}

/// Builder handle over a fake node. Configure before attaching.
#[derive(Debug, Clone)]
pub struct FakeNode(Arc<FakeNodeData>);

impl FakeNode {
    pub fn new(text: &str) -> Self {
        Self(Arc::new(FakeNodeData {
            text: text.to_string(),
            ..Default::default()
        }))
    }

    fn data_mut(&mut self) -> &mut FakeNodeData {
        Arc::get_mut(&mut self.0).expect("configure nodes before attaching them")
    }

    pub fn clickable(mut self) -> Self {
        self.data_mut().clickable = true;
        self
    }

    pub fn refusing_clicks(mut self) -> Self {
        self.data_mut().refuse_clicks = true;
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.data_mut().class = Some(class.to_string());
        self
    }

    pub fn bounds(mut self, bounds: Rect) -> Self {
        self.data_mut().bounds = bounds;
        self
    }

    pub fn attach_to(self, parent: &FakeNode) -> Self {
        *self.0.parent.lock().unwrap() = Arc::downgrade(&parent.0);
        parent.0.children.lock().unwrap().push(self.0.clone());
        self
    }

    pub fn node(&self) -> Node {
        self.0.clone()
    }

    pub fn clicks(&self) -> usize {
        self.0.clicks.load(Ordering::SeqCst)
    }
}

/// Tree whose root can be swapped, and whose lookups can be made to miss.
#[derive(Default)]
pub struct FakeTree {
    root: Mutex<Option<FakeNode>>,
    misses: Mutex<VecDeque<String>>,
    lookups: AtomicUsize,
}

impl FakeTree {
    pub fn new(root: FakeNode) -> Self {
        Self {
            root: Mutex::new(Some(root)),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set_root(&self, root: Option<FakeNode>) {
        *self.root.lock().unwrap() = root;
    }

    /// Make the next `times` lookups of `text` find nothing.
    pub fn miss(&self, text: &str, times: usize) {
        let mut misses = self.misses.lock().unwrap();
        misses.extend(std::iter::repeat(text.to_string()).take(times));
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl UiTree for FakeTree {
    fn root(&self) -> Option<Node> {
        self.root.lock().unwrap().as_ref().map(FakeNode::node)
    }

    fn find_all_by_text(&self, root: &Node, literal: &str) -> Vec<Node> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        {
            let mut misses = self.misses.lock().unwrap();
            if let Some(pos) = misses.iter().position(|t| t == literal) {
                misses.remove(pos);
                return Vec::new();
            }
        }
        crate::locator::Descendants::new(root.clone())
            .filter(|n| {
                n.text()
                    .map(|t| t.to_lowercase().contains(&literal.to_lowercase()))
                    .unwrap_or(false)
            })
            .collect()
    }
}

/// Records taps and answers with queued outcomes, `Completed` once drained.
#[derive(Default)]
pub struct FakeGestures {
    taps: Mutex<Vec<(i32, i32)>>,
    outcomes: Mutex<VecDeque<TapOutcome>>,
}

impl FakeGestures {
    pub fn queue(&self, outcome: TapOutcome, times: usize) {
        let mut outcomes = self.outcomes.lock().unwrap();
        outcomes.extend(std::iter::repeat(outcome).take(times));
    }

    pub fn taps(&self) -> Vec<(i32, i32)> {
        self.taps.lock().unwrap().clone()
    }
}

#[async_trait]
impl GestureDispatcher for FakeGestures {
    async fn tap(&self, x: i32, y: i32) -> TapOutcome {
        self.taps.lock().unwrap().push((x, y));
        let outcome = self.outcomes.lock().unwrap().pop_front();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        outcome.unwrap_or(TapOutcome::Completed)
    }
}

pub struct FakeDisplay(DisplaySize);

impl FakeDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self(DisplaySize::new(width, height))
    }
}

impl Display for FakeDisplay {
    fn size(&self) -> DisplaySize {
        self.0
    }
}

#[derive(Default)]
pub struct FakeClipboard {
    text: Mutex<Option<String>>,
    clears: AtomicUsize,
    unavailable: Mutex<bool>,
}

impl FakeClipboard {
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check(&self) -> Result<(), ClipboardError> {
        if *self.unavailable.lock().unwrap() {
            return Err(ClipboardError::Unavailable("no clipboard access".into()));
        }
        Ok(())
    }

    pub fn text(&self) -> Option<String> {
        self.text.lock().unwrap().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl Clipboard for FakeClipboard {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        self.check()?;
        *self.text.lock().unwrap() = Some(text.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        self.check()?;
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.text.lock().unwrap() = None;
        Ok(())
    }
}

/// Keeps the visible layers in insertion order.
#[derive(Default)]
pub struct FakeRenderer {
    visible: Mutex<Vec<Layer>>,
    removed: Mutex<Vec<LayerKind>>,
    fail_removals: Mutex<bool>,
    fail_adds: Mutex<bool>,
}

impl FakeRenderer {
    pub fn visible(&self) -> Vec<LayerKind> {
        self.visible.lock().unwrap().iter().map(Layer::kind).collect()
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.visible.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<LayerKind> {
        self.removed.lock().unwrap().clone()
    }

    pub fn fail_removals(&self, fail: bool) {
        *self.fail_removals.lock().unwrap() = fail;
    }

    pub fn fail_adds(&self, fail: bool) {
        *self.fail_adds.lock().unwrap() = fail;
    }
}

impl OverlayRenderer for FakeRenderer {
    fn add(&self, layer: &Layer) -> Result<(), OverlayError> {
        if *self.fail_adds.lock().unwrap() {
            return Err(OverlayError::Unavailable("no overlay permission".into()));
        }
        self.visible.lock().unwrap().push(layer.clone());
        Ok(())
    }

    fn remove(&self, kind: LayerKind) -> Result<(), OverlayError> {
        self.removed.lock().unwrap().push(kind);
        self.visible.lock().unwrap().retain(|l| l.kind() != kind);
        if *self.fail_removals.lock().unwrap() {
            return Err(OverlayError::Unavailable("window already gone".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    launched: Mutex<Vec<RecordTarget>>,
    aborts: AtomicUsize,
}

impl FakeLauncher {
    pub fn launched(&self) -> Vec<RecordTarget> {
        self.launched.lock().unwrap().clone()
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

impl RecordLauncher for FakeLauncher {
    fn launch(&self, target: RecordTarget) {
        self.launched.lock().unwrap().push(target);
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

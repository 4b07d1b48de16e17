//! Driver - Abstract Browser Automation Trait
//!
//! Everything in Esperar reads and acts through [`Driver`]. The trait is the
//! minimal surface the synchronization engine needs: multi-pattern lookup,
//! attribute/text reads, click, script evaluation and a staleness probe.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Driver (Abstract Trait)                                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐     ┌──────────────────────────┐   │
//! │  │  CdpDriver           │     │  MockDriver              │   │
//! │  │  (feature "browser") │     │  (in-memory DOM, tests)  │   │
//! │  │  chromiumoxide CDP   │     │  node arena + scraper    │   │
//! │  └──────────────────────┘     └──────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads on a detached handle must return [`EsperarError::StaleResource`]
//! instead of failing in some driver-specific way.

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};
use std::rc::Rc;
use std::time::Duration;

use crate::locator::Selector;
use crate::result::{EsperarError, EsperarResult};

/// Element handle for DOM interactions.
///
/// A handle is only valid until the next DOM mutation that detaches the node.
/// Never keep one across a state-changing action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Driver-specific identifier for the element
    pub id: String,
    /// Element tag name
    pub tag_name: String,
}

impl ElementHandle {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag_name: tag_name.into(),
        }
    }
}

/// Abstract driver trait for browser automation.
///
/// All receivers are `&self`; implementations use interior mutability. A
/// driver is bound to one browser session and is not shared across threads.
pub trait Driver {
    /// All elements matching `selector`, in document order
    fn find_all(&self, selector: &Selector) -> EsperarResult<Vec<ElementHandle>>;

    /// Descendants of `parent` matching `selector`, in document order
    fn find_within(
        &self,
        parent: &ElementHandle,
        selector: &Selector,
    ) -> EsperarResult<Vec<ElementHandle>>;

    /// Attribute value, `None` when absent
    fn attribute(&self, handle: &ElementHandle, name: &str) -> EsperarResult<Option<String>>;

    /// Rendered text of the element
    fn text(&self, handle: &ElementHandle) -> EsperarResult<String>;

    /// Whether the element is currently displayed
    fn is_displayed(&self, handle: &ElementHandle) -> EsperarResult<bool>;

    /// Click the element
    fn click(&self, handle: &ElementHandle) -> EsperarResult<()>;

    /// Execute a synchronous script; `args` are exposed as `arguments[i]`
    fn execute(&self, script: &str, args: &[Value]) -> EsperarResult<Value>;

    /// Execute an asynchronous script; the completion callback is passed as
    /// the last argument. Returns `None` when the callback received null or
    /// `timeout` elapsed first.
    fn evaluate_async(
        &self,
        script: &str,
        args: &[Value],
        timeout: Duration,
    ) -> EsperarResult<Option<Value>>;

    /// Whether the handle no longer refers to an attached element
    fn is_stale(&self, handle: &ElementHandle) -> bool;

    /// Current page URL
    fn current_url(&self) -> EsperarResult<String>;

    /// Navigate to URL
    fn navigate(&self, url: &str) -> EsperarResult<()>;
}

// =============================================================================
// MOCK DRIVER
// =============================================================================

/// Hook run by [`MockDriver`] on click or deferred mutation
pub type MockHook = Rc<dyn Fn(&MockDriver)>;

/// Handler for [`Driver::execute`] on a [`MockDriver`]
pub type ScriptHandler = Rc<dyn Fn(&MockDriver, &str, &[Value]) -> EsperarResult<Value>>;

/// Handler for [`Driver::evaluate_async`] on a [`MockDriver`]
pub type AsyncScriptHandler =
    Rc<dyn Fn(&MockDriver, &str, &[Value], Duration) -> EsperarResult<Option<Value>>>;

/// Identifier of a node in a [`MockDriver`] DOM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MockNodeId(u64);

/// Declarative node used to build a [`MockDriver`] DOM
#[derive(Clone)]
pub struct MockNode {
    tag: String,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    text: String,
    visible: bool,
    children: Vec<MockNode>,
    on_click: Option<MockHook>,
}

impl fmt::Debug for MockNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockNode")
            .field("tag", &self.tag)
            .field("classes", &self.classes)
            .field("attributes", &self.attributes)
            .field("text", &self.text)
            .field("visible", &self.visible)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl MockNode {
    /// Create a node with the given tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            classes: Vec::new(),
            attributes: BTreeMap::new(),
            text: String::new(),
            visible: true,
            children: Vec::new(),
            on_click: None,
        }
    }

    /// Add one or more space-separated classes
    #[must_use]
    pub fn class(mut self, classes: &str) -> Self {
        self.classes
            .extend(classes.split_whitespace().map(str::to_string));
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the node's own text
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Mark the node as not displayed
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Append a child node
    #[must_use]
    pub fn child(mut self, child: MockNode) -> Self {
        self.children.push(child);
        self
    }

    /// Run `hook` when this node is clicked
    #[must_use]
    pub fn on_click(mut self, hook: impl Fn(&MockDriver) + 'static) -> Self {
        self.on_click = Some(Rc::new(hook));
        self
    }
}

struct NodeData {
    tag: String,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    text: String,
    visible: bool,
    parent: Option<u64>,
    children: Vec<u64>,
    on_click: Option<MockHook>,
}

struct Dom {
    nodes: HashMap<u64, NodeData>,
    root: u64,
    next_id: u64,
}

impl Dom {
    fn new() -> Self {
        let mut dom = Self {
            nodes: HashMap::new(),
            root: 0,
            next_id: 0,
        };
        dom.root = dom.insert(MockNode::new("body"), None);
        dom
    }

    fn insert(&mut self, node: MockNode, parent: Option<u64>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let MockNode {
            tag,
            classes,
            attributes,
            text,
            visible,
            children,
            on_click,
        } = node;
        let _ = self.nodes.insert(
            id,
            NodeData {
                tag,
                classes,
                attributes,
                text,
                visible,
                parent,
                children: Vec::new(),
                on_click,
            },
        );
        for child in children {
            let child_id = self.insert(child, Some(id));
            if let Some(data) = self.nodes.get_mut(&id) {
                data.children.push(child_id);
            }
        }
        id
    }

    fn drop_subtree(&mut self, id: u64) {
        if let Some(data) = self.nodes.remove(&id) {
            for child in data.children {
                self.drop_subtree(child);
            }
        }
    }

    fn is_attached(&self, id: u64) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == self.root {
                return true;
            }
            current = match self.nodes.get(&node_id) {
                Some(data) => data.parent,
                None => return false,
            };
        }
        false
    }

    fn text_of(&self, id: u64) -> String {
        let Some(data) = self.nodes.get(&id) else {
            return String::new();
        };
        let mut parts = Vec::new();
        if !data.text.is_empty() {
            parts.push(data.text.clone());
        }
        for &child in &data.children {
            let child_text = self.text_of(child);
            if !child_text.is_empty() {
                parts.push(child_text);
            }
        }
        parts.join("\n")
    }

    fn displayed(&self, id: u64) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            match self.nodes.get(&node_id) {
                Some(data) if data.visible => current = data.parent,
                _ => return false,
            }
        }
        true
    }

    fn attribute(&self, id: u64, name: &str) -> Option<String> {
        let data = self.nodes.get(&id)?;
        if name == "class" && !data.classes.is_empty() {
            return Some(data.classes.join(" "));
        }
        data.attributes.get(name).cloned()
    }

    /// Serialize the attached tree as an HTML document. Every element
    /// carries its arena id in [`NODE_ATTR`] so matches map back to nodes.
    fn render(&self) -> String {
        let mut out = String::from("<!DOCTYPE html><html><head></head>");
        self.render_node(self.root, &mut out);
        out.push_str("</html>");
        out
    }

    fn render_node(&self, id: u64, out: &mut String) {
        let Some(data) = self.nodes.get(&id) else {
            return;
        };
        let _ = write!(out, "<{} {NODE_ATTR}=\"{id}\"", data.tag);
        if let Some(class) = self.attribute(id, "class") {
            let _ = write!(out, " class=\"{}\"", escape_markup(&class, true));
        }
        for (name, value) in &data.attributes {
            if name != "class" && name != NODE_ATTR {
                let _ = write!(out, " {name}=\"{}\"", escape_markup(value, true));
            }
        }
        out.push('>');
        if VOID_ELEMENTS.contains(&data.tag.as_str()) {
            return;
        }
        out.push_str(&escape_markup(&data.text, false));
        for &child in &data.children {
            self.render_node(child, out);
        }
        let _ = write!(out, "</{}>", data.tag);
    }

    /// Attached nodes matching `selector` in document order, limited to
    /// descendants of `scope` when given
    fn select(&self, scope: Option<u64>, selector: &Selector) -> EsperarResult<Vec<u64>> {
        let css = selector.css_part();
        let compiled = scraper::Selector::parse(&css)
            .map_err(|_| EsperarError::UnsupportedSelector { selector: css.clone() })?;
        let document = Html::parse_document(&self.render());

        let found: Vec<u64> = match scope {
            None => document.select(&compiled).filter_map(node_id).collect(),
            Some(parent) => {
                let anchor = scraper::Selector::parse(&format!("[{NODE_ATTR}='{parent}']"))
                    .map_err(|_| EsperarError::malformed(format!("node id {parent}")))?;
                document
                    .select(&anchor)
                    .next()
                    .map(|root| root.select(&compiled).filter_map(node_id).collect())
                    .unwrap_or_default()
            }
        };

        Ok(match selector.text_filter() {
            Some(needle) => found
                .into_iter()
                .filter(|&id| self.text_of(id).contains(needle.trim()))
                .collect(),
            None => found,
        })
    }
}

/// Attribute linking rendered elements back to arena nodes
const NODE_ATTR: &str = "data-esperar-node";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn node_id(element: ElementRef<'_>) -> Option<u64> {
    element.value().attr(NODE_ATTR)?.parse().ok()
}

fn escape_markup(raw: &str, in_attribute: bool) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' if in_attribute => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// In-memory DOM implementing [`Driver`] for unit and integration tests.
///
/// Removing or replacing a node detaches it: every handle to it, or to any of
/// its descendants, reports stale from then on. Click hooks and deferred hooks
/// mutate the DOM the way an asynchronously rendering front end would.
pub struct MockDriver {
    dom: RefCell<Dom>,
    url: RefCell<String>,
    deferred: RefCell<Vec<(usize, MockHook)>>,
    script_handler: RefCell<Option<ScriptHandler>>,
    async_handler: RefCell<Option<AsyncScriptHandler>>,
    clicks: Cell<usize>,
    call_history: RefCell<Vec<String>>,
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("url", &self.url.borrow())
            .field("nodes", &self.dom.borrow().nodes.len())
            .field("clicks", &self.clicks.get())
            .finish_non_exhaustive()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a driver with an empty `<body>`
    #[must_use]
    pub fn new() -> Self {
        Self {
            dom: RefCell::new(Dom::new()),
            url: RefCell::new(String::from("about:blank")),
            deferred: RefCell::new(Vec::new()),
            script_handler: RefCell::new(None),
            async_handler: RefCell::new(None),
            clicks: Cell::new(0),
            call_history: RefCell::new(Vec::new()),
        }
    }

    /// The `<body>` node
    #[must_use]
    pub fn body(&self) -> MockNodeId {
        MockNodeId(self.dom.borrow().root)
    }

    /// Append a node tree under `<body>`
    pub fn append(&self, node: MockNode) -> MockNodeId {
        self.append_to(self.body(), node)
    }

    /// Append a node tree under `parent`
    pub fn append_to(&self, parent: MockNodeId, node: MockNode) -> MockNodeId {
        let mut dom = self.dom.borrow_mut();
        let id = dom.insert(node, Some(parent.0));
        if let Some(data) = dom.nodes.get_mut(&parent.0) {
            data.children.push(id);
        }
        MockNodeId(id)
    }

    /// Detach and drop a node and its subtree
    pub fn remove(&self, id: MockNodeId) {
        let mut dom = self.dom.borrow_mut();
        let parent = dom.nodes.get(&id.0).and_then(|d| d.parent);
        if let Some(parent) = parent {
            if let Some(data) = dom.nodes.get_mut(&parent) {
                data.children.retain(|&c| c != id.0);
            }
        }
        dom.drop_subtree(id.0);
    }

    /// Replace a node with a fresh tree at the same position.
    ///
    /// Handles to the old node go stale; the returned id is the new node.
    pub fn replace(&self, id: MockNodeId, node: MockNode) -> Option<MockNodeId> {
        let mut dom = self.dom.borrow_mut();
        let parent = dom.nodes.get(&id.0).and_then(|d| d.parent)?;
        let position = dom
            .nodes
            .get(&parent)
            .and_then(|d| d.children.iter().position(|&c| c == id.0))?;
        dom.drop_subtree(id.0);
        let new_id = dom.insert(node, Some(parent));
        if let Some(data) = dom.nodes.get_mut(&parent) {
            data.children[position] = new_id;
        }
        Some(MockNodeId(new_id))
    }

    /// Set a node's own text
    pub fn set_text(&self, id: MockNodeId, text: impl Into<String>) {
        if let Some(data) = self.dom.borrow_mut().nodes.get_mut(&id.0) {
            data.text = text.into();
        }
    }

    /// Add a class to a node
    pub fn add_class(&self, id: MockNodeId, class: &str) {
        if let Some(data) = self.dom.borrow_mut().nodes.get_mut(&id.0) {
            if !data.classes.iter().any(|c| c == class) {
                data.classes.push(class.to_string());
            }
        }
    }

    /// Remove a class from a node
    pub fn remove_class(&self, id: MockNodeId, class: &str) {
        if let Some(data) = self.dom.borrow_mut().nodes.get_mut(&id.0) {
            data.classes.retain(|c| c != class);
        }
    }

    /// Set an attribute on a node
    pub fn set_attr(&self, id: MockNodeId, name: &str, value: &str) {
        if let Some(data) = self.dom.borrow_mut().nodes.get_mut(&id.0) {
            let _ = data.attributes.insert(name.to_string(), value.to_string());
        }
    }

    /// Show or hide a node
    pub fn set_visible(&self, id: MockNodeId, visible: bool) {
        if let Some(data) = self.dom.borrow_mut().nodes.get_mut(&id.0) {
            data.visible = visible;
        }
    }

    /// Attached nodes matching a CSS selector, in document order.
    ///
    /// Empty when `css` does not parse; [`Driver::find_all`] reports that
    /// case as [`EsperarError::UnsupportedSelector`].
    #[must_use]
    pub fn query(&self, css: &str) -> Vec<MockNodeId> {
        self.dom
            .borrow()
            .select(None, &Selector::css(css))
            .map(|ids| ids.into_iter().map(MockNodeId).collect())
            .unwrap_or_default()
    }

    /// Handle for a node
    #[must_use]
    pub fn handle(&self, id: MockNodeId) -> ElementHandle {
        let tag = self
            .dom
            .borrow()
            .nodes
            .get(&id.0)
            .map(|d| d.tag.clone())
            .unwrap_or_default();
        ElementHandle::new(id.0.to_string(), tag)
    }

    /// Run `hook` once `lookups` further `find_all` calls have been made.
    ///
    /// Models rendering that lands a few polls after the triggering action.
    pub fn defer(&self, lookups: usize, hook: impl Fn(&MockDriver) + 'static) {
        self.deferred.borrow_mut().push((lookups, Rc::new(hook)));
    }

    /// Install the handler for [`Driver::execute`]
    pub fn on_script(
        &self,
        handler: impl Fn(&MockDriver, &str, &[Value]) -> EsperarResult<Value> + 'static,
    ) {
        *self.script_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Install the handler for [`Driver::evaluate_async`]
    pub fn on_async_script(
        &self,
        handler: impl Fn(&MockDriver, &str, &[Value], Duration) -> EsperarResult<Option<Value>>
            + 'static,
    ) {
        *self.async_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Number of successful clicks
    #[must_use]
    pub fn click_count(&self) -> usize {
        self.clicks.get()
    }

    /// Call history for verification
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.call_history.borrow().clone()
    }

    /// Check if a method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.call_history
            .borrow()
            .iter()
            .any(|c| c.starts_with(method))
    }

    fn record(&self, call: String) {
        self.call_history.borrow_mut().push(call);
    }

    fn tick_deferred(&self) {
        let due: Vec<MockHook> = {
            let mut deferred = self.deferred.borrow_mut();
            let mut due = Vec::new();
            deferred.retain_mut(|(remaining, hook)| {
                if *remaining == 0 {
                    due.push(Rc::clone(hook));
                    false
                } else {
                    *remaining -= 1;
                    true
                }
            });
            due
        };
        for hook in due {
            hook(self);
        }
    }

    fn live_id(&self, handle: &ElementHandle) -> EsperarResult<u64> {
        let id = handle
            .id
            .parse::<u64>()
            .map_err(|_| EsperarError::stale(format!("foreign handle {}", handle.id)))?;
        if self.dom.borrow().is_attached(id) {
            Ok(id)
        } else {
            Err(EsperarError::stale(format!(
                "<{}> #{} detached",
                handle.tag_name, handle.id
            )))
        }
    }
}

impl Driver for MockDriver {
    fn find_all(&self, selector: &Selector) -> EsperarResult<Vec<ElementHandle>> {
        self.record(format!("find_all:{selector}"));
        self.tick_deferred();
        let found = self.dom.borrow().select(None, selector)?;
        Ok(found
            .into_iter()
            .map(|id| self.handle(MockNodeId(id)))
            .collect())
    }

    fn find_within(
        &self,
        parent: &ElementHandle,
        selector: &Selector,
    ) -> EsperarResult<Vec<ElementHandle>> {
        let parent_id = self.live_id(parent)?;
        let found = self.dom.borrow().select(Some(parent_id), selector)?;
        Ok(found
            .into_iter()
            .map(|id| self.handle(MockNodeId(id)))
            .collect())
    }

    fn attribute(&self, handle: &ElementHandle, name: &str) -> EsperarResult<Option<String>> {
        let id = self.live_id(handle)?;
        Ok(self.dom.borrow().attribute(id, name))
    }

    fn text(&self, handle: &ElementHandle) -> EsperarResult<String> {
        let id = self.live_id(handle)?;
        Ok(self.dom.borrow().text_of(id))
    }

    fn is_displayed(&self, handle: &ElementHandle) -> EsperarResult<bool> {
        let id = self.live_id(handle)?;
        Ok(self.dom.borrow().displayed(id))
    }

    fn click(&self, handle: &ElementHandle) -> EsperarResult<()> {
        let id = self.live_id(handle)?;
        let hook = {
            let dom = self.dom.borrow();
            if !dom.displayed(id) {
                return Err(EsperarError::driver(format!(
                    "element #{} is not interactable",
                    handle.id
                )));
            }
            dom.nodes.get(&id).and_then(|d| d.on_click.clone())
        };
        self.record(format!("click:{}", handle.id));
        self.clicks.set(self.clicks.get() + 1);
        if let Some(hook) = hook {
            hook(self);
        }
        Ok(())
    }

    fn execute(&self, script: &str, args: &[Value]) -> EsperarResult<Value> {
        self.record("execute".to_string());
        let handler = self.script_handler.borrow().clone();
        match handler {
            Some(handler) => handler(self, script, args),
            None => Err(EsperarError::script("no script handler installed")),
        }
    }

    fn evaluate_async(
        &self,
        script: &str,
        args: &[Value],
        timeout: Duration,
    ) -> EsperarResult<Option<Value>> {
        self.record("evaluate_async".to_string());
        let handler = self.async_handler.borrow().clone();
        match handler {
            Some(handler) => handler(self, script, args, timeout),
            None => Err(EsperarError::script("no async script handler installed")),
        }
    }

    fn is_stale(&self, handle: &ElementHandle) -> bool {
        self.live_id(handle).is_err()
    }

    fn current_url(&self) -> EsperarResult<String> {
        Ok(self.url.borrow().clone())
    }

    fn navigate(&self, url: &str) -> EsperarResult<()> {
        self.record(format!("navigate:{url}"));
        *self.url.borrow_mut() = url.to_string();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod element_handle_tests {
        use super::*;

        #[test]
        fn test_element_handle_creation() {
            let elem = ElementHandle::new("btn-1", "button");
            assert_eq!(elem.id, "btn-1");
            assert_eq!(elem.tag_name, "button");
        }
    }

    mod css_selector_tests {
        use super::*;

        fn page() -> MockDriver {
            let driver = MockDriver::new();
            driver.append(
                MockNode::new("div")
                    .class("border rounded")
                    .attr("data-default", "true")
                    .child(
                        MockNode::new("div")
                            .class("address__summary")
                            .child(MockNode::new("span").class("full-name").text("Anna Han")),
                    )
                    .child(MockNode::new("a").attr("href", "/account/edit").text("Edit")),
            );
            driver.append(MockNode::new("div").attr("aria-live", "polite").text("Saved!"));
            driver
        }

        #[test]
        fn test_compound_classes() {
            let driver = page();
            assert_eq!(driver.query(".border.rounded").len(), 1);
            assert_eq!(driver.query(".border.missing").len(), 0);
        }

        #[test]
        fn test_alternatives_in_document_order() {
            let driver = page();
            let found = driver.query("[aria-live='polite'], .border.rounded");
            assert_eq!(found.len(), 2);
            assert!(found[0] < found[1]);
        }

        #[test]
        fn test_descendant_chain() {
            let driver = page();
            assert_eq!(driver.query(".address__summary .full-name").len(), 1);
            assert_eq!(driver.query(".address__summary > .full-name").len(), 1);
            assert_eq!(driver.query("a .full-name").len(), 0);
        }

        #[test]
        fn test_attribute_operators() {
            let driver = page();
            assert_eq!(driver.query("[data-default]").len(), 1);
            assert_eq!(driver.query("a[href*='/account']").len(), 1);
            assert_eq!(driver.query("a[href='/account']").len(), 0);
            assert_eq!(driver.query("[class~='rounded']").len(), 1);
        }

        #[test]
        fn test_tag_and_universal() {
            let driver = page();
            assert_eq!(driver.query("body").len(), 1);
            assert_eq!(driver.query("span").len(), 1);
            assert!(driver.query("*").len() >= 6);
        }

        #[test]
        fn test_css_with_text() {
            let driver = page();
            let found = driver
                .find_all(&Selector::css_with_text("a", "Edit"))
                .unwrap();
            assert_eq!(found.len(), 1);
            let none = driver
                .find_all(&Selector::css_with_text("a", "Make default"))
                .unwrap();
            assert!(none.is_empty());
        }

        #[test]
        fn test_child_combinator_requires_direct_parent() {
            let driver = MockDriver::new();
            driver.append(
                MockNode::new("div")
                    .class("card")
                    .child(MockNode::new("section").child(MockNode::new("span").text("x"))),
            );
            assert!(driver.query(".card > span").is_empty());
            assert_eq!(driver.query(".card > section > span").len(), 1);
            assert_eq!(driver.query(".card span").len(), 1);
        }

        #[test]
        fn test_negation_pseudo_class() {
            let driver = MockDriver::new();
            driver.append(MockNode::new("div").class("toast hidden").text("old"));
            assert!(driver.query(".toast:not(.hidden)").is_empty());

            let shown = driver.append(MockNode::new("div").class("toast").text("new"));
            assert_eq!(driver.query(".toast:not(.hidden)"), vec![shown]);
        }

        #[test]
        fn test_unparsable_selector_is_unsupported() {
            let driver = page();
            let err = driver.find_all(&Selector::css("div[")).unwrap_err();
            assert!(matches!(
                err,
                EsperarError::UnsupportedSelector { ref selector } if selector == "div["
            ));
            assert!(!err.is_transient());
            assert!(driver.query("div[").is_empty());

            let card = driver.handle(driver.query(".border.rounded")[0]);
            assert!(matches!(
                driver.find_within(&card, &Selector::css("a[href")),
                Err(EsperarError::UnsupportedSelector { .. })
            ));
        }

        #[test]
        fn test_find_within_stays_inside_parent() {
            let driver = page();
            driver.append(MockNode::new("span").class("full-name").text("Outside"));
            let card = driver.handle(driver.query(".border.rounded")[0]);
            let names = driver.find_within(&card, &Selector::css(".full-name")).unwrap();
            assert_eq!(names.len(), 1);
            assert_eq!(driver.text(&names[0]).unwrap(), "Anna Han");
            assert_eq!(driver.find_all(&Selector::css(".full-name")).unwrap().len(), 2);
        }

        #[test]
        fn test_markup_in_text_and_attributes_is_escaped() {
            let driver = MockDriver::new();
            driver.append(
                MockNode::new("div")
                    .attr("title", "say \"hi\" & <bye>")
                    .text("<span class=\"x\">not a tag</span>"),
            );
            assert!(driver.query("span").is_empty());
            assert!(driver.query(".x").is_empty());
            assert_eq!(driver.query("[title='say \"hi\" & <bye>']").len(), 1);
        }

        #[test]
        fn test_input_children_are_not_swallowed() {
            let driver = MockDriver::new();
            driver.append(
                MockNode::new("form")
                    .child(MockNode::new("input").attr("name", "phone"))
                    .child(MockNode::new("p").class("text-critical").text("Invalid phone number")),
            );
            assert_eq!(driver.query("form > input[name='phone']").len(), 1);
            assert_eq!(driver.query("form > p.text-critical").len(), 1);
        }
    }

    mod staleness_tests {
        use super::*;

        #[test]
        fn test_removed_node_is_stale() {
            let driver = MockDriver::new();
            let id = driver.append(MockNode::new("div").text("x"));
            let handle = driver.handle(id);
            assert!(!driver.is_stale(&handle));

            driver.remove(id);
            assert!(driver.is_stale(&handle));
            assert!(driver.text(&handle).unwrap_err().is_stale());
            assert!(driver.attribute(&handle, "class").unwrap_err().is_stale());
            assert!(driver.click(&handle).unwrap_err().is_stale());
        }

        #[test]
        fn test_replaced_subtree_descendants_are_stale() {
            let driver = MockDriver::new();
            let card = driver.append(
                MockNode::new("div")
                    .class("card")
                    .child(MockNode::new("span").class("name").text("Old")),
            );
            let name = driver.handle(driver.query(".name")[0]);

            let new_card = driver
                .replace(card, MockNode::new("div").class("card").text("New"))
                .unwrap();
            assert!(driver.is_stale(&name));
            assert!(!driver.is_stale(&driver.handle(new_card)));
            assert_eq!(driver.query(".card"), vec![new_card]);
        }

        #[test]
        fn test_foreign_handle_is_stale() {
            let driver = MockDriver::new();
            assert!(driver.is_stale(&ElementHandle::new("cdp-123", "div")));
        }
    }

    mod interaction_tests {
        use super::*;

        #[test]
        fn test_click_runs_hook() {
            let driver = MockDriver::new();
            let target = driver.append(MockNode::new("span").text("before"));
            driver.append(
                MockNode::new("a")
                    .text("Go")
                    .on_click(move |dom| dom.set_text(target, "after")),
            );

            let link = driver
                .find_all(&Selector::css_with_text("a", "Go"))
                .unwrap();
            driver.click(&link[0]).unwrap();
            assert_eq!(driver.click_count(), 1);
            assert_eq!(driver.text(&driver.handle(target)).unwrap(), "after");
            assert!(driver.was_called("click"));
        }

        #[test]
        fn test_click_hidden_fails() {
            let driver = MockDriver::new();
            let id = driver.append(MockNode::new("button").hidden());
            let err = driver.click(&driver.handle(id)).unwrap_err();
            assert!(matches!(err, EsperarError::Driver { .. }));
            assert_eq!(driver.click_count(), 0);
        }

        #[test]
        fn test_hidden_ancestor_hides_descendant() {
            let driver = MockDriver::new();
            let parent = driver.append(MockNode::new("div").child(MockNode::new("p").text("x")));
            let p = driver.handle(driver.query("p")[0]);
            assert!(driver.is_displayed(&p).unwrap());
            driver.set_visible(parent, false);
            assert!(!driver.is_displayed(&p).unwrap());
        }

        #[test]
        fn test_deferred_hook_lands_after_lookups() {
            let driver = MockDriver::new();
            driver.defer(2, |dom| {
                let _ = dom.append(MockNode::new("div").class("toast").text("Saved"));
            });
            let toast = Selector::css(".toast");
            assert!(driver.find_all(&toast).unwrap().is_empty());
            assert!(driver.find_all(&toast).unwrap().is_empty());
            assert_eq!(driver.find_all(&toast).unwrap().len(), 1);
        }

        #[test]
        fn test_text_concatenates_descendants() {
            let driver = MockDriver::new();
            let id = driver.append(
                MockNode::new("div")
                    .text("Title")
                    .child(MockNode::new("span").text("Body")),
            );
            assert_eq!(driver.text(&driver.handle(id)).unwrap(), "Title\nBody");
        }

        #[test]
        fn test_class_attribute_reflects_mutation() {
            let driver = MockDriver::new();
            let id = driver.append(MockNode::new("div").class("card"));
            driver.add_class(id, "border-green-700");
            assert_eq!(
                driver.attribute(&driver.handle(id), "class").unwrap(),
                Some("card border-green-700".to_string())
            );
            driver.remove_class(id, "card");
            assert_eq!(driver.query(".card").len(), 0);
        }

        #[test]
        fn test_scripts_without_handler_fail() {
            let driver = MockDriver::new();
            assert!(driver.execute("return 1;", &[]).is_err());
            assert!(driver
                .evaluate_async("cb(1)", &[], Duration::from_millis(5))
                .is_err());
        }

        #[test]
        fn test_navigate_records_url() {
            let driver = MockDriver::new();
            driver.navigate("https://shop.test/account").unwrap();
            assert_eq!(driver.current_url().unwrap(), "https://shop.test/account");
            assert!(driver.was_called("navigate"));
        }
    }
}

//! Boundary to the embedded visual editor.
//!
//! The page model never reaches into the editor directly: everything goes
//! through [`EditorHandle`] for the component tree and styles, and through
//! [`PreviewFrame`] for the live preview document the editor renders into.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::SessionError;
use crate::model::ComponentKind;

/// One style rule as the editor's style manager holds it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyleRule {
    pub selector: String,
    pub declarations: Vec<(String, String)>,
    /// The rule's own serializer output, when the editor offers one.
    pub serialized: Option<String>,
}

/// The editor's root element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WrapperStyle {
    pub element_id: String,
    pub declarations: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentNode {
    pub id: String,
    pub tag: String,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub style: Vec<(String, String)>,
    pub kind: ComponentKind,
}

impl ComponentNode {
    pub fn new(
        id: impl Into<String>,
        tag: impl Into<String>,
        classes: Vec<String>,
        attributes: BTreeMap<String, String>,
        style: Vec<(String, String)>,
    ) -> Self {
        let tag = tag.into();
        let kind = ComponentKind::classify(&tag, &attributes);
        Self {
            id: id.into(),
            tag,
            classes,
            attributes,
            style,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptLoad {
    Loaded,
    Failed(String),
    TimedOut,
    /// Started without waiting for completion (`async`/`defer`).
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalScript {
    pub src: String,
    pub script_type: Option<String>,
    pub async_load: bool,
    pub defer: bool,
}

pub trait PreviewFrame {
    fn is_ready(&self) -> bool;
    fn set_base_href(&mut self, href: &str);
    /// Appends a `<script src>`; when `wait` is set, blocks until load, error or `timeout`.
    fn load_external_script(
        &mut self,
        script: &ExternalScript,
        wait: bool,
        timeout: Duration,
    ) -> ScriptLoad;
    fn append_inline_script(&mut self, content: &str, script_type: Option<&str>);
    fn dispatch_event(&mut self, name: &str);
    fn has_global_function(&self, name: &str) -> bool;
    fn call_global_function(&mut self, name: &str) -> Result<(), String>;
    /// Replaces the `<style>` tagged with `marker`, creating it on first use.
    fn upsert_style(&mut self, marker: &str, css: &str);
    fn ensure_stylesheet_link(&mut self, href: &str);
}

pub trait EditorHandle {
    fn html(&self) -> String;
    /// Standard generated-stylesheet accessor; `None` when the editor cannot produce one.
    fn generated_css(&self) -> Option<String>;
    fn style_rules(&self) -> Vec<StyleRule>;
    fn wrapper(&self) -> Option<WrapperStyle>;
    fn components(&self) -> Vec<ComponentNode>;
    fn set_components(&mut self, html: &str);
    fn set_style(&mut self, css: &str);
    fn frame(&mut self) -> Option<&mut dyn PreviewFrame>;
}

/// Retries `connect` at the given delays until an editor comes up.
pub fn attach_editor<E, F>(
    mut connect: F,
    delays: &[Duration],
    clock: &dyn Clock,
) -> Result<E, SessionError>
where
    F: FnMut() -> Option<E>,
{
    for delay in delays {
        if !delay.is_zero() {
            clock.sleep(*delay);
        }
        if let Some(editor) = connect() {
            return Ok(editor);
        }
    }
    tracing::error!(attempts = delays.len(), "editor container never became available");
    Err(SessionError::EditorUnavailable {
        attempts: delays.len(),
    })
}

/// Headless editor keeping the tree as a string; used by the CLI and in tests.
#[derive(Debug, Default)]
pub struct MemoryEditor {
    pub html: String,
    pub css: String,
    pub generated_css: Option<String>,
    pub rules: Vec<StyleRule>,
    pub wrapper: Option<WrapperStyle>,
    pub components: Vec<ComponentNode>,
    pub frame: Option<MemoryFrame>,
    pub set_components_calls: usize,
}

impl MemoryEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(frame: MemoryFrame) -> Self {
        Self {
            frame: Some(frame),
            ..Self::default()
        }
    }
}

impl EditorHandle for MemoryEditor {
    fn html(&self) -> String {
        self.html.clone()
    }

    fn generated_css(&self) -> Option<String> {
        self.generated_css
            .clone()
            .or_else(|| Some(self.css.clone()).filter(|css| !css.is_empty()))
    }

    fn style_rules(&self) -> Vec<StyleRule> {
        self.rules.clone()
    }

    fn wrapper(&self) -> Option<WrapperStyle> {
        self.wrapper.clone()
    }

    fn components(&self) -> Vec<ComponentNode> {
        self.components.clone()
    }

    fn set_components(&mut self, html: &str) {
        self.html = html.to_string();
        self.generated_css = None;
        self.set_components_calls += 1;
    }

    fn set_style(&mut self, css: &str) {
        self.css = css.to_string();
    }

    fn frame(&mut self) -> Option<&mut dyn PreviewFrame> {
        self.frame.as_mut().map(|frame| frame as &mut dyn PreviewFrame)
    }
}

/// Records every injection so callers can inspect what reached the frame.
#[derive(Debug, Default)]
pub struct MemoryFrame {
    pub ready_after_checks: usize,
    pub readiness_checks: std::cell::Cell<usize>,
    pub base_href: Option<String>,
    pub loaded_scripts: Vec<String>,
    pub inline_scripts: Vec<String>,
    pub events: Vec<String>,
    pub globals: BTreeMap<String, Result<(), String>>,
    pub called: Vec<String>,
    pub styles: BTreeMap<String, String>,
    pub style_writes: usize,
    pub links: Vec<String>,
    pub script_outcomes: BTreeMap<String, ScriptLoad>,
}

impl MemoryFrame {
    pub fn ready() -> Self {
        Self::default()
    }

    /// Frame reporting not-ready for its first `checks` readiness checks.
    pub fn ready_after(checks: usize) -> Self {
        Self {
            ready_after_checks: checks,
            ..Self::default()
        }
    }
}

impl PreviewFrame for MemoryFrame {
    fn is_ready(&self) -> bool {
        let seen = self.readiness_checks.get();
        self.readiness_checks.set(seen + 1);
        seen >= self.ready_after_checks
    }

    fn set_base_href(&mut self, href: &str) {
        self.base_href = Some(href.to_string());
    }

    fn load_external_script(
        &mut self,
        script: &ExternalScript,
        wait: bool,
        _timeout: Duration,
    ) -> ScriptLoad {
        self.loaded_scripts.push(script.src.clone());
        let outcome = self
            .script_outcomes
            .get(&script.src)
            .cloned()
            .unwrap_or(ScriptLoad::Loaded);
        if wait { outcome } else { ScriptLoad::Detached }
    }

    fn append_inline_script(&mut self, content: &str, _script_type: Option<&str>) {
        self.inline_scripts.push(content.to_string());
    }

    fn dispatch_event(&mut self, name: &str) {
        self.events.push(name.to_string());
    }

    fn has_global_function(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    fn call_global_function(&mut self, name: &str) -> Result<(), String> {
        self.called.push(name.to_string());
        self.globals
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(format!("{name} is not defined")))
    }

    fn upsert_style(&mut self, marker: &str, css: &str) {
        self.styles.insert(marker.to_string(), css.to_string());
        self.style_writes += 1;
    }

    fn ensure_stylesheet_link(&mut self, href: &str) {
        if !self.links.iter().any(|link| link == href) {
            self.links.push(href.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn attach_retries_until_editor_appears() {
        let clock = ManualClock::new(0);
        let mut attempts = 0;
        let delays = [Duration::ZERO, Duration::from_millis(100), Duration::from_millis(200)];
        let editor = attach_editor(
            || {
                attempts += 1;
                (attempts == 3).then(MemoryEditor::new)
            },
            &delays,
            &clock,
        )
        .expect("editor");
        assert_eq!(editor.set_components_calls, 0);
        assert_eq!(clock.now_millis(), 300);
    }

    #[test]
    fn attach_gives_up_with_blocking_error() {
        let clock = ManualClock::new(0);
        let delays = [Duration::ZERO, Duration::from_millis(50)];
        let err = attach_editor(|| None::<MemoryEditor>, &delays, &clock)
            .expect_err("should fail");
        assert!(matches!(err, SessionError::EditorUnavailable { attempts: 2 }));
    }

    #[test]
    fn components_are_classified_on_construction() {
        let mut attrs = BTreeMap::new();
        attrs.insert("href".to_string(), "#about".to_string());
        let node = ComponentNode::new("c1", "a", Vec::new(), attrs, Vec::new());
        assert_eq!(node.kind.page_target(), Some("#about"));
    }
}

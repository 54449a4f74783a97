use crate::dashboard::control::ControlAction;
use crate::dashboard::dashboard::RootHandle;
use crate::dashboard::plugins::TopicBusPlugin;
use crate::dashboard::timer::VisibilitySignal;
use eframe::egui;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

mod clock;
mod countdown;
mod embedded_app;
mod media_player;
mod news;

pub use clock::{ClockConfig, ClockWidget};
pub use countdown::{parse_duration, CountdownConfig, CountdownWidget, TimerSync};
pub use embedded_app::{AppState, EmbeddedAppConfig, EmbeddedAppWidget};
pub use media_player::{MediaPlayerConfig, MediaPlayerWidget, PlayerBackend, ProcessPlayer};
pub use news::{NewsConfig, NewsItem, NewsSource, NewsWidget, NextcloudNews};

/// Type names handled by the engine itself rather than the registry.
pub const LAYOUT_TYPES: [&str; 4] = ["container", "splitter", "groupbox", "tabs"];

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Widget trait implemented by every node of the composition tree.
///
/// Everything except `render` is optional. Widgets live on the update thread
/// only; anything slow belongs in a [`BackgroundWorker`](crate::dashboard::worker::BackgroundWorker).
pub trait Widget: AsAny {
    fn render(&mut self, ui: &mut egui::Ui);

    /// Called once per frame before rendering.
    fn tick(&mut self, _now: Instant) {}

    /// Shown/hidden notifier, for widgets that react to their visibility.
    fn visibility(&self) -> Option<&VisibilitySignal> {
        None
    }

    /// Fired once after the whole tree exists.
    fn start(&mut self) {}

    fn stop(&mut self) {}

    /// Direct children and whether each one is currently shown by this widget.
    fn children(&self) -> Vec<(WidgetRef, bool)> {
        Vec::new()
    }

    /// Returns `true` if the action was handled.
    fn on_control(&mut self, _action: &ControlAction) -> bool {
        false
    }

    /// Earliest instant at which `tick` has work to do.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }
}

/// Non-visual unit composed at the root level only.
pub trait Plugin: AsAny {
    fn start_plugin(&mut self) -> anyhow::Result<()>;

    fn stop_plugin(&mut self);

    fn tick(&mut self, _now: Instant) {}
}

pub type WidgetRef = Rc<RefCell<dyn Widget>>;
pub type PluginRef = Rc<RefCell<dyn Plugin>>;

/// Why a registered constructor did not produce an instance.
pub(crate) enum CtorError {
    Options(serde_json::Error),
    Failed(anyhow::Error),
}

type Ctor<R> = Rc<dyn Fn(Value, Option<RootHandle>) -> Result<R, CtorError>>;

fn bind<C: DeserializeOwned>(options: Value) -> Result<C, CtorError> {
    serde_json::from_value::<C>(options).map_err(CtorError::Options)
}

fn require_root(root: Option<RootHandle>) -> Result<RootHandle, CtorError> {
    root.ok_or_else(|| CtorError::Failed(anyhow::anyhow!("dashboard root is not available")))
}

/// Descriptor for building widgets from node options.
#[derive(Clone)]
pub struct WidgetDescriptor {
    ctor: Ctor<WidgetRef>,
    wants_root: bool,
}

pub type WidgetFactory = WidgetDescriptor;

impl WidgetDescriptor {
    pub fn new<T, C>(build: impl Fn(C) -> anyhow::Result<T> + 'static) -> Self
    where
        T: Widget,
        C: DeserializeOwned + 'static,
    {
        Self {
            ctor: Rc::new(move |options, _root| {
                let widget = build(bind(options)?).map_err(CtorError::Failed)?;
                Ok(Rc::new(RefCell::new(widget)) as WidgetRef)
            }),
            wants_root: false,
        }
    }

    /// Constructor that also receives a handle to the dashboard root.
    pub fn with_root<T, C>(build: impl Fn(C, RootHandle) -> anyhow::Result<T> + 'static) -> Self
    where
        T: Widget,
        C: DeserializeOwned + 'static,
    {
        Self {
            ctor: Rc::new(move |options, root| {
                let cfg = bind(options)?;
                let widget = build(cfg, require_root(root)?).map_err(CtorError::Failed)?;
                Ok(Rc::new(RefCell::new(widget)) as WidgetRef)
            }),
            wants_root: true,
        }
    }

    pub fn wants_root(&self) -> bool {
        self.wants_root
    }

    pub(crate) fn create(
        &self,
        options: Value,
        root: Option<RootHandle>,
    ) -> Result<WidgetRef, CtorError> {
        (self.ctor)(options, root)
    }
}

#[derive(Clone)]
pub struct PluginDescriptor {
    ctor: Ctor<PluginRef>,
    wants_root: bool,
}

impl PluginDescriptor {
    pub fn new<T, C>(build: impl Fn(C) -> anyhow::Result<T> + 'static) -> Self
    where
        T: Plugin,
        C: DeserializeOwned + 'static,
    {
        Self {
            ctor: Rc::new(move |options, _root| {
                let plugin = build(bind(options)?).map_err(CtorError::Failed)?;
                Ok(Rc::new(RefCell::new(plugin)) as PluginRef)
            }),
            wants_root: false,
        }
    }

    pub fn with_root<T, C>(build: impl Fn(C, RootHandle) -> anyhow::Result<T> + 'static) -> Self
    where
        T: Plugin,
        C: DeserializeOwned + 'static,
    {
        Self {
            ctor: Rc::new(move |options, root| {
                let cfg = bind(options)?;
                let plugin = build(cfg, require_root(root)?).map_err(CtorError::Failed)?;
                Ok(Rc::new(RefCell::new(plugin)) as PluginRef)
            }),
            wants_root: true,
        }
    }

    pub fn wants_root(&self) -> bool {
        self.wants_root
    }

    pub(crate) fn create(
        &self,
        options: Value,
        root: Option<RootHandle>,
    ) -> Result<PluginRef, CtorError> {
        (self.ctor)(options, root)
    }
}

#[derive(Clone)]
enum Registered {
    Widget(WidgetDescriptor),
    Plugin(PluginDescriptor),
}

/// What a `type` name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Layout,
    Widget,
    Plugin,
}

#[derive(Clone, Default)]
pub struct WidgetRegistry {
    map: HashMap<String, Registered>,
}

impl WidgetRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self::default();
        reg.register("clock", WidgetFactory::new(ClockWidget::new));
        reg.register("timer", WidgetFactory::with_root(CountdownWidget::new));
        reg.register("news", WidgetFactory::with_root(NewsWidget::new));
        reg.register("media_player", WidgetFactory::with_root(MediaPlayerWidget::new));
        reg.register("embedded_app", WidgetFactory::new(EmbeddedAppWidget::new));
        reg.register_plugin("topic_bus", PluginDescriptor::with_root(TopicBusPlugin::new));
        reg
    }

    fn insert(&mut self, name: &str, entry: Registered) {
        if LAYOUT_TYPES.contains(&name) {
            tracing::warn!(name, "cannot register over a built-in layout type");
            return;
        }
        if self.map.insert(name.to_string(), entry).is_some() {
            tracing::debug!(name, "replaced registered type");
        }
    }

    pub fn register(&mut self, name: &str, factory: WidgetFactory) {
        self.insert(name, Registered::Widget(factory));
    }

    pub fn register_plugin(&mut self, name: &str, descriptor: PluginDescriptor) {
        self.insert(name, Registered::Plugin(descriptor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kind(name).is_some()
    }

    pub fn kind(&self, name: &str) -> Option<TypeKind> {
        if LAYOUT_TYPES.contains(&name) {
            return Some(TypeKind::Layout);
        }
        self.map.get(name).map(|entry| match entry {
            Registered::Widget(_) => TypeKind::Widget,
            Registered::Plugin(_) => TypeKind::Plugin,
        })
    }

    pub fn widget(&self, name: &str) -> Option<&WidgetDescriptor> {
        match self.map.get(name)? {
            Registered::Widget(d) => Some(d),
            Registered::Plugin(_) => None,
        }
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginDescriptor> {
        match self.map.get(name)? {
            Registered::Plugin(d) => Some(d),
            Registered::Widget(_) => None,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct LabelConfig {
        #[serde(default)]
        text: String,
    }

    struct Label(String);

    impl Widget for Label {
        fn render(&mut self, ui: &mut egui::Ui) {
            ui.label(&self.0);
        }
    }

    fn label(cfg: LabelConfig) -> anyhow::Result<Label> {
        Ok(Label(cfg.text))
    }

    #[test]
    fn defaults_cover_reference_types() {
        let reg = WidgetRegistry::with_defaults();
        assert_eq!(reg.kind("clock"), Some(TypeKind::Widget));
        assert_eq!(reg.kind("topic_bus"), Some(TypeKind::Plugin));
        assert_eq!(reg.kind("tabs"), Some(TypeKind::Layout));
        assert_eq!(reg.kind("nonexistent_widget"), None);
        assert!(reg.widget("timer").unwrap().wants_root());
        assert!(!reg.widget("clock").unwrap().wants_root());
    }

    #[test]
    fn layout_names_cannot_be_registered() {
        let mut reg = WidgetRegistry::default();
        reg.register("tabs", WidgetFactory::new(label));
        assert!(reg.widget("tabs").is_none());
    }

    #[test]
    fn unknown_option_is_a_binding_error() {
        let desc = WidgetFactory::new(label);
        let bad = desc.create(serde_json::json!({"txt": "x"}), None);
        assert!(matches!(bad, Err(CtorError::Options(_))));
        assert!(desc.create(serde_json::json!({"text": "x"}), None).is_ok());
    }
}

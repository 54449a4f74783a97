use crate::dashboard::config::DashboardConfig;
use crate::dashboard::control::ControlAction;
use crate::dashboard::data_cache::CacheDir;
use crate::dashboard::directory::InstanceDirectory;
use crate::dashboard::error::{panic_message, BuildError, ErrorSink};
use crate::dashboard::events::{SessionEvent, SessionEvents, StateBroadcaster};
use crate::dashboard::factory::{import_modules, Factory};
use crate::dashboard::layout::{propagate_visibility, ChildSlot};
use crate::dashboard::node::NodePath;
use crate::dashboard::tabs::{TabIdentityMap, TabStrip};
use crate::dashboard::topics::TopicBus;
use crate::dashboard::widgets::{PluginRef, Widget, WidgetRef, WidgetRegistry};
use crate::dashboard::worker::UiWaker;
use eframe::egui;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::Instant;

/// Lifecycle of the composition root. Each state is entered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Uninitialized,
    Loading,
    Constructing,
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// Services shared by every instance of one dashboard.
pub struct RootInner {
    instance_name: String,
    cache_root: PathBuf,
    pub(crate) directory: RefCell<InstanceDirectory>,
    pub(crate) tabs: RefCell<TabIdentityMap>,
    events: SessionEvents,
    topics: TopicBus,
    errors: ErrorSink,
    waker: UiWaker,
}

impl RootInner {
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Cache directory reserved for `feature`.
    pub fn cache_dir(&self, feature: &str) -> CacheDir {
        CacheDir::new(&self.cache_root).subdir(feature)
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn window_active(&self) -> StateBroadcaster {
        self.events.window_active().clone()
    }

    pub fn screensaver(&self) -> StateBroadcaster {
        self.events.screensaver().clone()
    }

    pub fn suspend(&self) -> StateBroadcaster {
        self.events.suspend().clone()
    }

    pub fn topics(&self) -> TopicBus {
        self.topics.clone()
    }

    pub fn errors(&self) -> ErrorSink {
        self.errors.clone()
    }

    pub fn waker(&self) -> UiWaker {
        self.waker.clone()
    }

    pub fn tab_by_id(&self, id: &str) -> (Option<TabStrip>, usize) {
        self.tabs.borrow().resolve(id)
    }

    pub fn instance(&self, type_name: &str, index: usize) -> Option<WidgetRef> {
        self.directory.borrow().get(type_name, index)
    }

    /// Run `f` on the `index`-th `type_name` instance if it is a `T` and not borrowed.
    pub fn with_instance<T: Widget, R>(
        &self,
        type_name: &str,
        index: usize,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        self.directory.borrow().with(type_name, index, f)
    }

    pub fn plugin_instance(&self, type_name: &str, index: usize) -> Option<PluginRef> {
        self.directory.borrow().get_plugin(type_name, index)
    }

    pub fn instance_count(&self, type_name: &str) -> usize {
        self.directory.borrow().count(type_name)
    }

    pub fn instance_types(&self) -> Vec<String> {
        self.directory.borrow().types().to_vec()
    }

    pub fn set_fake_screensaver(&self, active: bool) {
        self.events.fake_screensaver(active);
    }
}

/// Non-owning handle to the dashboard root, passed to constructors that ask for it.
#[derive(Clone)]
pub struct RootHandle(Weak<RootInner>);

impl RootHandle {
    pub(crate) fn new(root: &Rc<RootInner>) -> Self {
        Self(Rc::downgrade(root))
    }

    pub fn upgrade(&self) -> Option<Rc<RootInner>> {
        self.0.upgrade()
    }

    /// Like `upgrade`, for constructors that cannot work without the root.
    pub fn get(&self) -> anyhow::Result<Rc<RootInner>> {
        self.upgrade()
            .ok_or_else(|| anyhow::anyhow!("dashboard root is gone"))
    }

    pub fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn same_root(&self, other: &RootHandle) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }

    pub fn tab_by_id(&self, id: &str) -> (Option<TabStrip>, usize) {
        match self.upgrade() {
            Some(root) => root.tab_by_id(id),
            None => (None, 0),
        }
    }

    pub fn instance(&self, type_name: &str, index: usize) -> Option<WidgetRef> {
        self.upgrade()?.instance(type_name, index)
    }

    pub fn show_error(&self, title: &str, message: &str) {
        match self.upgrade() {
            Some(root) => root.errors.push(title, message),
            None => tracing::error!(title, "{message}"),
        }
    }
}

fn guarded(errors: &ErrorSink, what: &str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        errors.push(format!("{what} panicked"), panic_message(&*payload));
    }
}

/// The composition root: owns the widget tree and the plugins.
pub struct Dashboard {
    root: Rc<RootInner>,
    phase: Phase,
    central: Option<ChildSlot>,
    overlay: Option<ChildSlot>,
    plugins: Vec<(String, PluginRef)>,
    started: bool,
}

impl Dashboard {
    /// Resolve and construct everything named by `config`.
    ///
    /// Plugins are built first, then the central widget, then the overlay.
    /// Nothing is started; call [`start`](Self::start) once the window exists.
    pub fn build(
        config: &DashboardConfig,
        registry: &WidgetRegistry,
        waker: UiWaker,
        progress: &mut dyn FnMut(&str),
    ) -> Result<Self, BuildError> {
        let events = SessionEvents::new(waker.clone());
        let topics = TopicBus::new(events.inbox());
        let root = Rc::new(RootInner {
            instance_name: config.instance_name.clone(),
            cache_root: config.cache_root(),
            directory: RefCell::new(InstanceDirectory::new()),
            tabs: RefCell::new(TabIdentityMap::new()),
            events,
            topics,
            errors: ErrorSink::new(config.show_error_messages),
            waker,
        });
        let mut dashboard = Self {
            root,
            phase: Phase::Uninitialized,
            central: None,
            overlay: None,
            plugins: Vec::new(),
            started: false,
        };

        dashboard.enter(Phase::Loading);
        progress("Loading modules");
        import_modules(
            registry,
            &config.central_widget,
            config.overlay_widget.as_ref(),
            &config.plugins,
        )?;

        dashboard.enter(Phase::Constructing);
        let root = Rc::clone(&dashboard.root);
        let mut factory = Factory::new(registry, &root, progress);
        let plugin_root = NodePath::root("plugins");
        for (i, node) in config.plugins.iter().enumerate() {
            let plugin = factory.create_plugin(node, &plugin_root.indexed(i))?;
            dashboard.plugins.push((node.type_name.clone(), plugin));
        }
        dashboard.central = Some(
            factory.create_slot(&config.central_widget, &NodePath::root("central_widget"))?,
        );
        if let Some(overlay) = &config.overlay_widget {
            dashboard.overlay = Some(factory.create_slot(overlay, &NodePath::root("overlay_widget"))?);
        }
        tracing::info!(
            types = dashboard.root.instance_types().len(),
            plugins = dashboard.plugins.len(),
            "dashboard constructed"
        );
        Ok(dashboard)
    }

    fn enter(&mut self, phase: Phase) {
        tracing::info!(from = ?self.phase, to = ?phase, "dashboard phase");
        self.phase = phase;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn handle(&self) -> RootHandle {
        RootHandle::new(&self.root)
    }

    pub fn root(&self) -> &RootInner {
        &self.root
    }

    pub fn errors(&self) -> ErrorSink {
        self.root.errors()
    }

    pub fn central(&self) -> Option<&WidgetRef> {
        self.central.as_ref().map(|slot| &slot.widget)
    }

    /// Fire start hooks in construction order, start plugins, then show the tree.
    pub fn start(&mut self) {
        if self.phase != Phase::Constructing {
            tracing::warn!(phase = ?self.phase, "start ignored");
            return;
        }
        self.enter(Phase::Starting);
        self.started = true;
        let errors = self.root.errors();
        let widgets = self.root.directory.borrow().widgets();
        for widget in widgets {
            guarded(&errors, "widget start", || widget.borrow_mut().start());
        }
        for (name, plugin) in &self.plugins {
            guarded(&errors, "plugin start", || {
                if let Err(e) = plugin.borrow_mut().start_plugin() {
                    errors.push(format!("Plugin '{name}' failed to start"), format!("{e:#}"));
                }
            });
        }
        for slot in self.central.iter().chain(self.overlay.iter()) {
            propagate_visibility(&slot.widget, true);
        }
        self.enter(Phase::Running);
    }

    /// Stop plugins, then widgets. Runs once; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.phase >= Phase::Stopping {
            return;
        }
        self.enter(Phase::Stopping);
        let errors = self.root.errors();
        if self.started {
            for (_, plugin) in self.plugins.iter().rev() {
                guarded(&errors, "plugin stop", || plugin.borrow_mut().stop_plugin());
            }
            let widgets = self.root.directory.borrow().widgets();
            for widget in widgets.iter().rev() {
                guarded(&errors, "widget stop", || widget.borrow_mut().stop());
            }
        }
        self.enter(Phase::Terminated);
    }

    /// Report a window state change; window-active is `!minimized`.
    pub fn window_state_changed(&self, minimized: bool) {
        let errors = self.root.errors();
        guarded(&errors, "window state handler", || {
            self.root.events.window_active().emit(!minimized);
        });
    }

    /// Replay events queued by other threads.
    pub fn pump(&mut self) {
        let pending = self.root.events.take_pending();
        if pending.is_empty() {
            return;
        }
        let errors = self.root.errors();
        for event in pending {
            tracing::trace!(?event, "session event");
            guarded(&errors, "event handler", || self.dispatch(event));
        }
    }

    fn dispatch(&self, event: SessionEvent) {
        let events = &self.root.events;
        match event {
            SessionEvent::WindowActive(active) => {
                events.window_active().emit(active);
            }
            SessionEvent::ScreensaverActiveChanged { service, active } => {
                events.screensaver_service_changed(&service, active);
            }
            SessionEvent::FakeScreensaver(active) => events.fake_screensaver(active),
            SessionEvent::PrepareForSleep(sleeping) => events.prepare_for_sleep(sleeping),
            SessionEvent::TopicMessage { topic, payload } => {
                self.root.topics.dispatch(&topic, &payload);
            }
            SessionEvent::Control(action) => {
                self.route_control(&action);
            }
        }
    }

    /// Deliver a control action. Returns `false` if no instance of the target
    /// widget type accepted it.
    pub fn route_control(&self, action: &ControlAction) -> bool {
        if let ControlAction::FakeScreensaver(active) = action {
            self.root.set_fake_screensaver(*active);
            return true;
        }
        let Some(target) = action.target_type() else {
            return false;
        };
        let count = self.root.instance_count(target);
        let handled = (0..count)
            .filter_map(|i| self.root.instance(target, i))
            .any(|w| w.try_borrow_mut().map(|mut w| w.on_control(action)).unwrap_or(false));
        if !handled {
            tracing::warn!(?action, target, count, "no widget handled control action");
        }
        handled
    }

    pub fn tick(&mut self, now: Instant) {
        let errors = self.root.errors();
        for (_, plugin) in &self.plugins {
            guarded(&errors, "plugin tick", || plugin.borrow_mut().tick(now));
        }
        let widgets = self.root.directory.borrow().widgets();
        for widget in widgets {
            guarded(&errors, "widget tick", || {
                if let Ok(mut w) = widget.try_borrow_mut() {
                    w.tick(now);
                }
            });
        }
    }

    /// Earliest deadline requested by any widget.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let widgets = self.root.directory.borrow().widgets();
        widgets
            .iter()
            .filter_map(|w| w.try_borrow().ok().and_then(|w| w.next_deadline()))
            .min()
    }

    pub fn render(&mut self, ctx: &egui::Context) {
        let errors = self.root.errors();
        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(central) = &self.central {
                guarded(&errors, "widget render", || central.render(ui));
            }
        });
        if let Some(overlay) = &self.overlay {
            egui::Area::new(egui::Id::new("deskboard_overlay"))
                .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
                .show(ctx, |ui| {
                    guarded(&errors, "overlay render", || overlay.render(ui));
                });
        }
        self.error_window(ctx);
    }

    fn error_window(&self, ctx: &egui::Context) {
        let errors = self.root.errors();
        let Some(report) = errors.front() else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new(report.title.as_str())
            .id(egui::Id::new("deskboard_error"))
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label(&report.message);
                if errors.len() > 1 {
                    ui.weak(format!("{} more", errors.len() - 1));
                }
                if ui.button("Close").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            errors.dismiss();
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

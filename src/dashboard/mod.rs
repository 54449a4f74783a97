pub mod config;
pub mod control;
pub mod dashboard;
pub mod data_cache;
pub mod directory;
pub mod error;
pub mod events;
pub mod factory;
pub mod layout;
pub mod node;
pub mod plugins;
pub mod process;
pub mod tabs;
pub mod timer;
pub mod topics;
pub mod widgets;
pub mod worker;

pub use config::DashboardConfig;
pub use dashboard::{Dashboard, Phase, RootHandle, RootInner};
pub use error::{BuildError, ErrorSink};
pub use events::{Broadcaster, SessionEvent, Subscription};
pub use node::{ConfigNode, NodePath};
pub use tabs::{TabIdentityMap, TabStrip};
pub use timer::{ScheduledTimer, VisibilitySignal};
pub use widgets::{Plugin, PluginDescriptor, Widget, WidgetFactory, WidgetRegistry};
pub use worker::{BackgroundWorker, RunPolicy, UiWaker};

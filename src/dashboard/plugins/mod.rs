//! Non-visual units composed at the dashboard root.

mod topic_bus;

pub use topic_bus::{CommandTransport, TopicBusConfig, TopicBusPlugin};

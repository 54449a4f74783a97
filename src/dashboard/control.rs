//! Session control surface.
//!
//! External tools address the running dashboard by service name and object
//! path. Each request is turned into a [`ControlAction`], queued on the event
//! inbox and dispatched on the update thread.

pub const SERVICE_NAME: &str = "io.deskboard.Dashboard";
pub const CALENDAR_PATH: &str = "/calendar";
pub const TASKS_PATH: &str = "/tasks";
pub const SCREENSAVER_PATH: &str = "/screensaver";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    CreateCalendarEvent,
    CreateTask,
    FakeScreensaver(bool),
}

impl ControlAction {
    /// Parse a request addressed to `path` with the given method name.
    pub fn from_request(path: &str, method: &str, arg: Option<&str>) -> Option<Self> {
        match (path, method) {
            (CALENDAR_PATH, "CreateEvent") => Some(Self::CreateCalendarEvent),
            (TASKS_PATH, "CreateTask") => Some(Self::CreateTask),
            (SCREENSAVER_PATH, "FakeScreensaver") => {
                arg.and_then(parse_flag).map(Self::FakeScreensaver)
            }
            _ => None,
        }
    }

    /// Widget type that handles this action, if it is routed to a widget.
    pub fn target_type(&self) -> Option<&'static str> {
        match self {
            Self::CreateCalendarEvent => Some("calendar"),
            Self::CreateTask => Some("tasks"),
            Self::FakeScreensaver(_) => None,
        }
    }
}

/// Truthy/falsy words accepted from the command line and the topic bus.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

use crate::dashboard::node::{NodeError, NodePath};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Construction-fatal failures. Any of these aborts the whole build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unknown widget type '{type_name}' at {path}")]
    UnknownType { type_name: String, path: NodePath },
    #[error("invalid widget node at {path}: {source}")]
    InvalidNode {
        path: NodePath,
        #[source]
        source: NodeError,
    },
    #[error("invalid options for '{type_name}' at {path}: {source}")]
    InvalidOptions {
        type_name: String,
        path: NodePath,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to construct '{type_name}' at {path}: {error:#}")]
    Constructor {
        type_name: String,
        path: NodePath,
        error: anyhow::Error,
    },
    #[error("'{type_name}' at {path} is a plugin and cannot be placed in the widget tree")]
    PluginInTree { type_name: String, path: NodePath },
    #[error("'{type_name}' at {path} is not a plugin")]
    NotAPlugin { type_name: String, path: NodePath },
}

impl BuildError {
    /// Widget type the error refers to, when there is one.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            BuildError::UnknownType { type_name, .. }
            | BuildError::InvalidOptions { type_name, .. }
            | BuildError::Constructor { type_name, .. }
            | BuildError::PluginInTree { type_name, .. }
            | BuildError::NotAPlugin { type_name, .. } => Some(type_name),
            BuildError::InvalidNode { .. } => None,
        }
    }

    pub fn path(&self) -> &NodePath {
        match self {
            BuildError::UnknownType { path, .. }
            | BuildError::InvalidNode { path, .. }
            | BuildError::InvalidOptions { path, .. }
            | BuildError::Constructor { path, .. }
            | BuildError::PluginInTree { path, .. }
            | BuildError::NotAPlugin { path, .. } => path,
        }
    }
}

/// Error reported to the user through the dashboard's error window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub title: String,
    pub message: String,
}

/// Most reports kept waiting at once. Later ones are only logged.
pub const MAX_QUEUED_REPORTS: usize = 32;

/// Queue of errors waiting to be shown. A report equal to one already queued
/// is dropped, so widgets failing every frame do not flood the window.
#[derive(Clone)]
pub struct ErrorSink {
    enabled: bool,
    reports: Rc<RefCell<VecDeque<ErrorReport>>>,
}

impl ErrorSink {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            reports: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn push(&self, title: impl Into<String>, message: impl Into<String>) {
        let report = ErrorReport {
            title: title.into(),
            message: message.into(),
        };
        tracing::error!(title = %report.title, "{}", report.message);
        if !self.enabled {
            return;
        }
        let mut reports = self.reports.borrow_mut();
        if reports.len() < MAX_QUEUED_REPORTS && !reports.contains(&report) {
            reports.push_back(report);
        }
    }

    pub fn front(&self) -> Option<ErrorReport> {
        self.reports.borrow().front().cloned()
    }

    pub fn dismiss(&self) {
        self.reports.borrow_mut().pop_front();
    }

    pub fn len(&self) -> usize {
        self.reports.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.borrow().is_empty()
    }
}

/// Render the message carried by a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_collapsed() {
        let sink = ErrorSink::new(true);
        sink.push("tick", "boom");
        sink.push("tick", "boom");
        sink.push("tick", "other");
        assert_eq!(sink.len(), 2);
        sink.dismiss();
        assert_eq!(sink.front().map(|r| r.message), Some("other".into()));
    }

    #[test]
    fn interleaved_failures_are_queued_once_each() {
        let sink = ErrorSink::new(true);
        for _ in 0..1000 {
            sink.push("widget render", "clock: boom");
            sink.push("widget render", "news: boom");
        }
        assert_eq!(sink.len(), 2);
        sink.dismiss();
        assert_eq!(sink.front().map(|r| r.message), Some("news: boom".into()));
    }

    #[test]
    fn queue_is_capped() {
        let sink = ErrorSink::new(true);
        for i in 0..MAX_QUEUED_REPORTS * 3 {
            sink.push("tick", format!("failure {i}"));
        }
        assert_eq!(sink.len(), MAX_QUEUED_REPORTS);
        assert_eq!(sink.front().map(|r| r.message), Some("failure 0".into()));
    }

    #[test]
    fn disabled_sink_only_logs() {
        let sink = ErrorSink::new(false);
        sink.push("tick", "boom");
        assert!(sink.is_empty());
    }

    #[test]
    fn unknown_type_names_type_and_path() {
        let err = BuildError::UnknownType {
            type_name: "nonexistent_widget".into(),
            path: NodePath::root("central_widget").child(1, "nonexistent_widget"),
        };
        let text = err.to_string();
        assert!(text.contains("nonexistent_widget"));
        assert!(text.contains("central_widget.widgets[1]"));
    }
}

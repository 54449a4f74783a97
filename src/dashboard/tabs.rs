use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

#[derive(Debug, Default)]
struct TabEntry {
    base_title: String,
    suffix: Option<String>,
    highlight: bool,
}

#[derive(Debug, Default)]
struct StripInner {
    tabs: Vec<TabEntry>,
    selected: usize,
}

/// Shared label state of one `tabs` layout.
///
/// The layout owns the strip; other widgets reach it through the
/// [`TabIdentityMap`] to show counters or highlight a tab.
#[derive(Debug, Clone, Default)]
pub struct TabStrip {
    inner: Rc<RefCell<StripInner>>,
}

impl TabStrip {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, title: impl Into<String>) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.tabs.push(TabEntry {
            base_title: title.into(),
            ..TabEntry::default()
        });
        inner.tabs.len() - 1
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visible label of the tab at `index`.
    pub fn title(&self, index: usize) -> Option<String> {
        let inner = self.inner.borrow();
        let tab = inner.tabs.get(index)?;
        Some(match &tab.suffix {
            Some(suffix) => format!("{} {suffix}", tab.base_title),
            None => tab.base_title.clone(),
        })
    }

    /// Append `suffix` to the tab label, or restore the base title with `None`.
    pub fn append_suffix(&self, index: usize, suffix: Option<&str>) {
        if let Some(tab) = self.inner.borrow_mut().tabs.get_mut(index) {
            tab.suffix = suffix.map(str::to_string);
        } else {
            tracing::warn!(index, "append_suffix on missing tab");
        }
    }

    pub fn set_highlight(&self, index: usize, highlight: bool) {
        if let Some(tab) = self.inner.borrow_mut().tabs.get_mut(index) {
            tab.highlight = highlight;
        }
    }

    pub fn is_highlighted(&self, index: usize) -> bool {
        self.inner
            .borrow()
            .tabs
            .get(index)
            .map(|t| t.highlight)
            .unwrap_or(false)
    }

    pub fn selected(&self) -> usize {
        self.inner.borrow().selected
    }

    pub fn select(&self, index: usize) {
        let mut inner = self.inner.borrow_mut();
        if index < inner.tabs.len() {
            inner.selected = index;
        }
    }

    pub fn ptr_eq(&self, other: &TabStrip) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn downgrade(&self) -> Weak<RefCell<StripInner>> {
        Rc::downgrade(&self.inner)
    }
}

/// Logical tab id -> (tab strip, index). Later registrations replace earlier ones.
#[derive(Default)]
pub struct TabIdentityMap {
    map: HashMap<String, (Weak<RefCell<StripInner>>, usize)>,
}

impl TabIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tab(&mut self, id: &str, strip: &TabStrip, index: usize) {
        if self.map.contains_key(id) {
            tracing::warn!(tab_id = id, "tab id registered twice, keeping the latest");
        }
        self.map.insert(id.to_string(), (strip.downgrade(), index));
    }

    /// `(None, 0)` when the id is unknown or its strip no longer exists.
    pub fn resolve(&self, id: &str) -> (Option<TabStrip>, usize) {
        match self.map.get(id) {
            Some((weak, index)) => match weak.upgrade() {
                Some(inner) => (Some(TabStrip { inner }), *index),
                None => (None, 0),
            },
            None => (None, 0),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.map.keys().cloned().collect();
        ids.sort();
        ids
    }
}

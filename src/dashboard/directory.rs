use crate::dashboard::widgets::{Plugin, PluginRef, Widget, WidgetRef};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

#[derive(Clone)]
enum Entry {
    Widget(Weak<RefCell<dyn Widget>>),
    Plugin(Weak<RefCell<dyn Plugin>>),
}

/// Every instance created by one construction pass, keyed by type name.
///
/// Entries are weak: the composition tree and the dashboard own the instances.
#[derive(Default)]
pub struct InstanceDirectory {
    by_type: HashMap<String, Vec<Entry>>,
    type_order: Vec<String>,
    widgets: Vec<Weak<RefCell<dyn Widget>>>,
}

impl InstanceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, type_name: &str, entry: Entry) {
        if !self.by_type.contains_key(type_name) {
            self.type_order.push(type_name.to_string());
        }
        self.by_type
            .entry(type_name.to_string())
            .or_default()
            .push(entry);
    }

    pub fn register_widget(&mut self, type_name: &str, widget: &WidgetRef) {
        let weak = Rc::downgrade(widget);
        self.widgets.push(weak.clone());
        self.push(type_name, Entry::Widget(weak));
    }

    pub fn register_plugin(&mut self, type_name: &str, plugin: &PluginRef) {
        self.push(type_name, Entry::Plugin(Rc::downgrade(plugin)));
    }

    /// The `index`-th widget of `type_name` in construction order.
    pub fn get(&self, type_name: &str, index: usize) -> Option<WidgetRef> {
        match self.by_type.get(type_name)?.get(index)? {
            Entry::Widget(w) => w.upgrade(),
            Entry::Plugin(_) => None,
        }
    }

    pub fn get_plugin(&self, type_name: &str, index: usize) -> Option<PluginRef> {
        match self.by_type.get(type_name)?.get(index)? {
            Entry::Plugin(p) => p.upgrade(),
            Entry::Widget(_) => None,
        }
    }

    /// Run `f` on the `index`-th instance of `type_name` if it is a `T`.
    pub fn with<T: Widget, R>(
        &self,
        type_name: &str,
        index: usize,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let widget = self.get(type_name, index)?;
        let mut guard = widget.try_borrow_mut().ok()?;
        let widget: &mut dyn Widget = &mut *guard;
        widget.as_any_mut().downcast_mut::<T>().map(f)
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.by_type.get(type_name).map(Vec::len).unwrap_or(0)
    }

    /// Distinct type names in order of first construction.
    pub fn types(&self) -> &[String] {
        &self.type_order
    }

    /// Live widgets in construction order.
    pub fn widgets(&self) -> Vec<WidgetRef> {
        self.widgets.iter().filter_map(Weak::upgrade).collect()
    }
}

use crate::dashboard::dashboard::{RootHandle, RootInner};
use crate::dashboard::error::BuildError;
use crate::dashboard::layout::{
    ChildSlot, Container, ContainerConfig, GroupBox, GroupBoxConfig, Splitter, SplitterConfig,
    TabGroup, TabsConfig,
};
use crate::dashboard::node::{ConfigNode, NodePath, CHILDREN_KEY};
use crate::dashboard::tabs::TabStrip;
use crate::dashboard::widgets::{CtorError, PluginRef, TypeKind, WidgetRef, WidgetRegistry};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

fn unknown(node: &ConfigNode, path: &NodePath) -> BuildError {
    BuildError::UnknownType {
        type_name: node.type_name.clone(),
        path: path.clone(),
    }
}

fn check_tree(registry: &WidgetRegistry, node: &ConfigNode, path: &NodePath) -> Result<(), BuildError> {
    match registry.kind(&node.type_name) {
        None => Err(unknown(node, path)),
        Some(TypeKind::Plugin) => Err(BuildError::PluginInTree {
            type_name: node.type_name.clone(),
            path: path.clone(),
        }),
        Some(TypeKind::Widget) => Ok(()),
        Some(TypeKind::Layout) => {
            let children = node.children().map_err(|source| BuildError::InvalidNode {
                path: path.clone(),
                source,
            })?;
            for (i, child) in children.iter().enumerate() {
                check_tree(registry, child, &path.child(i, &child.type_name))?;
            }
            Ok(())
        }
    }
}

/// Resolve every type reachable from the configuration before anything is
/// built. Fails on the first unknown or misplaced type.
pub fn import_modules(
    registry: &WidgetRegistry,
    central: &ConfigNode,
    overlay: Option<&ConfigNode>,
    plugins: &[ConfigNode],
) -> Result<(), BuildError> {
    let plugin_root = NodePath::root("plugins");
    for (i, node) in plugins.iter().enumerate() {
        let path = plugin_root.indexed(i);
        match registry.kind(&node.type_name) {
            Some(TypeKind::Plugin) => {}
            Some(_) => {
                return Err(BuildError::NotAPlugin {
                    type_name: node.type_name.clone(),
                    path,
                })
            }
            None => return Err(unknown(node, &path)),
        }
    }
    check_tree(registry, central, &NodePath::root("central_widget"))?;
    if let Some(overlay) = overlay {
        check_tree(registry, overlay, &NodePath::root("overlay_widget"))?;
    }
    Ok(())
}

/// Recursive builder turning configuration nodes into live instances.
///
/// Instances are registered in the root's directory as soon as they exist, so
/// constructors may look up anything built before them.
pub struct Factory<'a> {
    registry: &'a WidgetRegistry,
    root: &'a Rc<RootInner>,
    progress: &'a mut dyn FnMut(&str),
}

impl<'a> Factory<'a> {
    pub fn new(
        registry: &'a WidgetRegistry,
        root: &'a Rc<RootInner>,
        progress: &'a mut dyn FnMut(&str),
    ) -> Self {
        Self {
            registry,
            root,
            progress,
        }
    }

    fn report(&mut self, node: &ConfigNode, path: &NodePath) {
        tracing::debug!(%path, type_name = %node.type_name, "creating widget");
        (self.progress)(&format!("Creating widget '{}'", node.type_name));
    }

    fn ctor_error(node: &ConfigNode, path: &NodePath, err: CtorError) -> BuildError {
        match err {
            CtorError::Options(source) => BuildError::InvalidOptions {
                type_name: node.type_name.clone(),
                path: path.clone(),
                source,
            },
            CtorError::Failed(error) => BuildError::Constructor {
                type_name: node.type_name.clone(),
                path: path.clone(),
                error,
            },
        }
    }

    fn handle(&self) -> RootHandle {
        RootHandle::new(self.root)
    }

    pub fn create_widget(&mut self, node: &ConfigNode, path: &NodePath) -> Result<WidgetRef, BuildError> {
        self.report(node, path);
        let widget = match self.registry.kind(&node.type_name) {
            Some(TypeKind::Layout) => self.create_layout(node, path)?,
            Some(TypeKind::Widget) => {
                let descriptor = self
                    .registry
                    .widget(&node.type_name)
                    .ok_or_else(|| unknown(node, path))?;
                let root = descriptor.wants_root().then(|| self.handle());
                descriptor
                    .create(node.options_value(), root)
                    .map_err(|e| Self::ctor_error(node, path, e))?
            }
            Some(TypeKind::Plugin) => {
                return Err(BuildError::PluginInTree {
                    type_name: node.type_name.clone(),
                    path: path.clone(),
                })
            }
            None => return Err(unknown(node, path)),
        };
        self.root
            .directory
            .borrow_mut()
            .register_widget(&node.type_name, &widget);
        Ok(widget)
    }

    /// Build `node` and wrap it with its size hint.
    pub fn create_slot(&mut self, node: &ConfigNode, path: &NodePath) -> Result<ChildSlot, BuildError> {
        let widget = self.create_widget(node, path)?;
        Ok(ChildSlot::new(widget, &node.type_name, node.size))
    }

    pub fn create_plugin(&mut self, node: &ConfigNode, path: &NodePath) -> Result<PluginRef, BuildError> {
        tracing::debug!(%path, type_name = %node.type_name, "creating plugin");
        (self.progress)(&format!("Creating plugin '{}'", node.type_name));
        let descriptor = match self.registry.kind(&node.type_name) {
            Some(TypeKind::Plugin) => self
                .registry
                .plugin(&node.type_name)
                .ok_or_else(|| unknown(node, path))?,
            Some(_) => {
                return Err(BuildError::NotAPlugin {
                    type_name: node.type_name.clone(),
                    path: path.clone(),
                })
            }
            None => return Err(unknown(node, path)),
        };
        let root = descriptor.wants_root().then(|| self.handle());
        let plugin = descriptor
            .create(node.options_value(), root)
            .map_err(|e| Self::ctor_error(node, path, e))?;
        self.root
            .directory
            .borrow_mut()
            .register_plugin(&node.type_name, &plugin);
        Ok(plugin)
    }

    fn layout_config<C: DeserializeOwned>(node: &ConfigNode, path: &NodePath) -> Result<C, BuildError> {
        let mut options = node.options.clone();
        options.remove(CHILDREN_KEY);
        serde_json::from_value(Value::Object(options)).map_err(|source| BuildError::InvalidOptions {
            type_name: node.type_name.clone(),
            path: path.clone(),
            source,
        })
    }

    fn children(node: &ConfigNode, path: &NodePath) -> Result<Vec<ConfigNode>, BuildError> {
        node.children().map_err(|source| BuildError::InvalidNode {
            path: path.clone(),
            source,
        })
    }

    fn create_layout(&mut self, node: &ConfigNode, path: &NodePath) -> Result<WidgetRef, BuildError> {
        let children = Self::children(node, path)?;
        let widget: WidgetRef = match node.type_name.as_str() {
            "container" => {
                let cfg: ContainerConfig = Self::layout_config(node, path)?;
                let slots = self.create_slots(&children, path)?;
                Rc::new(RefCell::new(Container::new(cfg, slots)))
            }
            "splitter" => {
                let cfg: SplitterConfig = Self::layout_config(node, path)?;
                let slots = self.create_slots(&children, path)?;
                Rc::new(RefCell::new(Splitter::new(cfg, slots)))
            }
            "groupbox" => {
                let cfg: GroupBoxConfig = Self::layout_config(node, path)?;
                if children.len() > 1 {
                    tracing::warn!(%path, ignored = children.len() - 1, "groupbox only hosts its first widget");
                }
                let child = match children.first() {
                    Some(first) => Some(self.create_slot(first, &path.child(0, &first.type_name))?),
                    None => None,
                };
                Rc::new(RefCell::new(GroupBox::new(cfg, child)))
            }
            "tabs" => {
                let cfg: TabsConfig = Self::layout_config(node, path)?;
                let strip = TabStrip::new();
                let mut slots = Vec::with_capacity(children.len());
                for (i, child) in children.iter().enumerate() {
                    let slot = self.create_slot(child, &path.child(i, &child.type_name))?;
                    let index = strip.push(child.tab_label());
                    if let Some(id) = &child.tab_id {
                        self.root.tabs.borrow_mut().register_tab(id, &strip, index);
                    }
                    slots.push(slot);
                }
                Rc::new(RefCell::new(TabGroup::new(cfg, strip, slots)))
            }
            _ => return Err(unknown(node, path)),
        };
        Ok(widget)
    }

    fn create_slots(&mut self, children: &[ConfigNode], path: &NodePath) -> Result<Vec<ChildSlot>, BuildError> {
        children
            .iter()
            .enumerate()
            .map(|(i, child)| self.create_slot(child, &path.child(i, &child.type_name)))
            .collect()
    }
}

use crate::dashboard::node::SizeHint;
use crate::dashboard::tabs::TabStrip;
use crate::dashboard::timer::VisibilitySignal;
use crate::dashboard::widgets::{Widget, WidgetRef};
use eframe::egui;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Horizontal,
    Vertical,
}

impl Orientation {
    fn layout(self) -> egui::Layout {
        match self {
            Orientation::Horizontal => egui::Layout::left_to_right(egui::Align::Min),
            Orientation::Vertical => egui::Layout::top_down(egui::Align::Min),
        }
    }

    fn main_axis(self, v: egui::Vec2) -> f32 {
        match self {
            Orientation::Horizontal => v.x,
            Orientation::Vertical => v.y,
        }
    }

    fn cell(self, main: f32, avail: egui::Vec2) -> egui::Vec2 {
        match self {
            Orientation::Horizontal => egui::vec2(main, avail.y),
            Orientation::Vertical => egui::vec2(avail.x, main),
        }
    }
}

/// A constructed child together with its placement hints.
pub struct ChildSlot {
    pub widget: WidgetRef,
    pub type_name: String,
    pub size: Option<SizeHint>,
}

impl ChildSlot {
    pub fn new(widget: WidgetRef, type_name: &str, size: Option<SizeHint>) -> Self {
        Self {
            widget,
            type_name: type_name.to_string(),
            size,
        }
    }

    /// Fixed extent along `orientation`, if the node declared one.
    fn fixed(&self, orientation: Orientation) -> Option<f32> {
        let size = self.size?;
        match orientation {
            Orientation::Horizontal => size.width,
            Orientation::Vertical => size.height,
        }
    }

    pub fn render(&self, ui: &mut egui::Ui) {
        let Ok(mut widget) = self.widget.try_borrow_mut() else {
            tracing::warn!(type_name = %self.type_name, "widget already borrowed, skipping frame");
            return;
        };
        match self.size {
            Some(SizeHint { width, height }) if width.is_some() || height.is_some() => {
                let avail = ui.available_size();
                let size = egui::vec2(width.unwrap_or(avail.x), height.unwrap_or(avail.y));
                ui.allocate_ui(size, |ui| {
                    ui.set_min_size(size);
                    ui.set_max_size(size);
                    widget.render(ui);
                });
            }
            _ => widget.render(ui),
        }
    }
}

/// Split `total` between slots. Fixed entries keep their size; the rest is
/// shared by stretch weight (default 1), or evenly when all weights are zero.
pub fn distribute(total: f32, fixed: &[Option<f32>], stretch: &[f32]) -> Vec<f32> {
    let fixed_sum: f32 = fixed.iter().flatten().sum();
    let remaining = (total - fixed_sum).max(0.0);
    let weights: Vec<f32> = fixed
        .iter()
        .enumerate()
        .map(|(i, f)| match f {
            Some(_) => 0.0,
            None => stretch.get(i).copied().unwrap_or(1.0).max(0.0),
        })
        .collect();
    let weight_sum: f32 = weights.iter().sum();
    let flexible = fixed.iter().filter(|f| f.is_none()).count();
    fixed
        .iter()
        .zip(&weights)
        .map(|(f, w)| match f {
            Some(v) => *v,
            None if weight_sum > 0.0 => remaining * w / weight_sum,
            None => remaining / flexible as f32,
        })
        .collect()
}

/// Set the visibility of `widget` and every descendant it currently shows.
pub fn propagate_visibility(widget: &WidgetRef, visible: bool) {
    let (signal, children) = match widget.try_borrow() {
        Ok(w) => (w.visibility().cloned(), w.children()),
        Err(_) => {
            tracing::warn!("cannot propagate visibility into a borrowed widget");
            return;
        }
    };
    if let Some(signal) = signal {
        signal.set_visible(visible);
    }
    for (child, shown) in children {
        propagate_visibility(&child, visible && shown);
    }
}

fn render_sequence(
    ui: &mut egui::Ui,
    orientation: Orientation,
    slots: &[ChildSlot],
    sizes: &[f32],
    mut between: impl FnMut(&mut egui::Ui, usize),
) {
    let avail = ui.available_size();
    ui.with_layout(orientation.layout(), |ui| {
        ui.spacing_mut().item_spacing = egui::Vec2::ZERO;
        for (i, (slot, size)) in slots.iter().zip(sizes).enumerate() {
            let cell = orientation.cell(*size, avail);
            ui.allocate_ui_with_layout(cell, egui::Layout::top_down(egui::Align::Min), |ui| {
                ui.set_min_size(cell);
                ui.set_max_size(cell);
                slot.render(ui);
            });
            if i + 1 < slots.len() {
                between(ui, i);
            }
        }
    });
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub stretch: Vec<f32>,
    #[serde(default)]
    pub sizes: Vec<Option<f32>>,
}

/// Box layout placing children one after the other.
pub struct Container {
    cfg: ContainerConfig,
    children: Vec<ChildSlot>,
    visibility: VisibilitySignal,
}

const CONTAINER_GAP: f32 = 4.0;

impl Container {
    pub fn new(cfg: ContainerConfig, children: Vec<ChildSlot>) -> Self {
        Self {
            cfg,
            children,
            visibility: VisibilitySignal::new(),
        }
    }

    fn fixed_sizes(&self) -> Vec<Option<f32>> {
        self.children
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.fixed(self.cfg.orientation)
                    .or_else(|| self.cfg.sizes.get(i).copied().flatten())
            })
            .collect()
    }
}

impl Widget for Container {
    fn render(&mut self, ui: &mut egui::Ui) {
        if self.children.is_empty() {
            return;
        }
        let o = self.cfg.orientation;
        let gaps = CONTAINER_GAP * (self.children.len() - 1) as f32;
        let total = o.main_axis(ui.available_size()) - gaps;
        let sizes = distribute(total, &self.fixed_sizes(), &self.cfg.stretch);
        render_sequence(ui, o, &self.children, &sizes, |ui, _| {
            ui.add_space(CONTAINER_GAP);
        });
    }

    fn visibility(&self) -> Option<&VisibilitySignal> {
        Some(&self.visibility)
    }

    fn children(&self) -> Vec<(WidgetRef, bool)> {
        self.children
            .iter()
            .map(|slot| (slot.widget.clone(), true))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitterConfig {
    #[serde(default)]
    pub orientation: Orientation,
    /// Initial relative sizes of the panes.
    #[serde(default)]
    pub sizes: Vec<f32>,
}

const HANDLE: f32 = 6.0;
const MIN_FRACTION: f32 = 0.05;

/// Container whose pane sizes can be dragged by the user.
pub struct Splitter {
    orientation: Orientation,
    fractions: Vec<f32>,
    children: Vec<ChildSlot>,
    visibility: VisibilitySignal,
}

fn initial_fractions(sizes: &[f32], n: usize) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    let raw: Vec<f32> = (0..n)
        .map(|i| sizes.get(i).copied().unwrap_or(1.0).max(0.0))
        .collect();
    let sum: f32 = raw.iter().sum();
    if sum <= 0.0 {
        return vec![1.0 / n as f32; n];
    }
    raw.iter().map(|v| v / sum).collect()
}

impl Splitter {
    pub fn new(cfg: SplitterConfig, children: Vec<ChildSlot>) -> Self {
        Self {
            orientation: cfg.orientation,
            fractions: initial_fractions(&cfg.sizes, children.len()),
            children,
            visibility: VisibilitySignal::new(),
        }
    }

    pub fn fractions(&self) -> &[f32] {
        &self.fractions
    }

    /// Move the boundary after pane `index` by `delta` of the total extent.
    pub fn drag_handle(&mut self, index: usize, delta: f32) {
        if index + 1 >= self.fractions.len() {
            return;
        }
        let pair = self.fractions[index] + self.fractions[index + 1];
        let margin = MIN_FRACTION.min(pair / 2.0);
        let left = (self.fractions[index] + delta).clamp(margin, pair - margin);
        self.fractions[index] = left;
        self.fractions[index + 1] = pair - left;
    }
}

impl Widget for Splitter {
    fn render(&mut self, ui: &mut egui::Ui) {
        if self.children.is_empty() {
            return;
        }
        let o = self.orientation;
        let handles = HANDLE * (self.children.len() - 1) as f32;
        let total = (o.main_axis(ui.available_size()) - handles).max(1.0);
        let sizes: Vec<f32> = self.fractions.iter().map(|f| f * total).collect();
        let mut drags = Vec::new();
        render_sequence(ui, o, &self.children, &sizes, |ui, i| {
            let size = match o {
                Orientation::Horizontal => egui::vec2(HANDLE, ui.available_height()),
                Orientation::Vertical => egui::vec2(ui.available_width(), HANDLE),
            };
            let (rect, response) = ui.allocate_exact_size(size, egui::Sense::drag());
            let response = response.on_hover_cursor(match o {
                Orientation::Horizontal => egui::CursorIcon::ResizeHorizontal,
                Orientation::Vertical => egui::CursorIcon::ResizeVertical,
            });
            let color = if response.hovered() || response.dragged() {
                ui.visuals().widgets.hovered.bg_fill
            } else {
                ui.visuals().widgets.noninteractive.bg_stroke.color
            };
            ui.painter().rect_filled(rect.shrink(1.0), 1.0, color);
            let delta = o.main_axis(response.drag_delta());
            if delta != 0.0 {
                drags.push((i, delta / total));
            }
        });
        for (i, delta) in drags {
            self.drag_handle(i, delta);
        }
    }

    fn visibility(&self) -> Option<&VisibilitySignal> {
        Some(&self.visibility)
    }

    fn children(&self) -> Vec<(WidgetRef, bool)> {
        self.children
            .iter()
            .map(|slot| (slot.widget.clone(), true))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupBoxConfig {
    #[serde(default)]
    pub title: String,
}

/// Titled frame around a single child.
pub struct GroupBox {
    title: String,
    child: Option<ChildSlot>,
    visibility: VisibilitySignal,
}

impl GroupBox {
    pub fn new(cfg: GroupBoxConfig, child: Option<ChildSlot>) -> Self {
        Self {
            title: cfg.title,
            child,
            visibility: VisibilitySignal::new(),
        }
    }
}

impl Widget for GroupBox {
    fn render(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.set_min_size(ui.available_size());
            if !self.title.is_empty() {
                ui.strong(&self.title);
            }
            if let Some(child) = &self.child {
                child.render(ui);
            }
        });
    }

    fn visibility(&self) -> Option<&VisibilitySignal> {
        Some(&self.visibility)
    }

    fn children(&self) -> Vec<(WidgetRef, bool)> {
        self.child
            .iter()
            .map(|slot| (slot.widget.clone(), true))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TabsConfig {
    #[serde(default)]
    pub active_tab: usize,
}

/// Tab widget; only the selected child is shown.
pub struct TabGroup {
    strip: TabStrip,
    children: Vec<ChildSlot>,
    visibility: VisibilitySignal,
}

impl TabGroup {
    pub fn new(cfg: TabsConfig, strip: TabStrip, children: Vec<ChildSlot>) -> Self {
        if cfg.active_tab >= children.len() && !children.is_empty() {
            tracing::warn!(active_tab = cfg.active_tab, tabs = children.len(), "active_tab out of range");
        }
        strip.select(cfg.active_tab);
        Self {
            strip,
            children,
            visibility: VisibilitySignal::new(),
        }
    }

    pub fn strip(&self) -> &TabStrip {
        &self.strip
    }

    pub fn current(&self) -> usize {
        self.strip.selected()
    }

    /// Switch tabs, hiding the old page and showing the new one.
    pub fn select(&mut self, index: usize) {
        let old = self.strip.selected();
        if index == old || index >= self.children.len() {
            return;
        }
        self.strip.select(index);
        let visible = self.visibility.is_visible();
        if let Some(slot) = self.children.get(old) {
            propagate_visibility(&slot.widget, false);
        }
        propagate_visibility(&self.children[index].widget, visible);
    }
}

impl Widget for TabGroup {
    fn render(&mut self, ui: &mut egui::Ui) {
        let selected = self.strip.selected();
        let mut clicked = None;
        ui.horizontal_wrapped(|ui| {
            for i in 0..self.children.len() {
                let title = self.strip.title(i).unwrap_or_default();
                let mut text = egui::RichText::new(title);
                if self.strip.is_highlighted(i) {
                    text = text.strong().color(ui.visuals().warn_fg_color);
                }
                if ui.selectable_label(i == selected, text).clicked() {
                    clicked = Some(i);
                }
            }
        });
        ui.separator();
        if let Some(i) = clicked {
            self.select(i);
        }
        if let Some(slot) = self.children.get(self.strip.selected()) {
            slot.render(ui);
        }
    }

    fn visibility(&self) -> Option<&VisibilitySignal> {
        Some(&self.visibility)
    }

    fn children(&self) -> Vec<(WidgetRef, bool)> {
        let selected = self.strip.selected();
        self.children
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.widget.clone(), i == selected))
            .collect()
    }
}

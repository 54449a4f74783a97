use crate::dashboard::config::FontConfig;
use crate::dashboard::Dashboard;
use eframe::egui;
use std::time::Instant;

/// The eframe application hosting a started [`Dashboard`].
pub struct DashboardApp {
    dashboard: Dashboard,
    window_state: Option<(bool, bool)>,
}

impl DashboardApp {
    pub fn new(dashboard: Dashboard) -> Self {
        Self {
            dashboard,
            window_state: None,
        }
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    fn track_window_state(&mut self, ctx: &egui::Context) {
        let state = ctx.input(|i| {
            let vp = i.viewport();
            (vp.minimized.unwrap_or(false), vp.focused.unwrap_or(true))
        });
        if self.window_state != Some(state) {
            tracing::debug!(minimized = state.0, focused = state.1, "window state changed");
            self.window_state = Some(state);
            self.dashboard.window_state_changed(state.0);
        }
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.track_window_state(ctx);
        self.dashboard.pump();
        let now = Instant::now();
        self.dashboard.tick(now);
        self.dashboard.render(ctx);
        if let Some(deadline) = self.dashboard.next_wakeup() {
            ctx.request_repaint_after(deadline.saturating_duration_since(now));
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.dashboard.shutdown();
    }
}

/// Install the configured font file and base size.
pub fn apply_font(ctx: &egui::Context, font: &FontConfig) {
    if let Some(path) = &font.family {
        match std::fs::read(path) {
            Ok(bytes) => {
                let mut fonts = egui::FontDefinitions::default();
                fonts
                    .font_data
                    .insert("dashboard".to_owned(), egui::FontData::from_owned(bytes));
                for family in [egui::FontFamily::Proportional, egui::FontFamily::Monospace] {
                    fonts
                        .families
                        .entry(family)
                        .or_default()
                        .insert(0, "dashboard".to_owned());
                }
                ctx.set_fonts(fonts);
            }
            Err(e) => tracing::warn!(path = %path, error = %e, "failed to load font"),
        }
    }
    if let Some(size) = font.size {
        let mut style = (*ctx.style()).clone();
        for (text_style, font_id) in style.text_styles.iter_mut() {
            font_id.size = match text_style {
                egui::TextStyle::Heading => size * 1.4,
                egui::TextStyle::Small => size * 0.75,
                _ => size,
            };
        }
        ctx.set_style(style);
    }
}

/// Standalone window shown when the dashboard could not be built.
pub struct ErrorApp {
    title: String,
    message: String,
}

impl ErrorApp {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

impl eframe::App for ErrorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading(&self.title);
            ui.separator();
            egui::ScrollArea::vertical().max_height(ui.available_height() - 40.0).show(ui, |ui| {
                ui.add(egui::Label::new(egui::RichText::new(&self.message).monospace()).wrap(true));
            });
            ui.separator();
            ui.horizontal(|ui| {
                if ui.button("Copy").clicked() {
                    ui.output_mut(|o| o.copied_text = self.message.clone());
                }
                if ui.button("Close").clicked() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
            });
        });
    }
}

/// Show `message` in its own small window and block until it is closed.
pub fn show_startup_error(title: &str, message: &str) {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(title)
            .with_inner_size([560.0, 320.0]),
        ..Default::default()
    };
    let app = ErrorApp::new(title, message);
    if let Err(e) = eframe::run_native(title, options, Box::new(move |_cc| Box::new(app))) {
        tracing::error!(error = %e, "cannot show error window");
    }
}

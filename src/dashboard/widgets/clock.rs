use super::Widget;
use crate::dashboard::timer::{ScheduledTimer, VisibilitySignal};
use eframe::egui;
use serde::Deserialize;
use std::time::{Duration, Instant};

fn default_time_format() -> String {
    "%H:%M:%S".into()
}

fn default_date_format() -> Option<String> {
    Some("%A, %d %B %Y".into())
}

fn default_font_size() -> f32 {
    48.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClockConfig {
    #[serde(default = "default_time_format")]
    pub format: String,
    #[serde(default = "default_date_format")]
    pub date_format: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
}

const TICK: Duration = Duration::from_millis(500);

fn check_format(fmt: &str) -> anyhow::Result<()> {
    use chrono::format::{Item, StrftimeItems};
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        anyhow::bail!("invalid time format '{fmt}'");
    }
    Ok(())
}

pub struct ClockWidget {
    cfg: ClockConfig,
    visibility: VisibilitySignal,
    timer: ScheduledTimer,
    time: String,
    date: Option<String>,
}

impl ClockWidget {
    pub fn new(cfg: ClockConfig) -> anyhow::Result<Self> {
        check_format(&cfg.format)?;
        if let Some(date_format) = &cfg.date_format {
            check_format(date_format)?;
        }
        let visibility = VisibilitySignal::new();
        let timer = ScheduledTimer::bound(TICK, &visibility);
        let mut widget = Self {
            cfg,
            visibility,
            timer,
            time: String::new(),
            date: None,
        };
        widget.update_text();
        Ok(widget)
    }

    fn update_text(&mut self) {
        let now = chrono::Local::now();
        self.time = now.format(&self.cfg.format).to_string();
        self.date = self
            .cfg
            .date_format
            .as_ref()
            .map(|f| now.format(f).to_string());
    }
}

impl Widget for ClockWidget {
    fn render(&mut self, ui: &mut egui::Ui) {
        ui.vertical_centered(|ui| {
            ui.label(egui::RichText::new(&self.time).size(self.cfg.font_size));
            if let Some(date) = &self.date {
                ui.label(date);
            }
        });
    }

    fn tick(&mut self, now: Instant) {
        if self.timer.poll_at(now) {
            self.update_text();
        }
    }

    fn visibility(&self) -> Option<&VisibilitySignal> {
        Some(&self.visibility)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_due()
    }
}

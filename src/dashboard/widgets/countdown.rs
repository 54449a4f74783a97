use super::Widget;
use crate::dashboard::dashboard::RootHandle;
use crate::dashboard::data_cache::JsonCache;
use crate::dashboard::events::Subscription;
use crate::dashboard::process::{self, CommandLine};
use crate::dashboard::timer::ScheduledTimer;
use crate::dashboard::topics::TopicBus;
use eframe::egui;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::process::Child;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn default_font_size() -> f32 {
    40.0
}

fn default_inhibit_command() -> String {
    "systemd-inhibit --what=idle --who=deskboard --why='Timer running' sleep infinity".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountdownConfig {
    /// Topic used to keep several dashboards in step.
    #[serde(default)]
    pub sync_topic: Option<String>,
    /// Command run once when the countdown reaches zero.
    #[serde(default)]
    pub alarm_command: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    /// Hold off the screensaver while counting down or ringing.
    #[serde(default)]
    pub disable_screensaver_while_active: bool,
    /// Long running command that inhibits the screensaver until it is killed.
    #[serde(default = "default_inhibit_command")]
    pub inhibit_command: String,
}

/// Message exchanged on the sync topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSync {
    pub source: String,
    /// End of the countdown as a unix timestamp.
    pub time: i64,
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEnd {
    end: i64,
}

/// Parse user input as a duration in seconds.
///
/// Accepts `H:MM:SS`, `M:SS`, plain seconds with colons, or up to six digits
/// read as `HHMMSS` from the right.
pub fn parse_duration(input: &str) -> Result<i64, String> {
    let input = input.trim();
    let invalid = || format!("Invalid time '{input}'");
    if input.is_empty() {
        return Err(invalid());
    }
    let (h, m, s) = if input.contains(':') {
        let parts: Vec<&str> = input.split(':').collect();
        if parts.len() > 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
            return Err(invalid());
        }
        let nums: Vec<i64> = parts
            .iter()
            .map(|p| p.parse::<i64>().map_err(|_| invalid()))
            .collect::<Result<_, _>>()?;
        match nums.as_slice() {
            [h, m, s] => (*h, *m, *s),
            [m, s] => (0, *m, *s),
            [s] => (0, 0, *s),
            _ => return Err(invalid()),
        }
    } else {
        if input.len() > 6 || !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let padded = format!("{input:0>6}");
        let field = |r: std::ops::Range<usize>| padded[r].parse::<i64>().map_err(|_| invalid());
        (field(0..2)?, field(2..4)?, field(4..6)?)
    };
    if m >= 60 || s >= 60 {
        return Err(invalid());
    }
    let total = h * 3600 + m * 60 + s;
    if total <= 0 {
        return Err("Time must be greater than zero".to_string());
    }
    Ok(total)
}

fn format_remaining(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

const REFRESH: Duration = Duration::from_millis(250);

/// Countdown timer with an optional alarm command and cross-instance sync.
pub struct CountdownWidget {
    cfg: CountdownConfig,
    alarm_command: Option<CommandLine>,
    inhibit_command: Option<CommandLine>,
    inhibitor: Option<Child>,
    instance_name: String,
    topics: TopicBus,
    store: JsonCache<PersistedEnd>,
    end: Option<i64>,
    alarm: bool,
    input: String,
    input_error: Option<String>,
    incoming: Rc<RefCell<Vec<String>>>,
    sync: Option<Subscription>,
    timer: ScheduledTimer,
}

impl CountdownWidget {
    pub fn new(cfg: CountdownConfig, root: RootHandle) -> anyhow::Result<Self> {
        let root = root.get()?;
        let alarm_command = cfg.alarm_command.as_deref().map(CommandLine::parse).transpose()?;
        let inhibit_command = if cfg.disable_screensaver_while_active {
            Some(CommandLine::parse(&cfg.inhibit_command)?)
        } else {
            None
        };
        Ok(Self {
            cfg,
            alarm_command,
            inhibit_command,
            inhibitor: None,
            instance_name: root.instance_name().to_string(),
            topics: root.topics(),
            store: JsonCache::new(root.cache_dir("timer").file("end_time", "json")),
            end: None,
            alarm: false,
            input: String::new(),
            input_error: None,
            incoming: Rc::new(RefCell::new(Vec::new())),
            sync: None,
            timer: ScheduledTimer::unbound(REFRESH),
        })
    }

    pub fn is_active(&self) -> bool {
        self.end.is_some()
    }

    pub fn is_alarming(&self) -> bool {
        self.alarm
    }

    pub fn end_time(&self) -> Option<i64> {
        self.end
    }

    /// Whether the screensaver is currently held off by this timer.
    pub fn is_inhibiting_screensaver(&mut self) -> bool {
        self.inhibitor.as_mut().is_some_and(process::is_running)
    }

    /// Start or stop the inhibitor to match the running/ringing state.
    fn update_inhibitor(&mut self) {
        let Some(command) = &self.inhibit_command else {
            return;
        };
        let wanted = self.end.is_some() || self.alarm;
        if wanted && self.inhibitor.is_none() {
            match command.spawn(&[]) {
                Ok(child) => {
                    tracing::debug!(pid = child.id(), "screensaver inhibited");
                    self.inhibitor = Some(child);
                }
                Err(e) => tracing::warn!(error = %e, "failed to inhibit screensaver"),
            }
        } else if !wanted {
            if let Some(mut child) = self.inhibitor.take() {
                tracing::debug!(pid = child.id(), "screensaver released");
                process::terminate(&mut child);
            }
        }
    }

    pub fn remaining_at(&self, now: i64) -> i64 {
        self.end.map(|end| (end - now).max(0)).unwrap_or(0)
    }

    /// Start counting towards `end`. Ignored when `end` already passed.
    pub fn start_countdown(&mut self, end: i64, now: i64, publish: bool) {
        if end <= now {
            return;
        }
        self.end = Some(end);
        self.alarm = false;
        self.timer.start();
        self.update_inhibitor();
        if let Err(e) = self.store.save(&PersistedEnd { end }) {
            tracing::warn!(error = %e, "failed to persist timer");
        }
        if publish {
            self.publish_sync(now);
        }
    }

    pub fn stop_countdown(&mut self, now: i64, publish: bool) {
        self.end = None;
        self.alarm = false;
        self.timer.stop();
        self.update_inhibitor();
        if let Err(e) = self.store.remove() {
            tracing::warn!(error = %e, "failed to remove persisted timer");
        }
        if publish {
            self.publish_sync(now);
        }
    }

    /// Validate the input field and start. The input is kept on error.
    pub fn submit_input(&mut self, now: i64) -> bool {
        match parse_duration(&self.input) {
            Ok(secs) => {
                self.input_error = None;
                self.start_countdown(now + secs, now, true);
                true
            }
            Err(msg) => {
                self.input_error = Some(msg);
                false
            }
        }
    }

    pub fn set_input(&mut self, input: &str) {
        self.input = input.to_string();
    }

    pub fn input_error(&self) -> Option<&str> {
        self.input_error.as_deref()
    }

    fn publish_sync(&self, now: i64) {
        let Some(topic) = &self.cfg.sync_topic else {
            return;
        };
        let msg = TimerSync {
            source: self.instance_name.clone(),
            time: self.end.unwrap_or(now),
            active: self.end.is_some(),
        };
        match serde_json::to_string(&msg) {
            Ok(payload) => self.topics.publish(topic, &payload, true),
            Err(e) => tracing::warn!(error = %e, "failed to encode timer sync"),
        }
    }

    /// Apply a sync message from another dashboard. Our own messages are ignored.
    pub fn apply_sync(&mut self, payload: &str, now: i64) {
        let msg: TimerSync = match serde_json::from_str(payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed timer sync message");
                return;
            }
        };
        if msg.source == self.instance_name {
            return;
        }
        if msg.active {
            self.start_countdown(msg.time, now, false);
        } else {
            self.stop_countdown(now, false);
        }
    }

    fn restore(&mut self, now: i64) {
        let Some(saved) = self.store.load() else {
            return;
        };
        if saved.end > now {
            tracing::info!(end = saved.end, "restoring running timer");
            self.start_countdown(saved.end, now, false);
        } else if let Err(e) = self.store.remove() {
            tracing::warn!(error = %e, "failed to remove expired timer");
        }
    }

    fn trigger_alarm(&mut self) {
        self.alarm = true;
        tracing::info!("timer finished");
        if let Some(cmd) = &self.alarm_command {
            if let Err(e) = cmd.spawn(&[]) {
                tracing::warn!(error = %e, "failed to run alarm command");
            }
        }
    }

    /// Advance to `now`: apply queued sync messages and fire the alarm.
    pub fn update(&mut self, now: i64) {
        let incoming: Vec<String> = self.incoming.borrow_mut().drain(..).collect();
        for payload in incoming {
            self.apply_sync(&payload, now);
        }
        if let Some(end) = self.end {
            if end <= now {
                self.end = None;
                self.timer.stop();
                if let Err(e) = self.store.remove() {
                    tracing::warn!(error = %e, "failed to remove finished timer");
                }
                self.trigger_alarm();
            }
        }
    }

    fn error_dialog(&mut self, ctx: &egui::Context, id: egui::Id) {
        let Some(msg) = self.input_error.clone() else {
            return;
        };
        let mut open = true;
        egui::Window::new("Timer")
            .id(id)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .open(&mut open)
            .show(ctx, |ui| {
                ui.label(&msg);
                if ui.button("OK").clicked() {
                    self.input_error = None;
                }
            });
        if !open {
            self.input_error = None;
        }
    }
}

impl Widget for CountdownWidget {
    fn render(&mut self, ui: &mut egui::Ui) {
        let now = unix_now();
        ui.vertical_centered(|ui| {
            let text = egui::RichText::new(format_remaining(self.remaining_at(now)))
                .monospace()
                .size(self.cfg.font_size);
            let text = if self.alarm {
                text.color(ui.visuals().error_fg_color)
            } else {
                text
            };
            ui.label(text);
            if self.is_active() || self.alarm {
                if ui.button("Stop").clicked() {
                    self.stop_countdown(now, true);
                }
            } else {
                let resp = ui.add(
                    egui::TextEdit::singleline(&mut self.input)
                        .hint_text("HH:MM:SS")
                        .desired_width(120.0),
                );
                let entered = resp.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if ui.button("Start").clicked() || entered {
                    self.submit_input(now);
                }
            }
        });
        let id = ui.id().with("timer_error");
        self.error_dialog(ui.ctx(), id);
    }

    fn start(&mut self) {
        self.restore(unix_now());
        if let Some(topic) = self.cfg.sync_topic.clone() {
            let incoming = Rc::clone(&self.incoming);
            self.sync = Some(self.topics.subscribe(&topic, move |payload| {
                incoming.borrow_mut().push(payload.clone());
            }));
        }
    }

    fn stop(&mut self) {
        self.sync = None;
        self.timer.stop();
        if let Some(mut child) = self.inhibitor.take() {
            process::terminate(&mut child);
        }
    }

    fn tick(&mut self, now: Instant) {
        let pending = !self.incoming.borrow().is_empty();
        if self.timer.poll_at(now) || pending {
            self.update(unix_now());
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_due()
    }
}

impl Drop for CountdownWidget {
    fn drop(&mut self) {
        if let Some(mut child) = self.inhibitor.take() {
            process::terminate(&mut child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_and_digit_forms() {
        assert_eq!(parse_duration("1:30"), Ok(90));
        assert_eq!(parse_duration("01:00:05"), Ok(3605));
        assert_eq!(parse_duration("130"), Ok(90));
        assert_eq!(parse_duration("010000"), Ok(3600));
        assert_eq!(parse_duration("45"), Ok(45));
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("1:75").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("1234567").is_err());
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("1::2").is_err());
    }

    #[test]
    fn remaining_is_formatted() {
        assert_eq!(format_remaining(3725), "01:02:05");
        assert_eq!(format_remaining(-4), "00:00:00");
    }
}

use super::Widget;
use crate::dashboard::dashboard::RootHandle;
use crate::dashboard::events::Subscription;
use crate::dashboard::process::{self, CommandLine};
use crate::dashboard::timer::{ScheduledTimer, VisibilitySignal};
use eframe::egui;
use serde::Deserialize;
use std::cell::RefCell;
use std::process::Child;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn default_true() -> bool {
    true
}

fn default_player() -> String {
    "mpv --no-terminal --really-quiet --force-window=no {url}".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaPlayerConfig {
    pub url: String,
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,
    /// Pause while hidden, minimized or behind the screensaver.
    #[serde(default = "default_true")]
    pub stop_on_inactive: bool,
    /// Restart the stream when the player exits on its own.
    #[serde(default)]
    pub auto_restart_playback: bool,
    /// Player command line; `{url}` is replaced by the stream url.
    #[serde(default = "default_player")]
    pub player: String,
}

/// Something that can play a stream url.
pub trait PlayerBackend {
    fn play(&mut self, url: &str) -> anyhow::Result<()>;

    fn stop(&mut self);

    fn is_playing(&mut self) -> bool;
}

/// Plays by running an external player process.
pub struct ProcessPlayer {
    command: CommandLine,
    child: Option<Child>,
}

impl ProcessPlayer {
    pub fn new(command: &str) -> anyhow::Result<Self> {
        Ok(Self {
            command: CommandLine::parse(command)?,
            child: None,
        })
    }
}

impl PlayerBackend for ProcessPlayer {
    fn play(&mut self, url: &str) -> anyhow::Result<()> {
        self.stop();
        self.child = Some(self.command.spawn(&[("url", url)])?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            process::terminate(&mut child);
        }
    }

    fn is_playing(&mut self) -> bool {
        self.child.as_mut().is_some_and(process::is_running)
    }
}

impl Drop for ProcessPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Playback state shared with the event subscriptions.
struct Playback {
    url: String,
    backend: Box<dyn PlayerBackend>,
    follow_activity: bool,
    visible: bool,
    window_active: bool,
    screensaver: bool,
    enabled: bool,
    playing: bool,
    last_error: Option<String>,
}

impl Playback {
    fn should_run(&self) -> bool {
        if !self.enabled {
            return false;
        }
        !self.follow_activity || (self.visible && self.window_active && !self.screensaver)
    }

    fn play(&mut self) {
        match self.backend.play(&self.url) {
            Ok(()) => {
                tracing::info!(url = %self.url, "playback started");
                self.playing = true;
                self.last_error = None;
            }
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "playback failed");
                self.playing = false;
                self.last_error = Some(format!("{e:#}"));
            }
        }
    }

    fn stop(&mut self) {
        if self.playing {
            tracing::info!(url = %self.url, "playback stopped");
        }
        self.playing = false;
        self.backend.stop();
    }

    fn reconcile(&mut self) {
        match (self.should_run(), self.playing) {
            (true, false) => self.play(),
            (false, true) => self.stop(),
            _ => {}
        }
    }
}

fn on_change(
    playback: &Rc<RefCell<Playback>>,
    apply: impl Fn(&mut Playback, bool) + 'static,
) -> impl FnMut(&bool) + 'static {
    let playback = Rc::downgrade(playback);
    move |value: &bool| {
        let Some(playback) = playback.upgrade() else {
            return;
        };
        let Ok(mut p) = playback.try_borrow_mut() else {
            tracing::warn!("media player busy, state change dropped");
            return;
        };
        apply(&mut p, *value);
        p.reconcile();
    }
}

const RESTART_CHECK: Duration = Duration::from_secs(5);

/// Stream player that only runs while someone can see it.
pub struct MediaPlayerWidget {
    size: Option<egui::Vec2>,
    auto_restart: bool,
    playback: Rc<RefCell<Playback>>,
    visibility: VisibilitySignal,
    subscriptions: Vec<Subscription>,
    restart: ScheduledTimer,
}

impl MediaPlayerWidget {
    pub fn new(cfg: MediaPlayerConfig, root: RootHandle) -> anyhow::Result<Self> {
        let backend = ProcessPlayer::new(&cfg.player)?;
        Self::with_backend(cfg, root, Box::new(backend))
    }

    pub fn with_backend(
        cfg: MediaPlayerConfig,
        root: RootHandle,
        backend: Box<dyn PlayerBackend>,
    ) -> anyhow::Result<Self> {
        let root = root.get()?;
        let window_active = root.window_active();
        let screensaver = root.screensaver();
        let playback = Rc::new(RefCell::new(Playback {
            url: cfg.url,
            backend,
            follow_activity: cfg.stop_on_inactive,
            visible: false,
            window_active: window_active.get(),
            screensaver: screensaver.get(),
            enabled: true,
            playing: false,
            last_error: None,
        }));
        let visibility = VisibilitySignal::new();
        let mut subscriptions = Vec::new();
        if cfg.stop_on_inactive {
            subscriptions.push(visibility.subscribe(on_change(&playback, |p, v| p.visible = v)));
            subscriptions.push(window_active.subscribe(on_change(&playback, |p, v| p.window_active = v)));
            subscriptions.push(screensaver.subscribe(on_change(&playback, |p, v| p.screensaver = v)));
        }
        let size = match (cfg.width, cfg.height) {
            (Some(w), Some(h)) => Some(egui::vec2(w, h)),
            _ => None,
        };
        Ok(Self {
            size,
            auto_restart: cfg.auto_restart_playback,
            playback,
            visibility,
            subscriptions,
            restart: ScheduledTimer::unbound(RESTART_CHECK),
        })
    }

    pub fn is_playing(&self) -> bool {
        self.playback.borrow().playing
    }

    pub fn should_run(&self) -> bool {
        self.playback.borrow().should_run()
    }

    /// User toggle; playback still follows activity while enabled.
    pub fn set_enabled(&mut self, enabled: bool) {
        let mut p = self.playback.borrow_mut();
        p.enabled = enabled;
        p.reconcile();
    }
}

impl Widget for MediaPlayerWidget {
    fn render(&mut self, ui: &mut egui::Ui) {
        let (playing, enabled, url, error) = {
            let p = self.playback.borrow();
            (p.playing, p.enabled, p.url.clone(), p.last_error.clone())
        };
        let size = self.size.unwrap_or_else(|| ui.available_size());
        ui.allocate_ui(size, |ui| {
            ui.set_min_size(size);
            egui::Frame::none()
                .fill(egui::Color32::BLACK)
                .show(ui, |ui| {
                    ui.set_min_size(size);
                    ui.vertical_centered(|ui| {
                        let state = if playing { "Playing" } else { "Stopped" };
                        ui.colored_label(egui::Color32::LIGHT_GRAY, state);
                        ui.weak(&url);
                        if let Some(error) = error {
                            ui.colored_label(ui.visuals().error_fg_color, error);
                        }
                        let label = if enabled { "Stop" } else { "Play" };
                        if ui.button(label).clicked() {
                            self.set_enabled(!enabled);
                        }
                    });
                });
        });
    }

    fn tick(&mut self, now: Instant) {
        if !self.auto_restart || !self.restart.poll_at(now) {
            return;
        }
        let mut p = self.playback.borrow_mut();
        if p.playing && p.should_run() && !p.backend.is_playing() {
            tracing::info!(url = %p.url, "player exited, restarting");
            p.play();
        }
    }

    fn visibility(&self) -> Option<&VisibilitySignal> {
        Some(&self.visibility)
    }

    fn start(&mut self) {
        if self.auto_restart {
            self.restart.start();
        }
        self.playback.borrow_mut().reconcile();
    }

    fn stop(&mut self) {
        self.subscriptions.clear();
        self.restart.stop();
        self.playback.borrow_mut().stop();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.restart.next_due()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBackend;

    impl PlayerBackend for NullBackend {
        fn play(&mut self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn is_playing(&mut self) -> bool {
            false
        }
    }

    fn playback(follow_activity: bool) -> Playback {
        Playback {
            url: "http://stream".into(),
            backend: Box::new(NullBackend),
            follow_activity,
            visible: false,
            window_active: true,
            screensaver: false,
            enabled: true,
            playing: false,
            last_error: None,
        }
    }

    #[test]
    fn should_run_needs_visible_active_and_no_screensaver() {
        let mut p = playback(true);
        assert!(!p.should_run());
        p.visible = true;
        assert!(p.should_run());
        p.screensaver = true;
        assert!(!p.should_run());
        p.screensaver = false;
        p.window_active = false;
        assert!(!p.should_run());
    }

    #[test]
    fn ignoring_activity_only_respects_the_toggle() {
        let mut p = playback(false);
        assert!(p.should_run());
        p.enabled = false;
        assert!(!p.should_run());
    }
}

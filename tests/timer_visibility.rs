use deskboard::dashboard::layout::TabGroup;
use deskboard::dashboard::widgets::ClockWidget;
use deskboard::dashboard::{
    Dashboard, DashboardConfig, ScheduledTimer, UiWaker, VisibilitySignal, Widget, WidgetFactory,
    WidgetRegistry,
};
use eframe::egui;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tempfile::tempdir;

const INTERVAL: Duration = Duration::from_secs(600);

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn hidden_bound_timer_never_fires() {
    let visibility = VisibilitySignal::new();
    let timer = ScheduledTimer::bound(INTERVAL, &visibility);
    let t0 = Instant::now();
    for step in 0..5 {
        assert!(!timer.poll_at(t0 + INTERVAL * step));
    }
    assert!(timer.next_due().is_none());
}

#[test]
fn becoming_visible_after_a_full_interval_fires_at_once() {
    let visibility = VisibilitySignal::new();
    let timer = ScheduledTimer::bound(INTERVAL, &visibility);
    let t0 = Instant::now();
    visibility.set_visible(true);
    assert!(timer.poll_at(t0));
    visibility.set_visible(false);
    assert!(!timer.poll_at(t0 + secs(700)));

    visibility.set_visible(true);
    assert!(timer.poll_at(t0 + secs(900)));
    assert!(!timer.poll_at(t0 + secs(901)));
    assert!(timer.poll_at(t0 + secs(1500)));
}

#[test]
fn becoming_visible_early_waits_for_the_rest_of_the_interval() {
    let visibility = VisibilitySignal::new();
    let timer = ScheduledTimer::bound(INTERVAL, &visibility);
    let t0 = Instant::now();
    visibility.set_visible(true);
    assert!(timer.poll_at(t0));
    visibility.set_visible(false);
    visibility.set_visible(true);
    assert!(!timer.poll_at(t0 + secs(300)));
    assert!(!timer.poll_at(t0 + secs(599)));
    assert!(timer.poll_at(t0 + INTERVAL));
}

#[test]
fn invalidate_forces_the_next_poll() {
    let timer = ScheduledTimer::unbound(INTERVAL);
    timer.start();
    let t0 = Instant::now();
    assert!(timer.poll_at(t0));
    assert!(!timer.poll_at(t0 + secs(10)));
    timer.invalidate();
    assert!(timer.poll_at(t0 + secs(11)));
    timer.stop();
    assert!(!timer.poll_at(t0 + INTERVAL * 3));
}

#[derive(Deserialize)]
struct PollerConfig {
    interval: u64,
}

/// Widget counting the firings of a visibility-bound timer.
struct Poller {
    visibility: VisibilitySignal,
    timer: ScheduledTimer,
    fired: usize,
}

impl Poller {
    fn new(cfg: PollerConfig) -> anyhow::Result<Self> {
        let visibility = VisibilitySignal::new();
        let timer = ScheduledTimer::bound(Duration::from_secs(cfg.interval), &visibility);
        Ok(Self {
            visibility,
            timer,
            fired: 0,
        })
    }
}

impl Widget for Poller {
    fn render(&mut self, _ui: &mut egui::Ui) {}

    fn tick(&mut self, now: Instant) {
        if self.timer.poll_at(now) {
            self.fired += 1;
        }
    }

    fn visibility(&self) -> Option<&VisibilitySignal> {
        Some(&self.visibility)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_due()
    }
}

fn tabbed_dashboard(dir: &std::path::Path) -> Dashboard {
    let mut reg = WidgetRegistry::with_defaults();
    reg.register("poller", WidgetFactory::new(Poller::new));
    let yaml = format!(
        "cache_dir: {}\ncentral_widget:\n  type: tabs\n  widgets:\n    - {{type: clock}}\n    - {{type: poller, interval: 600}}\n",
        dir.display()
    );
    let cfg = DashboardConfig::from_yaml_str(&yaml).unwrap();
    Dashboard::build(&cfg, &reg, UiWaker::noop(), &mut |_| {}).unwrap()
}

fn fired(dashboard: &Dashboard) -> usize {
    dashboard
        .root()
        .with_instance("poller", 0, |p: &mut Poller| p.fired)
        .unwrap()
}

fn select(dashboard: &Dashboard, index: usize) {
    dashboard
        .root()
        .with_instance("tabs", 0, |t: &mut TabGroup| t.select(index))
        .unwrap();
}

#[test]
fn tab_switches_drive_the_refresh_schedule() {
    let dir = tempdir().unwrap();
    let mut dashboard = tabbed_dashboard(dir.path());
    dashboard.start();
    let t0 = Instant::now();

    dashboard.tick(t0);
    assert_eq!(fired(&dashboard), 0);
    dashboard.tick(t0 + secs(1200));
    assert_eq!(fired(&dashboard), 0);

    select(&dashboard, 1);
    dashboard.tick(t0 + secs(1200));
    assert_eq!(fired(&dashboard), 1);

    select(&dashboard, 0);
    select(&dashboard, 1);
    dashboard.tick(t0 + secs(1500));
    assert_eq!(fired(&dashboard), 1);
    dashboard.tick(t0 + secs(1800));
    assert_eq!(fired(&dashboard), 2);

    select(&dashboard, 0);
    dashboard.tick(t0 + secs(3000));
    assert_eq!(fired(&dashboard), 2);
    select(&dashboard, 1);
    dashboard.tick(t0 + secs(3000));
    assert_eq!(fired(&dashboard), 3);
}

#[test]
fn hidden_widgets_do_not_request_wakeups() {
    let dir = tempdir().unwrap();
    let mut dashboard = tabbed_dashboard(dir.path());
    let clock_deadline = |d: &Dashboard| {
        d.root()
            .with_instance("clock", 0, |c: &mut ClockWidget| c.next_deadline())
            .unwrap()
    };
    assert!(dashboard.next_wakeup().is_none());
    dashboard.start();
    assert!(clock_deadline(&dashboard).is_some());
    assert!(dashboard.next_wakeup().is_some());

    select(&dashboard, 1);
    assert!(clock_deadline(&dashboard).is_none());
    assert!(dashboard.next_wakeup().is_some());
    dashboard.shutdown();
}

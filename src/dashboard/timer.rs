use crate::dashboard::events::{Broadcaster, Subscription};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Shown/hidden notifier carried by widgets that care about their visibility.
///
/// Starts hidden. Subscribers are only called when the state actually changes.
#[derive(Clone, Default)]
pub struct VisibilitySignal {
    visible: Rc<Cell<bool>>,
    changes: Broadcaster<bool>,
}

impl VisibilitySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    /// Returns `true` if the state changed.
    pub fn set_visible(&self, visible: bool) -> bool {
        if self.visible.replace(visible) == visible {
            return false;
        }
        self.changes.emit(&visible);
        true
    }

    pub fn subscribe(&self, callback: impl FnMut(&bool) + 'static) -> Subscription {
        self.changes.subscribe(callback)
    }
}

#[derive(Debug)]
struct TimerState {
    interval: Duration,
    active: bool,
    last_fire: Option<Instant>,
    next_due: Option<Instant>,
}

impl TimerState {
    fn activate(&mut self) {
        if !self.active {
            self.active = true;
            // Resolved on the next poll against the last firing.
            self.next_due = None;
        }
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.next_due = None;
    }

    fn due_at(&self, now: Instant) -> Instant {
        match (self.next_due, self.last_fire) {
            (Some(due), _) => due,
            (None, Some(last)) if now.saturating_duration_since(last) < self.interval => {
                last + self.interval
            }
            (None, _) => now,
        }
    }
}

/// Periodic trigger polled from the update loop.
///
/// A bound timer follows a [`VisibilitySignal`]: it is active while the widget
/// is shown. An unbound timer is started and stopped explicitly. When a timer
/// becomes active it fires on the next poll if it never fired or a full
/// interval elapsed since the last firing; otherwise it waits for the rest of
/// the interval. At most one firing is reported per poll.
pub struct ScheduledTimer {
    state: Rc<RefCell<TimerState>>,
    _visibility: Option<Subscription>,
}

impl ScheduledTimer {
    pub fn unbound(interval: Duration) -> Self {
        Self {
            state: Rc::new(RefCell::new(TimerState {
                interval,
                active: false,
                last_fire: None,
                next_due: None,
            })),
            _visibility: None,
        }
    }

    pub fn bound(interval: Duration, visibility: &VisibilitySignal) -> Self {
        let mut timer = Self::unbound(interval);
        if visibility.is_visible() {
            timer.state.borrow_mut().activate();
        }
        let state = Rc::clone(&timer.state);
        timer._visibility = Some(visibility.subscribe(move |visible| {
            let mut state = state.borrow_mut();
            if *visible {
                state.activate();
            } else {
                state.deactivate();
            }
        }));
        timer
    }

    pub fn start(&self) {
        self.state.borrow_mut().activate();
    }

    pub fn stop(&self) {
        self.state.borrow_mut().deactivate();
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    pub fn interval(&self) -> Duration {
        self.state.borrow().interval
    }

    pub fn set_interval(&self, interval: Duration) {
        let mut state = self.state.borrow_mut();
        state.interval = interval;
        state.next_due = None;
    }

    /// Forget the last firing so the next poll fires immediately.
    pub fn invalidate(&self) {
        let mut state = self.state.borrow_mut();
        state.last_fire = None;
        state.next_due = None;
    }

    /// Returns `true` when the timer fires at `now`.
    pub fn poll_at(&self, now: Instant) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return false;
        }
        let due = state.due_at(now);
        if now >= due {
            state.last_fire = Some(now);
            state.next_due = Some(now + state.interval);
            true
        } else {
            state.next_due = Some(due);
            false
        }
    }

    pub fn poll(&self) -> bool {
        self.poll_at(Instant::now())
    }

    /// When the timer next wants to be polled; `None` while inactive.
    pub fn next_due(&self) -> Option<Instant> {
        let state = self.state.borrow();
        if !state.active {
            return None;
        }
        Some(state.due_at(Instant::now()))
    }

    pub fn last_fire(&self) -> Option<Instant> {
        self.state.borrow().last_fire
    }
}

use crate::dashboard::control::ControlAction;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::mpsc::{channel, Receiver, Sender};

use super::worker::UiWaker;

type Callback<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct BroadcastInner<T> {
    next_id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

/// Single-threaded one-to-many fan-out for one event kind.
///
/// Subscribers run synchronously in subscription order. Each subscription is
/// tied to the returned [`Subscription`] guard and disappears when the guard is
/// dropped, so a callback can never outlive the widget that owns the guard.
pub struct Broadcaster<T> {
    inner: Rc<RefCell<BroadcastInner<T>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(BroadcastInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, callback: impl FnMut(&T) + 'static) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push((id, Rc::new(RefCell::new(callback))));
            id
        };
        let weak: Weak<RefCell<BroadcastInner<T>>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().subscribers.retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Deliver `event` to every current subscriber. Returns the number of
    /// callbacks invoked.
    pub fn emit(&self, event: &T) -> usize {
        // Snapshot first: callbacks may subscribe or unsubscribe while running.
        let snapshot: Vec<(u64, Callback<T>)> = self
            .inner
            .borrow()
            .subscribers
            .iter()
            .map(|(id, cb)| (*id, Rc::clone(cb)))
            .collect();
        let mut delivered = 0;
        for (id, callback) in snapshot {
            let still_subscribed = self
                .inner
                .borrow()
                .subscribers
                .iter()
                .any(|(sid, _)| *sid == id);
            if !still_subscribed {
                continue;
            }
            match callback.try_borrow_mut() {
                Ok(mut cb) => {
                    (cb)(event);
                    delivered += 1;
                }
                Err(_) => tracing::warn!(subscriber = id, "re-entrant broadcast skipped"),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

/// Guard returned by every subscribe call; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Keep the callback registered for the lifetime of the broadcaster.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// D-Bus names of the screen lockers whose `ActiveChanged` signal is honoured.
pub const KNOWN_SCREENSAVER_SERVICES: [&str; 5] = [
    "org.freedesktop.ScreenSaver",
    "org.gnome.ScreenSaver",
    "org.cinnamon.ScreenSaver",
    "org.kde.screensaver",
    "org.mate.ScreenSaver",
];

/// Broadcaster plus the last value it carried.
pub struct StateBroadcaster {
    current: Rc<Cell<bool>>,
    changes: Broadcaster<bool>,
}

impl Clone for StateBroadcaster {
    fn clone(&self) -> Self {
        Self {
            current: Rc::clone(&self.current),
            changes: self.changes.clone(),
        }
    }
}

impl StateBroadcaster {
    fn new(initial: bool) -> Self {
        Self {
            current: Rc::new(Cell::new(initial)),
            changes: Broadcaster::new(),
        }
    }

    pub fn get(&self) -> bool {
        self.current.get()
    }

    pub fn subscribe(&self, callback: impl FnMut(&bool) + 'static) -> Subscription {
        self.changes.subscribe(callback)
    }

    /// Record and broadcast `state`, even when it equals the previous value.
    pub fn emit(&self, state: bool) -> usize {
        self.current.set(state);
        self.changes.emit(&state)
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.subscriber_count()
    }
}

/// Events produced outside the update surface (bus listeners, transports,
/// signal handlers). They are queued and replayed on the update surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    WindowActive(bool),
    ScreensaverActiveChanged { service: String, active: bool },
    FakeScreensaver(bool),
    PrepareForSleep(bool),
    TopicMessage { topic: String, payload: String },
    Control(ControlAction),
}

/// Thread-safe sending half of the event queue.
#[derive(Clone)]
pub struct EventInbox {
    tx: Sender<SessionEvent>,
    waker: UiWaker,
}

impl EventInbox {
    pub fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_ok() {
            self.waker.wake();
        } else {
            tracing::debug!("event inbox closed, dropping session event");
        }
    }
}

/// The process-wide broadcasters, created once per composition root.
pub struct SessionEvents {
    window_active: StateBroadcaster,
    screensaver: StateBroadcaster,
    suspend: StateBroadcaster,
    inbox: EventInbox,
    rx: Receiver<SessionEvent>,
}

impl SessionEvents {
    pub fn new(waker: UiWaker) -> Self {
        let (tx, rx) = channel();
        Self {
            window_active: StateBroadcaster::new(true),
            screensaver: StateBroadcaster::new(false),
            suspend: StateBroadcaster::new(false),
            inbox: EventInbox { tx, waker },
            rx,
        }
    }

    pub fn window_active(&self) -> &StateBroadcaster {
        &self.window_active
    }

    pub fn screensaver(&self) -> &StateBroadcaster {
        &self.screensaver
    }

    pub fn suspend(&self) -> &StateBroadcaster {
        &self.suspend
    }

    pub fn inbox(&self) -> EventInbox {
        self.inbox.clone()
    }

    /// Called for every `ActiveChanged` signal seen on the session bus.
    pub fn screensaver_service_changed(&self, service: &str, active: bool) -> bool {
        if !KNOWN_SCREENSAVER_SERVICES.contains(&service) {
            tracing::debug!(service, "ignoring ActiveChanged from unknown service");
            return false;
        }
        tracing::info!(service, active, "screensaver state changed");
        self.screensaver.emit(active);
        true
    }

    /// Simulate a screensaver transition without a real screen locker.
    pub fn fake_screensaver(&self, active: bool) {
        tracing::info!(active, "fake screensaver state changed");
        self.screensaver.emit(active);
    }

    pub fn prepare_for_sleep(&self, sleeping: bool) {
        if sleeping {
            tracing::info!("preparing for suspend");
        } else {
            tracing::info!("resumed from suspend");
        }
        self.suspend.emit(sleeping);
    }

    pub(crate) fn take_pending(&self) -> Vec<SessionEvent> {
        self.rx.try_iter().collect()
    }
}

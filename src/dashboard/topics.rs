use crate::dashboard::events::{Broadcaster, EventInbox, SessionEvent, Subscription};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Connection to an external publish/subscribe service.
///
/// Incoming messages must be pushed into the [`EventInbox`] handed to
/// `connect`; they are dispatched on the update thread.
pub trait TopicTransport {
    fn connect(&mut self, inbox: EventInbox, topics: &[String]) -> anyhow::Result<()>;
    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()>;
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> anyhow::Result<()>;
    fn disconnect(&mut self);
}

struct BusInner {
    topics: BTreeMap<String, Broadcaster<String>>,
    transport: Option<Box<dyn TopicTransport>>,
    connected: bool,
}

/// Topic-based message bus shared by every widget of one dashboard.
#[derive(Clone)]
pub struct TopicBus {
    inner: Rc<RefCell<BusInner>>,
    inbox: EventInbox,
}

impl TopicBus {
    pub fn new(inbox: EventInbox) -> Self {
        Self {
            inner: Rc::new(RefCell::new(BusInner {
                topics: BTreeMap::new(),
                transport: None,
                connected: false,
            })),
            inbox,
        }
    }

    /// Register `callback` for messages on exactly `topic`.
    pub fn subscribe(&self, topic: &str, callback: impl FnMut(&String) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let is_new = !inner.topics.contains_key(topic);
        let bus = inner.topics.entry(topic.to_string()).or_default().clone();
        if is_new && inner.connected {
            if let Some(transport) = inner.transport.as_mut() {
                if let Err(e) = transport.subscribe(topic) {
                    tracing::warn!(topic, error = %e, "transport subscribe failed");
                }
            }
        }
        drop(inner);
        bus.subscribe(callback)
    }

    pub fn publish(&self, topic: &str, payload: &str, retain: bool) {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            tracing::debug!(topic, "no transport connected, message dropped");
            return;
        }
        if let Some(transport) = inner.transport.as_mut() {
            if let Err(e) = transport.publish(topic, payload, retain) {
                tracing::warn!(topic, error = %e, "publish failed");
            }
        }
    }

    /// Deliver an incoming message to the callbacks of its topic.
    pub fn dispatch(&self, topic: &str, payload: &str) -> usize {
        let bus = self.inner.borrow().topics.get(topic).cloned();
        match bus {
            Some(bus) => bus.emit(&payload.to_string()),
            None => {
                tracing::trace!(topic, "message for topic without subscribers");
                0
            }
        }
    }

    /// Topics with at least one live subscriber.
    pub fn topics(&self) -> Vec<String> {
        self.inner
            .borrow()
            .topics
            .iter()
            .filter(|(_, bus)| bus.subscriber_count() > 0)
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn set_transport(&self, transport: Box<dyn TopicTransport>) {
        let mut inner = self.inner.borrow_mut();
        if inner.connected {
            if let Some(old) = inner.transport.as_mut() {
                old.disconnect();
            }
            inner.connected = false;
        }
        inner.transport = Some(transport);
    }

    pub fn connect(&self) -> anyhow::Result<()> {
        let topics = self.topics();
        let mut inner = self.inner.borrow_mut();
        let Some(transport) = inner.transport.as_mut() else {
            anyhow::bail!("no topic transport configured");
        };
        transport.connect(self.inbox.clone(), &topics)?;
        inner.connected = true;
        tracing::info!(topics = topics.len(), "topic bus connected");
        Ok(())
    }

    pub fn disconnect(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return;
        }
        if let Some(transport) = inner.transport.as_mut() {
            transport.disconnect();
        }
        inner.connected = false;
        tracing::info!("topic bus disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().connected
    }
}

/// Transport that echoes every published message back through the inbox.
#[derive(Default)]
pub struct LoopbackTransport {
    inbox: Option<EventInbox>,
}

impl TopicTransport for LoopbackTransport {
    fn connect(&mut self, inbox: EventInbox, _topics: &[String]) -> anyhow::Result<()> {
        self.inbox = Some(inbox);
        Ok(())
    }

    fn subscribe(&mut self, _topic: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str, _retain: bool) -> anyhow::Result<()> {
        let Some(inbox) = &self.inbox else {
            anyhow::bail!("loopback transport is not connected");
        };
        inbox.send(SessionEvent::TopicMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.inbox = None;
    }
}

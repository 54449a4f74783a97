use crate::dashboard::control::parse_flag;
use crate::dashboard::dashboard::RootHandle;
use crate::dashboard::events::{EventInbox, SessionEvent, Subscription};
use crate::dashboard::process::{self, CommandLine};
use crate::dashboard::topics::{LoopbackTransport, TopicBus, TopicTransport};
use crate::dashboard::widgets::Plugin;
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    1883
}

fn default_subscribe_command() -> String {
    "mosquitto_sub -h {host} -p {port} {username_flag} {username} {password_flag} {password} -v -t {topic}"
        .into()
}

fn default_publish_command() -> String {
    "mosquitto_pub -h {host} -p {port} {username_flag} {username} {password_flag} {password} {retain} -t {topic} -m {payload}"
        .into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicBusConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Long running command printing `topic payload` lines.
    #[serde(default = "default_subscribe_command")]
    pub subscribe_command: String,
    /// One-shot command publishing a single message.
    #[serde(default = "default_publish_command")]
    pub publish_command: String,
    /// Echo published messages locally instead of running any command.
    #[serde(default)]
    pub loopback: bool,
    /// Topic whose payload switches the fake screensaver on and off.
    #[serde(default)]
    pub fake_screensaver_topic: Option<String>,
}

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// One listener process per topic, restarted until the transport disconnects.
struct Listener {
    child: Arc<Mutex<Option<Child>>>,
}

/// Transport driving command line publish/subscribe clients.
pub struct CommandTransport {
    subscribe: CommandLine,
    publish: CommandLine,
    vars: Vec<(String, String)>,
    inbox: Option<EventInbox>,
    stop: Arc<AtomicBool>,
    listeners: Vec<Listener>,
}

impl CommandTransport {
    pub fn new(cfg: &TopicBusConfig) -> anyhow::Result<Self> {
        let username = cfg.username.clone().unwrap_or_default();
        let password = cfg.password.clone().unwrap_or_default();
        // Flags render empty, and so vanish, when the credential is unset.
        let flag = |value: &str, name: &str| if value.is_empty() { String::new() } else { name.to_string() };
        let vars = vec![
            ("host".to_string(), cfg.host.clone()),
            ("port".to_string(), cfg.port.to_string()),
            ("username_flag".to_string(), flag(&username, "-u")),
            ("password_flag".to_string(), flag(&password, "-P")),
            ("username".to_string(), username),
            ("password".to_string(), password),
        ];
        Ok(Self {
            subscribe: CommandLine::parse(&cfg.subscribe_command)?,
            publish: CommandLine::parse(&cfg.publish_command)?,
            vars,
            inbox: None,
            stop: Arc::new(AtomicBool::new(false)),
            listeners: Vec::new(),
        })
    }

    fn vars<'a>(&'a self, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut vars: Vec<(&str, &str)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        vars.extend_from_slice(extra);
        vars
    }

    fn listen(&mut self, topic: &str) -> anyhow::Result<()> {
        let Some(inbox) = self.inbox.clone() else {
            anyhow::bail!("transport is not connected");
        };
        let args = self.subscribe.render(&self.vars(&[("topic", topic)]))?;
        let slot: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));
        let stop = Arc::clone(&self.stop);
        let thread_slot = Arc::clone(&slot);
        let topic = topic.to_string();
        std::thread::Builder::new()
            .name(format!("worker-topic-{topic}"))
            .spawn(move || listener_loop(args, topic, inbox, stop, thread_slot))?;
        self.listeners.push(Listener { child: slot });
        Ok(())
    }
}

fn listener_loop(
    args: Vec<String>,
    topic: String,
    inbox: EventInbox,
    stop: Arc<AtomicBool>,
    slot: Arc<Mutex<Option<Child>>>,
) {
    let Some((program, rest)) = args.split_first() else {
        return;
    };
    while !stop.load(Ordering::SeqCst) {
        let spawned = std::process::Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(%topic, error = %e, "subscriber failed to start");
                std::thread::sleep(RETRY_DELAY);
                continue;
            }
        };
        tracing::info!(%topic, pid = child.id(), "subscribed");
        let stdout = child.stdout.take();
        match slot.lock() {
            Ok(mut guard) => *guard = Some(child),
            Err(_) => return,
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if let Some(stdout) = stdout {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                let (msg_topic, payload) = match line.split_once(' ') {
                    Some((t, p)) => (t.to_string(), p.to_string()),
                    None => (line.clone(), String::new()),
                };
                inbox.send(SessionEvent::TopicMessage {
                    topic: msg_topic,
                    payload,
                });
            }
        }
        if let Ok(mut guard) = slot.lock() {
            if let Some(mut child) = guard.take() {
                process::terminate(&mut child);
            }
        }
        if !stop.load(Ordering::SeqCst) {
            tracing::warn!(%topic, "subscriber exited, retrying");
            std::thread::sleep(RETRY_DELAY);
        }
    }
    if let Ok(mut guard) = slot.lock() {
        if let Some(mut child) = guard.take() {
            process::terminate(&mut child);
        }
    }
}

impl TopicTransport for CommandTransport {
    fn connect(&mut self, inbox: EventInbox, topics: &[String]) -> anyhow::Result<()> {
        self.stop = Arc::new(AtomicBool::new(false));
        self.inbox = Some(inbox);
        for topic in topics {
            self.listen(topic)?;
        }
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        self.listen(topic)
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> anyhow::Result<()> {
        let retain_flag = if retain { "-r" } else { "" };
        let mut cmd = self
            .publish
            .command(&self.vars(&[("topic", topic), ("payload", payload), ("retain", retain_flag)]))?;
        cmd.stdin(Stdio::null());
        let topic = topic.to_string();
        std::thread::Builder::new()
            .name("worker-topic-publish".into())
            .spawn(move || match cmd.status() {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::warn!(%topic, %status, "publish command failed"),
                Err(e) => tracing::warn!(%topic, error = %e, "publish command did not run"),
            })?;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for listener in self.listeners.drain(..) {
            if let Ok(mut guard) = listener.child.lock() {
                if let Some(mut child) = guard.take() {
                    process::terminate(&mut child);
                }
            }
        }
        self.inbox = None;
    }
}

impl Drop for CommandTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Owns the topic transport of the dashboard.
///
/// Connects when started, disconnects when stopped and reconnects after a
/// resume from suspend.
pub struct TopicBusPlugin {
    bus: TopicBus,
    subscriptions: Vec<Subscription>,
}

impl TopicBusPlugin {
    pub fn new(cfg: TopicBusConfig, root: RootHandle) -> anyhow::Result<Self> {
        let inner = root.get()?;
        let bus = inner.topics();
        let transport: Box<dyn TopicTransport> = if cfg.loopback {
            Box::new(LoopbackTransport::default())
        } else {
            Box::new(CommandTransport::new(&cfg)?)
        };
        bus.set_transport(transport);

        let mut subscriptions = Vec::new();
        if let Some(topic) = &cfg.fake_screensaver_topic {
            let root = root.clone();
            subscriptions.push(bus.subscribe(topic, move |payload| match parse_flag(payload) {
                Some(active) => {
                    if let Some(root) = root.upgrade() {
                        root.set_fake_screensaver(active);
                    }
                }
                None => tracing::warn!(%payload, "unrecognised fake screensaver payload"),
            }));
        }
        let resume_bus = bus.clone();
        subscriptions.push(inner.suspend().subscribe(move |sleeping| {
            if *sleeping || !resume_bus.is_connected() {
                return;
            }
            tracing::info!("resumed from suspend, reconnecting topic bus");
            resume_bus.disconnect();
            if let Err(e) = resume_bus.connect() {
                tracing::error!(error = %e, "topic bus reconnect failed");
            }
        }));
        Ok(Self { bus, subscriptions })
    }

    pub fn bus(&self) -> &TopicBus {
        &self.bus
    }
}

impl Plugin for TopicBusPlugin {
    fn start_plugin(&mut self) -> anyhow::Result<()> {
        self.bus.connect()
    }

    fn stop_plugin(&mut self) {
        self.subscriptions.clear();
        self.bus.disconnect();
    }
}

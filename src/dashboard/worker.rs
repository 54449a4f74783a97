use crate::dashboard::error::panic_message;
use eframe::egui;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Handle used by background threads to wake the update loop.
///
/// The egui context only exists once the window is up, so the waker is created
/// empty and filled in by the app creator. Wakes before that are dropped; the
/// first frame drains everything anyway.
#[derive(Clone, Default)]
pub struct UiWaker {
    ctx: Arc<OnceLock<egui::Context>>,
}

impl UiWaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waker that never wakes anything. Used by tests and headless builds.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn install(&self, ctx: &egui::Context) {
        let _ = self.ctx.set(ctx.clone());
    }

    pub fn wake(&self) {
        if let Some(ctx) = self.ctx.get() {
            ctx.request_repaint();
        }
    }
}

/// What happens when `start` is called while a run is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPolicy {
    /// Ignore the request.
    Coalesce,
    /// Remember one re-run and start it once the in-flight run completes.
    Queue,
    /// Spawn another run; whichever completes last wins.
    Race,
}

enum RunOutcome<T> {
    Delivered(T),
    Failed(String),
}

type Job<T> = Arc<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

/// A restartable unit of work executed on its own thread.
///
/// Results come back through a channel and are only observed by calling
/// [`drain`](Self::drain) on the update thread. A run that fails or panics is
/// logged and delivers nothing.
pub struct BackgroundWorker<T: Send + 'static> {
    name: String,
    policy: RunPolicy,
    job: Job<T>,
    tx: Sender<RunOutcome<T>>,
    rx: Receiver<RunOutcome<T>>,
    in_flight: usize,
    pending: bool,
    failures: usize,
    last_error: Option<String>,
    waker: UiWaker,
}

impl<T: Send + 'static> BackgroundWorker<T> {
    pub fn new(
        name: impl Into<String>,
        policy: RunPolicy,
        waker: UiWaker,
        job: impl Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = channel();
        Self {
            name: name.into(),
            policy,
            job: Arc::new(job),
            tx,
            rx,
            in_flight: 0,
            pending: false,
            failures: 0,
            last_error: None,
            waker,
        }
    }

    pub fn policy(&self) -> RunPolicy {
        self.policy
    }

    pub fn is_running(&self) -> bool {
        self.in_flight > 0
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Number of runs that failed or panicked since creation.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Diagnostic of the most recent failed or panicked run.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Request a run. Returns `true` if a thread was spawned.
    pub fn start(&mut self) -> bool {
        if self.in_flight > 0 {
            match self.policy {
                RunPolicy::Coalesce => {
                    tracing::debug!(worker = %self.name, "run already in flight, ignoring start");
                    return false;
                }
                RunPolicy::Queue => {
                    self.pending = true;
                    return false;
                }
                RunPolicy::Race => {}
            }
        }
        self.spawn()
    }

    fn spawn(&mut self) -> bool {
        let job = Arc::clone(&self.job);
        let tx = self.tx.clone();
        let waker = self.waker.clone();
        let name = self.name.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("worker-{}", self.name))
            .spawn(move || {
                let outcome = match catch_unwind(AssertUnwindSafe(|| job())) {
                    Ok(Ok(value)) => RunOutcome::Delivered(value),
                    Ok(Err(e)) => {
                        tracing::error!(worker = %name, error = ?e, "background run failed");
                        RunOutcome::Failed(format!("{e:#}"))
                    }
                    Err(payload) => {
                        let message = panic_message(&*payload);
                        tracing::error!(worker = %name, panic = %message, "background run panicked");
                        RunOutcome::Failed(format!("panicked: {message}"))
                    }
                };
                if tx.send(outcome).is_ok() {
                    waker.wake();
                }
            });
        match spawned {
            Ok(_) => {
                self.in_flight += 1;
                true
            }
            Err(e) => {
                tracing::error!(worker = %self.name, error = %e, "failed to spawn worker thread");
                false
            }
        }
    }

    fn record(&mut self, outcome: RunOutcome<T>, out: &mut Vec<T>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            RunOutcome::Delivered(value) => out.push(value),
            RunOutcome::Failed(message) => {
                self.failures += 1;
                self.last_error = Some(message);
            }
        }
    }

    fn restart_pending(&mut self) {
        if self.pending && self.in_flight == 0 {
            self.pending = false;
            self.spawn();
        }
    }

    /// Collect every completed result in completion order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            self.record(outcome, &mut out);
        }
        self.restart_pending();
        out
    }

    /// The most recently completed result, if any run finished since the last call.
    pub fn latest(&mut self) -> Option<T> {
        self.drain().pop()
    }

    /// Block until no run is in flight or `timeout` expires, collecting results.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<T> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        loop {
            out.extend(self.drain());
            if self.in_flight == 0 {
                break;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok(outcome) => self.record(outcome, &mut out),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn coalesce_ignores_start_while_running() {
        let gate = Arc::new(Mutex::new(()));
        let guard = gate.lock().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = {
            let gate = Arc::clone(&gate);
            let runs = Arc::clone(&runs);
            BackgroundWorker::new("coalesce", RunPolicy::Coalesce, UiWaker::noop(), move || {
                let _g = gate.lock().unwrap();
                Ok(runs.fetch_add(1, Ordering::SeqCst))
            })
        };
        assert!(worker.start());
        assert!(!worker.start());
        drop(guard);
        assert_eq!(worker.wait_idle(WAIT), vec![0]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_collapses_requests_into_one_rerun() {
        let gate = Arc::new(Mutex::new(()));
        let guard = gate.lock().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = {
            let gate = Arc::clone(&gate);
            let runs = Arc::clone(&runs);
            BackgroundWorker::new("queue", RunPolicy::Queue, UiWaker::noop(), move || {
                let _g = gate.lock().unwrap();
                Ok(runs.fetch_add(1, Ordering::SeqCst))
            })
        };
        assert!(worker.start());
        assert!(!worker.start());
        assert!(!worker.start());
        drop(guard);
        assert_eq!(worker.wait_idle(WAIT), vec![0, 1]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn race_runs_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let mut worker = {
            let barrier = Arc::clone(&barrier);
            BackgroundWorker::new("race", RunPolicy::Race, UiWaker::noop(), move || {
                barrier.wait();
                Ok(())
            })
        };
        assert!(worker.start());
        assert!(worker.start());
        assert_eq!(worker.in_flight(), 2);
        assert_eq!(worker.wait_idle(WAIT).len(), 2);
    }

    #[test]
    fn errors_deliver_nothing() {
        let mut worker: BackgroundWorker<u32> =
            BackgroundWorker::new("err", RunPolicy::Coalesce, UiWaker::noop(), || {
                anyhow::bail!("service unavailable")
            });
        worker.start();
        assert!(worker.wait_idle(WAIT).is_empty());
        assert_eq!(worker.failures(), 1);
        assert!(!worker.is_running());
    }
}

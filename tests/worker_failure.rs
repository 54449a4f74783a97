use deskboard::dashboard::data_cache::Fetcher;
use deskboard::dashboard::widgets::{NewsConfig, NewsItem, NewsSource, NewsWidget};
use deskboard::dashboard::{
    BackgroundWorker, Dashboard, DashboardConfig, RunPolicy, ScheduledTimer, UiWaker,
    WidgetFactory, WidgetRegistry,
};
use deskboard::dashboard::layout::TabGroup;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(5);

const OK: usize = 0;
const FAIL: usize = 1;
const PANIC: usize = 2;

fn scripted(mode: &Arc<AtomicUsize>, policy: RunPolicy) -> BackgroundWorker<u32> {
    let mode = Arc::clone(mode);
    let runs = Arc::new(AtomicUsize::new(0));
    BackgroundWorker::new("scripted", policy, UiWaker::noop(), move || {
        let run = runs.fetch_add(1, Ordering::SeqCst) as u32;
        match mode.load(Ordering::SeqCst) {
            OK => Ok(run),
            FAIL => anyhow::bail!("connection refused"),
            _ => panic!("scripted panic"),
        }
    })
}

#[test]
fn failed_and_panicked_runs_keep_previous_data() {
    let mode = Arc::new(AtomicUsize::new(OK));
    let mut worker = scripted(&mode, RunPolicy::Coalesce);
    let mut shown: Option<u32> = None;

    worker.start();
    if let Some(v) = worker.wait_idle(WAIT).pop() {
        shown = Some(v);
    }
    assert_eq!(shown, Some(0));

    mode.store(FAIL, Ordering::SeqCst);
    worker.start();
    if let Some(v) = worker.wait_idle(WAIT).pop() {
        shown = Some(v);
    }
    assert_eq!(shown, Some(0));
    assert_eq!(worker.failures(), 1);
    assert_eq!(worker.last_error(), Some("connection refused"));

    mode.store(PANIC, Ordering::SeqCst);
    worker.start();
    assert!(worker.wait_idle(WAIT).is_empty());
    assert_eq!(worker.failures(), 2);
    assert_eq!(worker.last_error(), Some("panicked: scripted panic"));
    assert!(!worker.is_running());

    mode.store(OK, Ordering::SeqCst);
    assert!(worker.start());
    assert_eq!(worker.wait_idle(WAIT), vec![3]);
}

#[test]
fn failure_does_not_change_the_cadence() {
    let mode = Arc::new(AtomicUsize::new(FAIL));
    let mut worker = scripted(&mode, RunPolicy::Coalesce);
    let timer = ScheduledTimer::unbound(Duration::from_secs(60));
    timer.start();
    let t0 = Instant::now();

    assert!(timer.poll_at(t0));
    worker.start();
    assert!(worker.wait_idle(WAIT).is_empty());
    assert!(!timer.poll_at(t0 + Duration::from_secs(1)));
    assert!(!timer.poll_at(t0 + Duration::from_secs(59)));
    assert!(timer.poll_at(t0 + Duration::from_secs(60)));
}

#[test]
fn queued_rerun_still_happens_after_a_failure() {
    let mode = Arc::new(AtomicUsize::new(FAIL));
    let gate = Arc::new(Mutex::new(()));
    let guard = gate.lock().unwrap();
    let mut worker = {
        let gate = Arc::clone(&gate);
        let mode = Arc::clone(&mode);
        BackgroundWorker::new("gated", RunPolicy::Queue, UiWaker::noop(), move || {
            let _g = gate.lock().unwrap();
            match mode.load(Ordering::SeqCst) {
                OK => Ok("fresh"),
                _ => anyhow::bail!("not yet"),
            }
        })
    };
    assert!(worker.start());
    assert!(!worker.start());
    mode.store(OK, Ordering::SeqCst);
    drop(guard);
    let results = worker.wait_idle(WAIT);
    // The first run may observe either mode; the queued one sees OK.
    assert_eq!(results.last(), Some(&"fresh"));
}

struct ScriptedSource {
    fail: AtomicUsize,
    items: Mutex<Vec<NewsItem>>,
    marked: Mutex<Vec<i64>>,
    refused: Mutex<HashSet<i64>>,
}

impl ScriptedSource {
    fn with_items(items: Vec<NewsItem>) -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicUsize::new(OK),
            items: Mutex::new(items),
            marked: Mutex::new(Vec::new()),
            refused: Mutex::new(HashSet::new()),
        })
    }
}

impl NewsSource for ScriptedSource {
    fn fetch(&self) -> anyhow::Result<Vec<NewsItem>> {
        if self.fail.load(Ordering::SeqCst) != OK {
            anyhow::bail!("news server unavailable");
        }
        Ok(self.items.lock().unwrap().clone())
    }

    fn mark_read(&self, id: i64) -> anyhow::Result<()> {
        if self.refused.lock().unwrap().contains(&id) {
            anyhow::bail!("item {id} is locked");
        }
        self.marked.lock().unwrap().push(id);
        Ok(())
    }
}

struct NoFetch;

impl Fetcher for NoFetch {
    fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("offline: {url}")
    }
}

fn item(id: i64, title: &str) -> NewsItem {
    NewsItem {
        id,
        title: title.into(),
        url: format!("https://news.example/{id}"),
        feed: "Feed".into(),
        folder: "Folder".into(),
        pub_date: 1_700_000_000 + id,
        favicon: None,
    }
}

fn news_dashboard(dir: &std::path::Path, source: &Arc<ScriptedSource>, extra: &str) -> Dashboard {
    let mut reg = WidgetRegistry::with_defaults();
    let source = Arc::clone(source);
    reg.register(
        "news",
        WidgetFactory::with_root(move |cfg: NewsConfig, root| {
            NewsWidget::with_source(cfg, root, source.clone(), Arc::new(NoFetch))
        }),
    );
    let yaml = format!(
        r#"
cache_dir: {}
central_widget:
  type: tabs
  widgets:
    - type: clock
    - type: news
      tab_id: news
      tab_title: News
      nextcloud_url: https://cloud.example
      username: me
      password: secret
      tab_id_status: news
{extra}"#,
        dir.display()
    );
    let cfg = DashboardConfig::from_yaml_str(&yaml).unwrap();
    Dashboard::build(&cfg, &reg, UiWaker::noop(), &mut |_| {}).unwrap()
}

fn with_news<R>(dashboard: &Dashboard, f: impl FnOnce(&mut NewsWidget) -> R) -> R {
    dashboard.root().with_instance("news", 0, f).unwrap()
}

#[test]
fn news_keeps_its_list_when_a_refresh_fails() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::with_items(vec![item(1, "first"), item(2, "second")]);
    let mut dashboard = news_dashboard(dir.path(), &source, "");
    dashboard.start();

    with_news(&dashboard, |news| {
        news.refresh_now();
        news.wait_for_fetch(WAIT);
        assert_eq!(news.items().len(), 2);
        // Fetched while hidden, so nothing has been seen yet.
        assert_eq!(news.unseen_count(), 2);
    });
    let (strip, index) = dashboard.root().tab_by_id("news");
    let strip = strip.unwrap();
    assert_eq!(strip.title(index).as_deref(), Some("News (2)"));
    assert!(strip.is_highlighted(index));

    source.fail.store(FAIL, Ordering::SeqCst);
    source.items.lock().unwrap().push(item(3, "third"));
    with_news(&dashboard, |news| {
        news.refresh_now();
        news.wait_for_fetch(WAIT);
        assert_eq!(news.items().len(), 2);
    });
    assert!(dashboard.errors().is_empty());
}

#[test]
fn showing_the_news_tab_marks_items_seen() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::with_items(vec![item(7, "only")]);
    let mut dashboard = news_dashboard(dir.path(), &source, "");
    dashboard.start();
    with_news(&dashboard, |news| {
        news.refresh_now();
        news.wait_for_fetch(WAIT);
    });

    dashboard
        .root()
        .with_instance("tabs", 0, |t: &mut TabGroup| t.select(1))
        .unwrap();
    dashboard.tick(Instant::now());
    assert_eq!(with_news(&dashboard, |news| news.unseen_count()), 0);
    let (strip, index) = dashboard.root().tab_by_id("news");
    assert_eq!(strip.unwrap().title(index).as_deref(), Some("News"));
}

#[test]
fn failed_mark_read_keeps_the_rest_of_the_batch() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::with_items(Vec::new());
    source.refused.lock().unwrap().insert(2);
    let mut dashboard = news_dashboard(dir.path(), &source, "");
    dashboard.start();

    let marked = with_news(&dashboard, |news| {
        news.mark_read(1);
        news.mark_read(2);
        news.mark_read(3);
        news.wait_for_marks(WAIT)
    });
    assert_eq!(marked, 2);
    let mut done = source.marked.lock().unwrap().clone();
    done.sort();
    assert_eq!(done, [1, 3]);
    assert_eq!(with_news(&dashboard, |news| news.pending_marks()), [2]);

    source.refused.lock().unwrap().clear();
    let marked = with_news(&dashboard, |news| {
        news.retry_marks();
        news.wait_for_marks(WAIT)
    });
    assert_eq!(marked, 1);
    assert!(with_news(&dashboard, |news| news.pending_marks()).is_empty());
    assert_eq!(source.marked.lock().unwrap().len(), 3);
}

#[cfg(unix)]
#[test]
fn context_menu_command_runs_then_marks_the_item() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("archived.txt");
    let source = ScriptedSource::with_items(vec![item(7, "only")]);
    let extra = format!(
        "      context_menu_items:\n        - title: Archive\n          command: \"sh -c 'echo {{id}} {{feed}} > {}'\"\n          mark_as_read: true\n        - type: separator\n",
        out.display()
    );
    let mut dashboard = news_dashboard(dir.path(), &source, &extra);
    dashboard.start();

    with_news(&dashboard, |news| {
        news.refresh_now();
        news.wait_for_fetch(WAIT);
        let item = news.items()[0].clone();
        news.run_menu_entry(0, &item).unwrap();
        assert!(news.run_menu_entry(5, &item).is_err());
    });

    let deadline = Instant::now() + WAIT;
    while source.marked.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "item was never marked read");
        dashboard.tick(Instant::now());
        with_news(&dashboard, |news| news.wait_for_marks(Duration::from_millis(50)));
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(*source.marked.lock().unwrap(), [7]);
    assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "7 Feed");
}

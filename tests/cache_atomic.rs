use deskboard::dashboard::data_cache::{atomic_write, CacheDir, JsonCache};
use deskboard::dashboard::widgets::CountdownWidget;
use deskboard::dashboard::{Dashboard, DashboardConfig, UiWaker, WidgetRegistry};
use serde::{Deserialize, Serialize};
use std::fs;
use tempfile::tempdir;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Snapshot {
    items: Vec<String>,
}

#[test]
fn interrupted_write_leaves_the_previous_file_intact() {
    let dir = tempdir().unwrap();
    let cache: JsonCache<Snapshot> = JsonCache::new(dir.path().join("news.json"));
    cache
        .save(&Snapshot {
            items: vec!["a".into(), "b".into()],
        })
        .unwrap();

    // What a crash between writing the temp file and renaming it leaves behind.
    fs::write(dir.path().join(".tmpAbC123"), b"{\"items\": [\"a\", \"b\", \"c").unwrap();

    assert_eq!(
        cache.load(),
        Some(Snapshot {
            items: vec!["a".into(), "b".into()],
        })
    );
    cache
        .save(&Snapshot {
            items: vec!["c".into()],
        })
        .unwrap();
    assert_eq!(cache.load().unwrap().items, ["c"]);
}

#[test]
fn atomic_write_creates_parents_and_replaces_whole_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deep").join("nested").join("blob.bin");
    atomic_write(&path, &[1u8; 4096]).unwrap();
    atomic_write(&path, b"short").unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"short");
    let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .flatten()
        .map(|e| e.file_name())
        .collect();
    assert_eq!(leftovers, ["blob.bin"]);
}

#[test]
fn feature_directories_are_separated_per_key() {
    let dir = tempdir().unwrap();
    let root = CacheDir::new(dir.path());
    let icons = root.subdir("news").subdir("favicons");
    assert_eq!(icons.path(), dir.path().join("news").join("favicons"));
    assert_eq!(
        root.subdir("news").file("https://cloud.example/", "json"),
        dir.path().join("news").join("https___cloud.example_.json")
    );
    assert!(!icons.path().exists());
    icons.ensure().unwrap();
    assert!(icons.path().is_dir());
}

fn timer_dashboard(dir: &std::path::Path) -> Dashboard {
    let yaml = format!(
        "cache_dir: {}\ninstance_name: desk\ncentral_widget: {{type: timer}}\n",
        dir.display()
    );
    let cfg = DashboardConfig::from_yaml_str(&yaml).unwrap();
    Dashboard::build(&cfg, &WidgetRegistry::with_defaults(), UiWaker::noop(), &mut |_| {}).unwrap()
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[test]
fn running_countdown_survives_a_restart() {
    let dir = tempdir().unwrap();
    let end = unix_now() + 3600;
    {
        let mut dashboard = timer_dashboard(dir.path());
        dashboard.start();
        dashboard
            .root()
            .with_instance("timer", 0, |t: &mut CountdownWidget| {
                t.start_countdown(end, unix_now(), false)
            })
            .unwrap();
        dashboard.shutdown();
    }
    assert!(dir.path().join("timer").join("end_time.json").exists());

    let mut dashboard = timer_dashboard(dir.path());
    dashboard.start();
    let restored = dashboard
        .root()
        .with_instance("timer", 0, |t: &mut CountdownWidget| t.end_time())
        .unwrap();
    assert_eq!(restored, Some(end));
}

#[test]
fn expired_countdown_is_discarded_on_start() {
    let dir = tempdir().unwrap();
    let stored = dir.path().join("timer").join("end_time.json");
    atomic_write(&stored, format!("{{\"end\": {}}}", unix_now() - 10).as_bytes()).unwrap();

    let mut dashboard = timer_dashboard(dir.path());
    dashboard.start();
    let active = dashboard
        .root()
        .with_instance("timer", 0, |t: &mut CountdownWidget| t.is_active())
        .unwrap();
    assert!(!active);
    assert!(!stored.exists());
}

use std::{fs, thread::sleep, time::Duration};

use serial_test::serial;
use tempfile::tempdir;

// The global subscriber can only be installed once per process, so everything
// that depends on it lives in one test.
#[test]
#[serial]
fn writes_log_file_and_keeps_first_subscriber() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logs").join("deskboard.log");

    deskboard::logging::init(false, Some(path.clone()));
    tracing::info!("dashboard phase");
    tracing::debug!("hidden below info");

    let other = dir.path().join("other.log");
    deskboard::logging::init(true, Some(other.clone()));
    tracing::info!("second init");

    sleep(Duration::from_millis(100));

    assert!(path.exists(), "log file was not created");
    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("dashboard phase"));
    assert!(contents.contains("second init"));
    assert!(!contents.contains("hidden below info"));
    assert!(!contents.contains('\u{1b}'), "file output must not carry ansi codes");
    let other = fs::read_to_string(&other).unwrap_or_default();
    assert!(!other.contains("second init"), "second init must not replace the subscriber");
}

use deskboard::pid_file::{read_pid, PidFile};
use std::fs;
use tempfile::tempdir;

#[test]
fn acquire_records_our_pid_and_drop_removes_it() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run").join("deskboard.pid");
    {
        let guard = PidFile::acquire(&path).unwrap();
        assert_eq!(guard.path(), path.as_path());
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }
    assert!(!path.exists());
}

#[test]
fn stale_or_garbage_pid_is_replaced() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deskboard.pid");
    fs::write(&path, "not a pid").unwrap();
    let guard = PidFile::acquire(&path).unwrap();
    assert_eq!(read_pid(&path), Some(std::process::id()));
    drop(guard);

    // A pid that cannot belong to a live process.
    fs::write(&path, u32::MAX.to_string()).unwrap();
    let _guard = PidFile::acquire(&path).unwrap();
    assert_eq!(read_pid(&path), Some(std::process::id()));
}

#[test]
fn file_taken_over_by_another_instance_is_left_alone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deskboard.pid");
    let guard = PidFile::acquire(&path).unwrap();
    fs::write(&path, "4242").unwrap();
    drop(guard);
    assert_eq!(read_pid(&path), Some(4242));
}

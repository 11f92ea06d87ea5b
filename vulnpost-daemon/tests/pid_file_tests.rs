//! PID file handling tests.

use vulnpost_daemon::orchestrator::{remove_pid_file, write_pid_file};

#[test]
fn pid_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("vulnpost.pid");

    write_pid_file(&pid_file).unwrap();
    assert!(pid_file.exists());

    let content = std::fs::read_to_string(&pid_file).unwrap();
    let parsed = content.trim().parse::<u32>().unwrap();
    assert_eq!(parsed, std::process::id());

    remove_pid_file(&pid_file);
    assert!(!pid_file.exists());
}

#[test]
fn duplicate_pid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("vulnpost.pid");
    std::fs::write(&pid_file, "4242").unwrap();

    let err = write_pid_file(&pid_file).unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert!(err.to_string().contains("4242"));
}

#[cfg(unix)]
#[test]
fn pid_file_has_restrictive_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("vulnpost.pid");
    write_pid_file(&pid_file).unwrap();

    let mode = std::fs::metadata(&pid_file).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

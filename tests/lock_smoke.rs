// Multi-process lock smoke test for store ownership serialization.
use std::process::{Command, Stdio};

use filestate::api::{EngineConfig, PathPolicy, StateCoordinator};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_filestate");
    Command::new(exe)
}

#[test]
fn concurrent_set_with_wait_is_serialized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state_dir = temp.path().join("state");

    let workers = 8;
    let mut children = Vec::new();
    for i in 0..workers {
        let child = cmd()
            .args(["--dir", state_dir.to_str().unwrap()])
            .args(["--path-policy", "posix", "--wait", "set"])
            .arg(format!("worker-{i}"))
            .arg(format!("/smoke/file-{i}.txt"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }

    for mut child in children {
        let status = child.wait().expect("wait");
        assert!(status.success());
    }

    let config = EngineConfig::new()
        .with_state_dir(&state_dir)
        .with_path_policy(PathPolicy::posix());
    let coordinator = StateCoordinator::open(&config).expect("open");
    assert_eq!(coordinator.tracked_files().expect("records").len(), workers);
    for i in 0..workers {
        let label = coordinator
            .get_file_state(&format!("/smoke/file-{i}.txt"))
            .expect("label");
        assert_eq!(label.as_str(), format!("worker-{i}"));
    }
}

// vim: tw=80
//! The hotplug helper really gets spawned with the documented environment.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::{Builder, TempDir};

use devmap::{
    block::BlockLayer,
    registry::{Config, Registry},
};

use crate::util::FakeDisk;

fn helper_script() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
    let dir = Builder::new().prefix("devmap_hotplug").tempdir().unwrap();
    let log = dir.path().join("events");
    let helper = dir.path().join("helper.sh");
    fs::write(&helper, format!(
        "#!/bin/sh\necho \"$ACTION $DMNAME $1\" >> {}\n", log.display()
    )).unwrap();
    fs::set_permissions(&helper, fs::Permissions::from_mode(0o755)).unwrap();
    (dir, helper, log)
}

/// Poll until the event log satisfies `pred`; the helper runs
/// asynchronously.
fn wait_for<F: Fn(&str) -> bool>(log: &Path, pred: F) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(s) = fs::read_to_string(log) {
            if pred(&s) {
                return s;
            }
        }
        assert!(Instant::now() < deadline, "hotplug helper never ran");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn helper_sees_add_and_remove() {
    let (_dir, helper, log) = helper_script();
    let config = Config {
        hotplug_helper: Some(helper),
        ..Default::default()
    };
    let reg = Registry::new(config, FakeDisk::new() as Arc<dyn BlockLayer>,
                            None);

    reg.create("vol0", None).unwrap();
    let events = wait_for(&log, |s| s.contains("add"));
    assert!(events.contains("add vol0 devmap"), "got: {}", events);

    reg.remove(0).unwrap();
    let events = wait_for(&log, |s| s.contains("remove"));
    assert!(events.contains("remove vol0 devmap"), "got: {}", events);
}

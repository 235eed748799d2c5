// vim: tw=80
//! User-space hotplug notification.

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

pub(crate) enum Action {
    Add,
    Remove,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Action::Add => "add".fmt(f),
            Action::Remove => "remove".fmt(f),
        }
    }
}

/// Spawn the configured hotplug helper for a device event.  Fire and
/// forget: the helper's exit status is nobody's problem, and a failure to
/// launch it must not fail the administrative operation that triggered it.
pub(crate) fn notify(helper: &Path, name: &str, action: Action) {
    let r = Command::new(helper)
        .arg("devmap")
        .env("HOME", "/")
        .env("PATH", "/sbin:/bin:/usr/sbin:/usr/bin")
        .env("DMNAME", name)
        .env("ACTION", action.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(e) = r {
        tracing::warn!(helper = %helper.display(), %action, error = %e,
                       "hotplug helper failed to spawn");
    }
}

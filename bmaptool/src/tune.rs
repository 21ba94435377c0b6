//! Best-effort block device tuning through sysfs.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Preferred I/O schedulers for sequential writing, in order.
const SCHEDULERS: [&str; 2] = ["none", "noop"];

/// Share of the dirty page cache the device may use, in percent.
const MAX_RATIO: &str = "1";

/// Restores the tuned sysfs attributes of a block device when dropped.
///
/// Every failure, when applying or when restoring, is logged at debug level
/// and otherwise ignored.
#[derive(Debug)]
pub struct TuningGuard {
    saved: Vec<(PathBuf, String)>,
}

impl TuningGuard {
    /// Switches the device `major:minor` to a simple I/O scheduler and limits
    /// its write-back buffering.
    pub fn apply(major: u32, minor: u32) -> Self {
        Self::apply_under(Path::new(&format!("/sys/dev/block/{major}:{minor}")))
    }

    pub(crate) fn apply_under(base: &Path) -> Self {
        let mut guard = Self { saved: Vec::new() };

        guard.set(&base.join("queue/scheduler"), &SCHEDULERS);
        guard.set(&base.join("bdi/max_ratio"), &[MAX_RATIO]);

        guard
    }

    /// Number of attributes that were changed.
    #[must_use]
    pub fn tuned(&self) -> usize {
        self.saved.len()
    }

    fn set(&mut self, path: &Path, candidates: &[&str]) {
        let old = match fs::read_to_string(path) {
            Ok(v) => current_value(&v),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "cannot read tuning attribute");
                return;
            }
        };

        for value in candidates {
            match fs::write(path, value) {
                Ok(()) => {
                    debug!(path = %path.display(), old, new = value, "tuned block device");
                    self.saved.push((path.to_owned(), old));
                    return;
                }
                Err(err) => {
                    debug!(path = %path.display(), value, error = %err, "cannot tune block device");
                }
            }
        }
    }
}

impl Drop for TuningGuard {
    fn drop(&mut self) {
        for (path, value) in self.saved.drain(..).rev() {
            if let Err(err) = fs::write(&path, &value) {
                debug!(path = %path.display(), error = %err, "cannot restore tuning attribute");
            }
        }
    }
}

/// Extracts the active value of a sysfs attribute. Scheduler lists mark it
/// with brackets, e.g. `"mq-deadline [none] kyber"`.
fn current_value(raw: &str) -> String {
    let raw = raw.trim();

    match (raw.find('['), raw.find(']')) {
        (Some(start), Some(end)) if start < end => raw[start + 1..end].to_owned(),
        _ => raw.to_owned(),
    }
}

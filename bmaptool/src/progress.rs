/// Trait for receiving copy progress updates.
///
/// All methods take `&self` and default to doing nothing, so a reporter only
/// implements the events it cares about.
pub trait CopyProgress {
    /// Called once before the first byte is written. `total` is the number of
    /// bytes expected to be written, when known.
    fn copy_started(&self, _total: Option<u64>) {}

    /// Called after every chunk written to the target.
    fn bytes_written(&self, _len: u64) {}

    /// Called when the checksum of the range `first..=last` matched.
    fn range_verified(&self, _first: u64, _last: u64) {}

    /// Called when all data has been written, before syncing.
    fn copy_finished(&self, _written: u64) {}
}

impl<P: CopyProgress + ?Sized> CopyProgress for &P {
    fn copy_started(&self, total: Option<u64>) {
        (**self).copy_started(total);
    }

    fn bytes_written(&self, len: u64) {
        (**self).bytes_written(len);
    }

    fn range_verified(&self, first: u64, last: u64) {
        (**self).range_verified(first, last);
    }

    fn copy_finished(&self, written: u64) {
        (**self).copy_finished(written);
    }
}

/// A no-op progress implementation that discards all updates.
pub struct SilentProgress;

impl CopyProgress for SilentProgress {}

/// Console progress reporter drawing an indicatif bar on stderr.
///
/// Streams of unknown length get a spinner with the byte count instead.
#[cfg(feature = "cli")]
pub struct ConsoleProgress {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "cli")]
impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            bar: indicatif::ProgressBar::hidden(),
        }
    }
}

#[cfg(feature = "cli")]
impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl CopyProgress for ConsoleProgress {
    fn copy_started(&self, total: Option<u64>) {
        let (template, length) = match total {
            Some(len) => (
                "{bar:40.cyan/blue} {bytes}/{total_bytes} ({binary_bytes_per_sec}) [{elapsed_precise}]",
                Some(len),
            ),
            None => ("{spinner} {bytes} ({binary_bytes_per_sec}) [{elapsed_precise}]", None),
        };

        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(length.unwrap_or(0));
        self.bar.set_position(0);

        // Templates are constant, a failure here would only lose styling.
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(template) {
            self.bar.set_style(style.progress_chars("━╸─"));
        }

        self.bar.reset();
    }

    fn bytes_written(&self, len: u64) {
        self.bar.inc(len);
    }

    fn copy_finished(&self, _written: u64) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Counter {
        bytes: Cell<u64>,
        ranges: Cell<u32>,
    }

    impl CopyProgress for Counter {
        fn bytes_written(&self, len: u64) {
            self.bytes.set(self.bytes.get() + len);
        }

        fn range_verified(&self, _first: u64, _last: u64) {
            self.ranges.set(self.ranges.get() + 1);
        }
    }

    fn report<P: CopyProgress>(progress: P) {
        progress.copy_started(Some(10));
        progress.bytes_written(4);
        progress.bytes_written(6);
        progress.range_verified(0, 1);
        progress.copy_finished(10);
    }

    #[test]
    fn test_forwarding_through_reference() {
        let counter = Counter::default();

        report(&counter);
        report(SilentProgress);

        assert_eq!(counter.bytes.get(), 10);
        assert_eq!(counter.ranges.get(), 1);
    }
}

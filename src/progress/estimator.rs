use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::{ProgressPhase, ProgressSample};

/// Total size announced by the extractor, shared between the output scanner
/// (writer) and the estimator (reader).
///
/// Zero means unknown. The first non-zero value sticks for the lifetime of
/// the download.
#[derive(Debug, Clone, Default)]
pub struct ExpectedSize(Arc<AtomicU64>);

impl ExpectedSize {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually stored the value.
    pub fn set_once(&self, bytes: u64) -> bool {
        bytes != 0
            && self
                .0
                .compare_exchange(0, bytes, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            bytes => Some(bytes),
        }
    }

    pub fn is_known(&self) -> bool {
        self.get().is_some()
    }
}

/// Turns on-disk file sizes into a percentage that never goes backwards.
#[derive(Debug, Default)]
pub struct ProgressEstimator {
    expected: ExpectedSize,
    last: ProgressSample,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimator reading from a cell some other component fills in.
    pub fn with_expected_size(expected: ExpectedSize) -> Self {
        Self {
            expected,
            last: ProgressSample::default(),
        }
    }

    pub fn expected_size(&self) -> &ExpectedSize {
        &self.expected
    }

    pub fn report_expected_size(&self, bytes: u64) -> bool {
        self.expected.set_once(bytes)
    }

    pub fn sample(&mut self, current_file_size: u64) -> ProgressSample {
        if self.last.phase == ProgressPhase::Complete {
            return self.last;
        }

        self.last = match self.expected.get() {
            None => ProgressSample::measuring(self.last.percent),
            Some(expected) => {
                let percent = (current_file_size as f64 * 100.0 / expected as f64).min(100.0);
                ProgressSample::downloading(percent.max(self.last.percent))
            }
        };
        self.last
    }

    pub fn complete(&mut self) -> ProgressSample {
        self.last = ProgressSample::complete();
        self.last
    }

    pub fn current(&self) -> ProgressSample {
        self.last
    }
}

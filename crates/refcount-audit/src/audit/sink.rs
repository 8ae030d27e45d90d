//! Mismatch sinks provided by the library.

use std::sync::Mutex;

use tracing::warn;

use crate::core::{Mismatch, MismatchSink};

/// Logs every mismatch at WARN level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MismatchSink for LogSink {
    fn report(&self, mismatch: &Mismatch) {
        warn!(
            blob_id = mismatch.blob_id,
            stored = mismatch.stored_count,
            recounted = mismatch.recounted_count,
            "Reference count mismatch"
        );
    }
}

/// Keeps every reported mismatch in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    mismatches: Mutex<Vec<Mismatch>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mismatches reported so far, sorted by identifier.
    pub fn mismatches(&self) -> Vec<Mismatch> {
        let mut mismatches = match self.mismatches.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        mismatches.sort_by_key(|m| m.blob_id);
        mismatches
    }
}

impl MismatchSink for CollectingSink {
    fn report(&self, mismatch: &Mismatch) {
        let mut guard = match self.mismatches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(*mismatch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_sorts() {
        let sink = CollectingSink::new();
        sink.report(&Mismatch::new(9, 0, 3));
        sink.report(&Mismatch::new(7, 1, 0));

        assert_eq!(
            sink.mismatches(),
            vec![Mismatch::new(7, 1, 0), Mismatch::new(9, 0, 3)]
        );
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(0);
        let sink = |_: &Mismatch| *seen.lock().unwrap() += 1;
        sink.report(&Mismatch::new(1, 1, 2));
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}

//! Comparison of stored counters against recounted references.

use std::cmp::Ordering;

use crate::core::{CountSet, Mismatch};

/// Every identifier whose stored and recounted counts differ, ascending.
///
/// An identifier missing from one side counts as zero there, so a blob with
/// references but no row, and a row with a counter but no references, are
/// both reported.
pub fn reconcile(stored: &CountSet, recounted: &CountSet) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    let mut stored_iter = stored.iter().peekable();
    let mut recounted_iter = recounted.iter().peekable();

    loop {
        let (blob_id, stored_count, recounted_count) =
            match (stored_iter.peek().copied(), recounted_iter.peek().copied()) {
                (None, None) => break,
                (Some((id, count)), None) => {
                    stored_iter.next();
                    (id, count, 0)
                }
                (None, Some((id, count))) => {
                    recounted_iter.next();
                    (id, 0, count)
                }
                (Some((left_id, left)), Some((right_id, right))) => match left_id.cmp(&right_id) {
                    Ordering::Less => {
                        stored_iter.next();
                        (left_id, left, 0)
                    }
                    Ordering::Greater => {
                        recounted_iter.next();
                        (right_id, 0, right)
                    }
                    Ordering::Equal => {
                        stored_iter.next();
                        recounted_iter.next();
                        (left_id, left, right)
                    }
                },
            };

        if stored_count != recounted_count {
            mismatches.push(Mismatch::new(blob_id, stored_count, recounted_count));
        }
    }

    mismatches
}

//! Custom assertion helpers for integration tests.

use tessera_core::RecordStore;
use tessera_flow::journal::JournalStore;

use crate::fixtures::SeenEntry;
use crate::storage::StorageOp;

/// Asserts that a record has no active journal entries.
///
/// # Panics
///
/// Panics if an entry is still active or the journal cannot be read.
pub async fn assert_journal_drained<S>(journal: &JournalStore<S>, data_type: &str, data_id: &str)
where
    S: RecordStore + ?Sized,
{
    let next = journal
        .next_active_entry(data_type, data_id)
        .await
        .expect("read journal");
    assert!(
        next.is_none(),
        "Expected journal {data_type}/{data_id} to be drained, but entry {:?} is active",
        next.map(|e| (e.page, e.idx))
    );
}

/// Asserts the page indexes stored for a record.
///
/// # Panics
///
/// Panics if the stored pages differ or the journal cannot be read.
pub async fn assert_pages<S>(journal: &JournalStore<S>, data_type: &str, data_id: &str, expected: &[u32])
where
    S: RecordStore + ?Sized,
{
    let pages: Vec<u32> = journal
        .list_pages(data_type, data_id)
        .await
        .expect("list pages")
        .iter()
        .map(|p| p.idx)
        .collect();
    assert_eq!(
        pages, expected,
        "Unexpected pages for {data_type}/{data_id}"
    );
}

/// Asserts that the entries of each record were seen in append order.
///
/// # Panics
///
/// Panics if any record's entries are out of `(page, idx)` order.
pub fn assert_processed_in_order(seen: &[SeenEntry]) {
    let mut last: std::collections::HashMap<(&str, &str), (u32, u32)> =
        std::collections::HashMap::new();
    for entry in seen {
        let key = (entry.data_type.as_str(), entry.data_id.as_str());
        let position = (entry.page, entry.idx);
        if let Some(previous) = last.insert(key, position) {
            assert!(
                previous < position,
                "Entry {position:?} of {}/{} processed after {previous:?}",
                entry.data_type,
                entry.data_id
            );
        }
    }
}

/// Asserts that no write touched `table`.
///
/// # Panics
///
/// Panics if a write operation targeted the table.
pub fn assert_no_writes_to(ops: &[StorageOp], table: &str) {
    for op in ops {
        let written = match op {
            StorageOp::Get { .. } => None,
            StorageOp::Create { table, .. }
            | StorageOp::Replace { table, .. }
            | StorageOp::Delete { table, .. } => Some(table),
        };
        assert!(
            written.is_none_or(|t| t != table),
            "Unexpected write to {table}: {op:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seen(id: &str, page: u32, idx: u32) -> SeenEntry {
        SeenEntry {
            data_type: "user".into(),
            data_id: id.into(),
            page,
            idx,
        }
    }

    #[test]
    fn interleaved_records_are_in_order() {
        assert_processed_in_order(&[seen("1", 1, 1), seen("2", 1, 1), seen("1", 1, 2), seen("1", 2, 1)]);
    }

    #[test]
    #[should_panic(expected = "processed after")]
    fn reordered_entries_panic() {
        assert_processed_in_order(&[seen("1", 1, 2), seen("1", 1, 1)]);
    }

    #[test]
    fn reads_are_not_writes() {
        let ops = vec![StorageOp::Get {
            table: "journal".into(),
            record_id: None,
        }];
        assert_no_writes_to(&ops, "journal");
    }
}

//! Crash recovery for the page cache.
//!
//! Recovery replays the WAL left behind by a crash so every atomic operation
//! is either fully applied or not applied at all.
//!
//! # Recovery Process
//!
//! 1. Scan the WAL from the start, stopping at the first torn record
//! 2. Group records by operation id
//! 3. For each operation with a COMMIT record, in commit order:
//!    - create the files it created (under their logged ids)
//!    - write its page ranges over the on-disk pages
//!    - delete the files it deleted
//! 4. Discard operations without a COMMIT record
//! 5. Sync the data files and truncate the WAL
//!
//! Redo is idempotent: replaying an operation whose pages were already
//! installed rewrites the same bytes.

use std::collections::HashMap;

use tracing::warn;

use crate::storage::cache::PageCache;
use crate::storage::error::StorageError;
use crate::storage::page::PageWrite;
use crate::storage::wal::{LogRecordPayload, OperationId, Wal};

/// Result of a recovery run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of WAL records scanned.
    pub records_scanned: usize,

    /// Number of committed operations replayed.
    pub operations_replayed: usize,

    /// Number of uncommitted operations discarded.
    pub operations_discarded: usize,

    /// Number of page images rewritten.
    pub pages_restored: usize,

    /// Whether the log ended in a torn record.
    pub torn_tail: bool,
}

/// Records of one operation, in log order.
#[derive(Debug, Default)]
struct PendingOperation {
    payloads: Vec<LogRecordPayload>,
    committed: bool,
}

/// Replay committed operations from `wal` into `cache`.
pub fn recover(cache: &PageCache, wal: &mut Wal) -> Result<RecoveryResult, StorageError> {
    let scan = wal.scan()?;
    let mut result = RecoveryResult {
        records_scanned: scan.records.len(),
        torn_tail: scan.torn_tail,
        ..RecoveryResult::default()
    };

    if scan.records.is_empty() {
        if scan.torn_tail {
            wal.truncate()?;
        }
        return Ok(result);
    }

    let mut pending: HashMap<OperationId, PendingOperation> = HashMap::new();
    let mut commit_order = Vec::new();

    for record in scan.records {
        let operation = pending.entry(record.operation_id).or_default();
        if record.payload == LogRecordPayload::Commit {
            operation.committed = true;
            commit_order.push(record.operation_id);
        } else {
            operation.payloads.push(record.payload);
        }
    }

    result.operations_discarded = pending.values().filter(|op| !op.committed).count();

    for operation_id in commit_order {
        let Some(operation) = pending.remove(&operation_id) else {
            continue;
        };
        for payload in operation.payloads {
            if redo(cache, payload)? {
                result.pages_restored += 1;
            }
        }
        result.operations_replayed += 1;
    }

    cache.sync_all()?;
    wal.truncate()?;

    Ok(result)
}

/// Apply one record. Returns whether a page was rewritten.
fn redo(cache: &PageCache, payload: LogRecordPayload) -> Result<bool, StorageError> {
    match payload {
        LogRecordPayload::FileCreated { file_id, name } => {
            match cache.file_id(&name)? {
                Some(existing) if existing == file_id => {}
                Some(existing) => {
                    return Err(StorageError::Corruption(format!(
                        "log creates {name} as file {file_id}, registry has file {existing}"
                    )));
                }
                None => cache.create_file_with_id(file_id, &name)?,
            }
            Ok(false)
        }
        LogRecordPayload::PageUpdate {
            file_id,
            page_index,
            ranges,
        } => {
            if cache.file_name(file_id).is_err() {
                // Deleted by a later committed operation already on disk.
                warn!(file_id, page_index, "Skipping page update for missing file");
                return Ok(false);
            }
            let mut page = cache.load_page_unchecked(file_id, page_index)?;
            for range in ranges {
                let offset = range.offset as usize;
                if offset + range.bytes.len() > page.len() {
                    return Err(StorageError::Corruption(format!(
                        "log range {offset}+{} exceeds page size {}",
                        range.bytes.len(),
                        page.len()
                    )));
                }
                page.set_bytes(offset, &range.bytes);
            }
            cache.install_page(file_id, page_index, page)?;
            Ok(true)
        }
        LogRecordPayload::FileDeleted { file_id } => {
            if cache.file_name(file_id).is_ok() {
                cache.delete_file(file_id)?;
            }
            Ok(false)
        }
        LogRecordPayload::Commit => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{MIN_PAGE_SIZE, PageRead};
    use crate::storage::wal::{LogRecord, PageRange, WAL_FILE_NAME};
    use tempfile::tempdir;

    fn page_update(op: OperationId, file_id: u32, page_index: u64, value: i32) -> LogRecord {
        LogRecord::new(
            op,
            LogRecordPayload::PageUpdate {
                file_id,
                page_index,
                ranges: vec![PageRange {
                    offset: 8,
                    bytes: value.to_le_bytes().to_vec(),
                }],
            },
        )
    }

    #[test]
    fn test_empty_log_is_noop() {
        let dir = tempdir().expect("failed to create temp dir");
        let cache = PageCache::open(dir.path(), MIN_PAGE_SIZE, 8).expect("open");
        let mut wal = Wal::open(&dir.path().join(WAL_FILE_NAME), true).expect("wal");

        let result = recover(&cache, &mut wal).expect("recover");
        assert_eq!(result, RecoveryResult::default());
    }

    #[test]
    fn test_replays_committed_and_discards_uncommitted() {
        let dir = tempdir().expect("failed to create temp dir");
        let cache = PageCache::open(dir.path(), MIN_PAGE_SIZE, 8).expect("open");
        let mut wal = Wal::open(&dir.path().join(WAL_FILE_NAME), true).expect("wal");

        wal.append(&[
            LogRecord::new(
                1,
                LogRecordPayload::FileCreated {
                    file_id: 0,
                    name: "a.grs".to_string(),
                },
            ),
            page_update(1, 0, 0, 41),
            page_update(2, 0, 1, 99),
            LogRecord::new(1, LogRecordPayload::Commit),
        ])
        .expect("append");

        let result = recover(&cache, &mut wal).expect("recover");
        assert_eq!(result.records_scanned, 4);
        assert_eq!(result.operations_replayed, 1);
        assert_eq!(result.operations_discarded, 1);
        assert_eq!(result.pages_restored, 1);

        let id = cache.open_file("a.grs").expect("file recreated");
        assert_eq!(id, 0);
        assert_eq!(cache.page_count(id).expect("count"), 1);
        assert_eq!(cache.load_page(id, 0).expect("load").get_i32(8), 41);

        assert_eq!(wal.end_offset().expect("offset"), 0);
    }

    #[test]
    fn test_redo_is_idempotent() {
        let dir = tempdir().expect("failed to create temp dir");
        let cache = PageCache::open(dir.path(), MIN_PAGE_SIZE, 8).expect("open");
        let id = cache.create_file("a.grs").expect("create");
        let mut wal = Wal::open(&dir.path().join(WAL_FILE_NAME), true).expect("wal");

        let records = [
            page_update(5, id, 0, 7),
            LogRecord::new(5, LogRecordPayload::Commit),
        ];
        wal.append(&records).expect("append");
        recover(&cache, &mut wal).expect("first recovery");

        wal.append(&records).expect("append again");
        recover(&cache, &mut wal).expect("second recovery");

        assert_eq!(cache.page_count(id).expect("count"), 1);
        assert_eq!(cache.load_page(id, 0).expect("load").get_i32(8), 7);
    }

    #[test]
    fn test_replays_file_deletion() {
        let dir = tempdir().expect("failed to create temp dir");
        let cache = PageCache::open(dir.path(), MIN_PAGE_SIZE, 8).expect("open");
        let id = cache.create_file("a.grb").expect("create");
        let mut wal = Wal::open(&dir.path().join(WAL_FILE_NAME), true).expect("wal");

        wal.append(&[
            LogRecord::new(3, LogRecordPayload::FileDeleted { file_id: id }),
            LogRecord::new(3, LogRecordPayload::Commit),
        ])
        .expect("append");

        recover(&cache, &mut wal).expect("recover");
        assert!(!cache.file_exists("a.grb").expect("exists"));
    }
}

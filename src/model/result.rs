// ABOUTME: Write-once outcome values recorded in the audit log
// ABOUTME: SyncResult for sync runs, CheckResult for source/destination reconciliation

use std::collections::BTreeSet;

use crate::model::RowKey;

/// Terminal outcome of one sync invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    Succeeded {
        rows_added: u64,
        rows_deleted: u64,
        rows_updated: u64,
        execution_millis: u64,
    },
    Failed {
        error_message: String,
    },
    Skipped {
        reason: String,
    },
}

impl SyncResult {
    pub fn succeeded(
        rows_added: u64,
        rows_deleted: u64,
        rows_updated: u64,
        execution_millis: u64,
    ) -> Self {
        SyncResult::Succeeded {
            rows_added,
            rows_deleted,
            rows_updated,
            execution_millis,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        SyncResult::Failed {
            error_message: error_message.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        SyncResult::Skipped {
            reason: reason.into(),
        }
    }
}

/// Outcome of a row-count and primary-key reconciliation between a source
/// table and its destination copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub src_db_name: String,
    pub src_schema_name: Option<String>,
    pub src_table_name: String,
    pub dst_db_name: String,
    pub dst_schema_name: Option<String>,
    pub dst_table_name: String,
    pub src_rows: i64,
    pub dst_rows: i64,
    /// Keys present in the destination but absent from the source.
    pub extra_keys: BTreeSet<RowKey>,
    /// Keys present in the source but absent from the destination.
    pub missing_keys: BTreeSet<RowKey>,
    pub execution_millis: u64,
}

impl CheckResult {
    pub fn is_in_sync(&self) -> bool {
        self.src_rows == self.dst_rows
            && self.extra_keys.is_empty()
            && self.missing_keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_result_constructors() {
        assert_eq!(
            SyncResult::succeeded(3, 0, 1, 250),
            SyncResult::Succeeded {
                rows_added: 3,
                rows_deleted: 0,
                rows_updated: 1,
                execution_millis: 250,
            }
        );
        assert_eq!(
            SyncResult::skipped("row counts match."),
            SyncResult::Skipped {
                reason: "row counts match.".into()
            }
        );
    }

    #[test]
    fn test_check_result_in_sync() {
        let result = CheckResult {
            src_db_name: "src".into(),
            src_schema_name: Some("sales".into()),
            src_table_name: "customer".into(),
            dst_db_name: "dw".into(),
            dst_schema_name: Some("sales".into()),
            dst_table_name: "customer".into(),
            src_rows: 10,
            dst_rows: 10,
            extra_keys: BTreeSet::new(),
            missing_keys: BTreeSet::new(),
            execution_millis: 12,
        };
        assert!(result.is_in_sync());

        let off = CheckResult {
            dst_rows: 11,
            ..result
        };
        assert!(!off.is_in_sync());
    }
}

// ABOUTME: Indexed-by-key row comparison producing added, updated, and deleted partitions
// ABOUTME: The compared column set is the intersection of the two sides' column names

use std::collections::BTreeMap;

use crate::error::{PoaError, Result};
use crate::model::{Row, RowKey};

/// The outcome of comparing two row sets on a key-column set.
///
/// The three key sets are pairwise disjoint. `updated` holds the
/// (source, destination) pair for every key where at least one compared
/// non-key value differs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDiff {
    pub added: BTreeMap<RowKey, Row>,
    pub updated: BTreeMap<RowKey, (Row, Row)>,
    pub deleted: BTreeMap<RowKey, Row>,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of keys in any partition.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }
}

/// Compare `src_rows` against `dst_rows`, keyed on `key_cols`.
///
/// Each side is indexed by its projection onto `key_cols`; two rows sharing
/// a key within one side is a hard error. Values compare by scalar
/// equality, with null equal to null. Columns present on only one side are
/// ignored, so callers may pre-project either side to a narrower column
/// set.
pub fn diff_rows(src_rows: &[Row], dst_rows: &[Row], key_cols: &[String]) -> Result<RowDiff> {
    let src_index = index_rows(src_rows, key_cols)?;
    let dst_index = index_rows(dst_rows, key_cols)?;

    let mut diff = RowDiff::default();

    for (key, src_row) in &src_index {
        match dst_index.get(key) {
            None => {
                diff.added.insert(key.clone(), src_row.clone());
            }
            Some(dst_row) => {
                let changed = src_row.iter().any(|(col, src_val)| {
                    dst_row.get(col).is_some_and(|dst_val| src_val != dst_val)
                });
                if changed {
                    diff.updated
                        .insert(key.clone(), (src_row.clone(), dst_row.clone()));
                }
            }
        }
    }

    for (key, dst_row) in &dst_index {
        if !src_index.contains_key(key) {
            diff.deleted.insert(key.clone(), dst_row.clone());
        }
    }

    Ok(diff)
}

fn index_rows(rows: &[Row], key_cols: &[String]) -> Result<BTreeMap<RowKey, Row>> {
    let mut index = BTreeMap::new();
    for row in rows {
        let key = RowKey::from_row(row, key_cols)?;
        if index.insert(key.clone(), row.clone()).is_some() {
            return Err(PoaError::DuplicateKey(key.describe()));
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn customer(id: i64, first_name: &str, age: Option<i64>) -> Row {
        let mut row = Row::new();
        row.insert("customer_id".into(), Value::Int(id));
        row.insert("first_name".into(), Value::Text(first_name.into()));
        row.insert(
            "age".into(),
            age.map_or(Value::Null, Value::Int),
        );
        row
    }

    fn pk() -> Vec<String> {
        vec!["customer_id".to_string()]
    }

    #[test]
    fn test_identical_rows_produce_empty_diff() {
        let src = vec![customer(1, "Steve", Some(28)), customer(2, "Amy", None)];
        let dst = src.clone();

        let diff = diff_rows(&src, &dst, &pk()).unwrap();
        assert!(diff.is_empty());
        assert_eq!(diff.change_count(), 0);
    }

    #[test]
    fn test_added_updated_deleted_partitions() {
        let src = vec![customer(1, "Steve", None), customer(2, "Mandie", Some(38))];
        let dst = vec![customer(1, "Steve-old", Some(28)), customer(3, "Ghost", None)];

        let diff = diff_rows(&src, &dst, &pk()).unwrap();

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.deleted.len(), 1);

        let added_key = diff.added.keys().next().unwrap();
        assert_eq!(added_key.get("customer_id"), Some(&Value::Int(2)));

        let deleted_key = diff.deleted.keys().next().unwrap();
        assert_eq!(deleted_key.get("customer_id"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_partitions_are_disjoint() {
        let src = vec![customer(1, "a", None), customer(2, "b", None)];
        let dst = vec![customer(2, "c", None), customer(3, "d", None)];

        let diff = diff_rows(&src, &dst, &pk()).unwrap();

        for key in diff.added.keys() {
            assert!(!diff.updated.contains_key(key));
            assert!(!diff.deleted.contains_key(key));
        }
        for key in diff.updated.keys() {
            assert!(!diff.deleted.contains_key(key));
        }
    }

    #[test]
    fn test_null_equals_null_is_not_an_update() {
        let src = vec![customer(1, "Steve", None)];
        let dst = vec![customer(1, "Steve", None)];

        let diff = diff_rows(&src, &dst, &pk()).unwrap();
        assert!(diff.updated.is_empty());
    }

    #[test]
    fn test_null_to_value_is_an_update() {
        let src = vec![customer(1, "Steve", Some(30))];
        let dst = vec![customer(1, "Steve", None)];

        let diff = diff_rows(&src, &dst, &pk()).unwrap();
        assert_eq!(diff.updated.len(), 1);
    }

    #[test]
    fn test_comparison_ignores_columns_missing_from_one_side() {
        let src = vec![customer(1, "Steve", Some(30))];
        let mut narrow = Row::new();
        narrow.insert("customer_id".into(), Value::Int(1));
        narrow.insert("first_name".into(), Value::Text("Steve".into()));

        let diff = diff_rows(&src, &[narrow], &pk()).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_duplicate_key_within_one_side_is_an_error() {
        let src = vec![customer(1, "a", None), customer(1, "b", None)];
        let result = diff_rows(&src, &[], &pk());
        assert!(matches!(result, Err(PoaError::DuplicateKey(_))));
    }

    #[test]
    fn test_multi_column_key() {
        let mut a = Row::new();
        a.insert("region".into(), Value::Text("east".into()));
        a.insert("customer_id".into(), Value::Int(1));
        a.insert("purchases".into(), Value::Int(5));

        let mut b = a.clone();
        b.insert("region".into(), Value::Text("west".into()));

        let key_cols = vec!["customer_id".to_string(), "region".to_string()];
        let diff = diff_rows(&[a], &[b], &key_cols).unwrap();

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.deleted.len(), 1);
        assert!(diff.updated.is_empty());
    }
}

// ABOUTME: Watermark ("after") filters shared by source and destination reads
// ABOUTME: Merges instance-level and call-level thresholds and renders the OR predicate

use std::collections::BTreeMap;

use crate::dialect::Dialect;
use crate::model::Value;

/// A watermark filter: column name to threshold. Rendered as an OR across
/// columns of `col > threshold`, so a row passes when any increasing signal
/// is newer than the recorded watermark.
pub type After = BTreeMap<String, Value>;

/// Merge an instance-level filter with a call-level one.
///
/// Per key, the later of the two non-null thresholds wins, compared after
/// coercing dates to midnight datetimes. Null-valued and non-temporal
/// entries on the query side never displace an instance threshold.
/// Null-valued entries are dropped from the result.
pub fn combine_filters(ds_filter: Option<&After>, query_filter: Option<&After>) -> After {
    let mut result: After = ds_filter.cloned().unwrap_or_default();

    if let Some(query_filter) = query_filter {
        for (col, query_val) in query_filter {
            match result.get(col) {
                None => {
                    result.insert(col.clone(), query_val.clone());
                }
                Some(ds_val) => {
                    let query_is_later = match (query_val.as_datetime(), ds_val.as_datetime()) {
                        (Some(query_dt), Some(ds_dt)) => query_dt > ds_dt,
                        _ => false,
                    };
                    if query_is_later {
                        result.insert(col.clone(), query_val.clone());
                    }
                }
            }
        }
    }

    result.retain(|_, val| !val.is_null());
    result
}

/// Render `after` as `(col_1 > ? OR col_2 > ? ...)` with the dialect's
/// placeholders, numbering them from `first_param`. Returns the predicate
/// and its parameters in matching order; `None` when the filter is empty.
pub fn after_predicate(
    dialect: Dialect,
    after: &After,
    first_param: usize,
) -> Option<(String, Vec<Value>)> {
    if after.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(after.len());
    let mut params = Vec::with_capacity(after.len());
    for (n, (col, val)) in after.iter().enumerate() {
        parts.push(format!(
            "{} > {}",
            dialect.wrap(col),
            dialect.placeholder(first_param + n)
        ));
        params.push(val.clone());
    }

    Some((format!("({})", parts.join(" OR ")), params))
}

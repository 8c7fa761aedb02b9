//! Map merging, stale-dependency filtering, and key sanitization

use std::collections::BTreeSet;

use serde_json::Value;

use crate::ledger::AssetKey;
use crate::schema::{format_date, parse_date};
use crate::DataBag;

/// Join bags left to right: later bags override earlier ones on collision.
///
/// The engine calls this as `join_maps(&[contract_data, input, parameters])`
/// so clause parameters win over clause input, and both win over the
/// shared contract data.
pub fn join_maps(bags: &[&DataBag]) -> DataBag {
    let mut joined = DataBag::new();
    for bag in bags {
        for (k, v) in bag.iter() {
            joined.insert(k.clone(), v.clone());
        }
    }
    joined
}

/// Merge `patch` into `target`; patch keys win. Returns the keys whose
/// value actually changed.
pub fn merge_into(target: &mut DataBag, patch: DataBag) -> Vec<String> {
    let mut changed = Vec::new();
    for (k, v) in patch {
        if target.get(&k) != Some(&v) {
            changed.push(k.clone());
        }
        target.insert(k, v);
    }
    changed
}

/// Keep only dependencies that point at clauses currently in the contract.
/// Returns `(kept, dropped)`.
pub fn remove_unexisting(
    dependencies: Vec<AssetKey>,
    current: &BTreeSet<String>,
) -> (Vec<AssetKey>, Vec<AssetKey>) {
    dependencies
        .into_iter()
        .partition(|dep| current.contains(&dep.key))
}

/// Replace spaces with `_` and strip everything outside `[A-Za-z0-9_]`
pub fn sanitize_field_name(raw: &str) -> String {
    raw.replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Sanitize every key of a bag, recursing into nested objects
pub fn sanitize_keys(data: &DataBag) -> DataBag {
    data.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::Object(nested) => Value::Object(sanitize_keys(nested)),
                other => other.clone(),
            };
            (sanitize_field_name(k), v)
        })
        .collect()
}

/// Collect date-looking string values from the given bags, normalized
/// to RFC 3339. Later bags win on key collision.
pub fn extract_dates(bags: &[&DataBag]) -> DataBag {
    let mut dates = DataBag::new();
    for bag in bags {
        for (k, v) in bag.iter() {
            if let Value::String(s) = v {
                if let Ok(date) = parse_date(s) {
                    dates.insert(k.clone(), Value::String(format_date(&date)));
                }
            }
        }
    }
    dates
}

/// Insert each date into `target` without overwriting: a taken key gets
/// `_1`, `_2`, ... appended.
pub fn insert_dates_unique(target: &mut DataBag, dates: DataBag) {
    for (k, v) in dates {
        let mut candidate = k.clone();
        let mut i = 1;
        while target.contains_key(&candidate) {
            candidate = format!("{}_{}", k, i);
            i += 1;
        }
        target.insert(candidate, v);
    }
}

use catalog::DatasetQuery;
use sha2::{Digest, Sha256};

/// Compute the cache fingerprint for a (dataset, query) pair.
///
/// The digest covers the dataset id, the filters in key order, the
/// projected columns in lexical order, the limit, and the raw query
/// fragment, each field separated by an unambiguous delimiter. Two
/// requests that differ only in argument order therefore hash
/// identically, while any change to a filter value, the column set, the
/// limit, or the fragment yields a different fingerprint.
pub fn fingerprint(dataset_id: &str, query: &DatasetQuery) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dataset_id.as_bytes());
    hasher.update([0x1f]);

    // BTreeMap iteration is already sorted by key.
    for (key, value) in &query.filters {
        hasher.update(key.as_bytes());
        hasher.update([0x1e]);
        hasher.update(value.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update([0x1d]);

    let mut columns = query.columns.clone();
    columns.sort();
    for column in &columns {
        hasher.update(column.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update([0x1d]);

    match query.limit {
        Some(limit) => hasher.update(limit.to_string().as_bytes()),
        None => hasher.update(b"-"),
    }
    hasher.update([0x1d]);

    if let Some(raw) = &query.raw_query {
        hasher.update(raw.as_bytes());
    }

    hex::encode(hasher.finalize())
}

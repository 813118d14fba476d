//! Shared argument parsing and table rendering for the subcommands.

use anyhow::{anyhow, Result};
use catalog::DatasetQuery;
use warehouse::QueryResult;

/// Parse one `key=value` filter argument.
pub fn parse_filter(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("filter '{raw}' is not in key=value form"))?;
    if key.is_empty() {
        return Err(anyhow!("filter '{raw}' has an empty column name"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Assemble a dataset query from repeated CLI arguments.
pub fn build_query(
    filters: &[String],
    columns: &[String],
    limit: Option<usize>,
    raw_query: Option<&str>,
) -> Result<DatasetQuery> {
    let mut query = DatasetQuery::new();
    for raw in filters {
        let (key, value) = parse_filter(raw)?;
        query = query.with_filter(key, value);
    }
    if !columns.is_empty() {
        query = query.with_columns(columns.to_vec());
    }
    if let Some(limit) = limit {
        query = query.with_limit(limit);
    }
    if let Some(fragment) = raw_query {
        query = query.with_raw_query(fragment);
    }
    Ok(query)
}

/// One `alias=dataset_id?k=v&...` table load directive for `sql`.
pub struct LoadSpec {
    pub alias: String,
    pub dataset_id: String,
    pub query: DatasetQuery,
}

/// Parse a load directive. The part after `?` is form-encoded; the
/// reserved keys `_limit`, `_columns` (comma separated) and `_where`
/// address the query shape, everything else is an equality filter.
pub fn parse_load_spec(raw: &str) -> Result<LoadSpec> {
    let (alias, rest) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("load spec '{raw}' is not in alias=dataset_id form"))?;
    if alias.is_empty() {
        return Err(anyhow!("load spec '{raw}' has an empty alias"));
    }
    let (dataset_id, params) = match rest.split_once('?') {
        Some((id, params)) => (id, Some(params)),
        None => (rest, None),
    };
    if dataset_id.is_empty() {
        return Err(anyhow!("load spec '{raw}' has an empty dataset id"));
    }

    let mut query = DatasetQuery::new();
    if let Some(params) = params {
        for (key, value) in url::form_urlencoded::parse(params.as_bytes()) {
            match key.as_ref() {
                "_limit" => {
                    let n: usize = value
                        .parse()
                        .map_err(|_| anyhow!("invalid _limit '{value}' in load spec"))?;
                    query = query.with_limit(n);
                }
                "_columns" => {
                    let columns = value
                        .split(',')
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect();
                    query = query.with_columns(columns);
                }
                "_where" => {
                    query = query.with_raw_query(value.to_string());
                }
                _ => {
                    query = query.with_filter(key.to_string(), value.to_string());
                }
            }
        }
    }
    Ok(LoadSpec {
        alias: alias.to_string(),
        dataset_id: dataset_id.to_string(),
        query,
    })
}

/// Render a result as a plain aligned text table.
pub fn format_table(result: &QueryResult) -> String {
    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.len()).collect();
    for row in &result.rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() && cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let mut out = String::new();
    for (i, column) in result.columns.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&format!("{column:<width$}", width = widths[i]));
    }
    out.push('\n');
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&"-".repeat(*width));
    }
    out.push('\n');
    for row in &result.rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            let width = widths.get(i).copied().unwrap_or(cell.len());
            out.push_str(&format!("{cell:<width$}"));
        }
        out.push('\n');
    }
    out
}

/// Render resolved records as a table, in stored column order.
pub fn format_records(columns: &[String], records: &[warehouse::Record]) -> String {
    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|c| match record.get(c) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                })
                .collect()
        })
        .collect();
    format_table(&QueryResult {
        columns: columns.to_vec(),
        rows,
    })
}

/// Shorten text to at most `max_chars` characters, appending an
/// ellipsis when cut. Counts characters, not bytes, so multibyte text
/// never splits mid-character.
pub fn ellipsize(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars.saturating_sub(3)) {
        Some((idx, _)) if text.chars().count() > max_chars => format!("{}...", &text[..idx]),
        _ => text.to_string(),
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_require_key_value_form() {
        assert_eq!(
            parse_filter("state=CA").expect("parse"),
            ("state".to_string(), "CA".to_string())
        );
        // Values may contain '='; only the first splits.
        assert_eq!(
            parse_filter("note=a=b").expect("parse"),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_filter("nodelimiter").is_err());
        assert!(parse_filter("=value").is_err());
    }

    #[test]
    fn load_spec_parses_alias_dataset_and_query() {
        let spec = parse_load_spec("hospitals=xubh-q36u?state=CA&_limit=100").expect("parse");
        assert_eq!(spec.alias, "hospitals");
        assert_eq!(spec.dataset_id, "xubh-q36u");
        assert_eq!(spec.query.filters.get("state").map(String::as_str), Some("CA"));
        assert_eq!(spec.query.limit, Some(100));

        let bare = parse_load_spec("t=xubh-q36u").expect("parse");
        assert!(bare.query.is_empty());

        assert!(parse_load_spec("xubh-q36u").is_err());
        assert!(parse_load_spec("=xubh-q36u").is_err());
        assert!(parse_load_spec("t=?state=CA").is_err());
    }

    #[test]
    fn load_spec_decodes_reserved_keys() {
        let spec = parse_load_spec(
            "t=xubh-q36u?_columns=facility_id,state&_where=state%3D%27CA%27",
        )
        .expect("parse");
        assert_eq!(spec.query.columns, vec!["facility_id", "state"]);
        assert_eq!(spec.query.raw_query.as_deref(), Some("state='CA'"));
    }

    #[test]
    fn ellipsize_cuts_on_character_boundaries() {
        assert_eq!(ellipsize("short", 10), "short");
        assert_eq!(ellipsize("abcdefghij", 10), "abcdefghij");
        assert_eq!(ellipsize("abcdefghijk", 10), "abcdefg...");
        // Multibyte text must never split mid-character.
        let accented = "établissements de santé agréés par Médicare";
        let cut = ellipsize(accented, 20);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 20);
        assert!(accented.starts_with(cut.trim_end_matches("...")));
    }

    #[test]
    fn tables_align_columns() {
        let rendered = format_table(&QueryResult {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec!["1".to_string(), "alpha".to_string()],
                vec!["22".to_string(), "b".to_string()],
            ],
        });
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "id  name ");
        assert_eq!(lines[1], "--  -----");
        assert_eq!(lines[2], "1   alpha");
        assert_eq!(lines[3], "22  b    ");
    }
}

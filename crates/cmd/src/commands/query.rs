use anyhow::Result;
use warehouse::Warehouse;

use crate::common::{build_query, format_records};

#[allow(clippy::print_stdout)]
pub async fn query_command(
    warehouse: &Warehouse,
    dataset_id: &str,
    filters: &[String],
    columns: &[String],
    limit: Option<usize>,
    raw_where: Option<&str>,
    json: bool,
) -> Result<()> {
    let query = build_query(filters, columns, limit, raw_where)?;
    let resolved = warehouse.query_dataset(dataset_id, &query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }
    if resolved.row_count == 0 {
        println!("No rows matched");
        return Ok(());
    }
    print!("{}", format_records(&resolved.columns, &resolved.records));
    let source = if resolved.stale {
        "stale cache (refresh failed)"
    } else if resolved.from_cache {
        "cache"
    } else {
        "live fetch"
    };
    println!("\n{} rows ({source})", resolved.row_count);
    Ok(())
}

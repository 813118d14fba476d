use anyhow::Result;
use warehouse::Warehouse;

use crate::common::build_query;

#[allow(clippy::print_stdout)]
pub async fn load_command(
    warehouse: &Warehouse,
    dataset_id: &str,
    alias: Option<&str>,
    filters: &[String],
    columns: &[String],
    limit: Option<usize>,
    raw_where: Option<&str>,
) -> Result<()> {
    let query = build_query(filters, columns, limit, raw_where)?;
    let table = warehouse.load_dataset(dataset_id, &query, alias).await?;
    println!(
        "Loaded {} rows as table '{}' ({} columns)",
        table.row_count,
        table.alias,
        table.columns.len()
    );
    Ok(())
}

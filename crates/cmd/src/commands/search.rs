use anyhow::Result;
use warehouse::Warehouse;

use crate::common::ellipsize;

#[allow(clippy::print_stdout)]
pub fn search_command(
    warehouse: &Warehouse,
    query: &str,
    domain: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let results = warehouse.search_datasets(query, domain, limit);
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No datasets matched '{query}'");
        return Ok(());
    }
    for ds in &results {
        println!("{}  [{}] {}", ds.id, ds.platform.as_str(), ds.title);
        if !ds.description.is_empty() {
            let summary = ellipsize(&ds.description, 100);
            println!("    {summary}");
        }
    }
    Ok(())
}

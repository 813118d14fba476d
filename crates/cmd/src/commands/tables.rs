use anyhow::Result;
use warehouse::Warehouse;

#[allow(clippy::print_stdout)]
pub fn tables_command(warehouse: &Warehouse, json: bool) -> Result<()> {
    let tables = warehouse.list_loaded_tables();
    if json {
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }
    if tables.is_empty() {
        println!("No tables loaded");
        return Ok(());
    }
    for table in &tables {
        println!(
            "{}  {} rows, {} columns  ({})",
            table.alias,
            table.row_count,
            table.columns.len(),
            table.source.display()
        );
    }
    Ok(())
}

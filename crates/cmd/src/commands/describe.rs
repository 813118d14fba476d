use anyhow::Result;
use warehouse::Warehouse;

#[allow(clippy::print_stdout)]
pub fn describe_command(warehouse: &Warehouse, dataset_id: &str, json: bool) -> Result<()> {
    let description = warehouse.describe_dataset(dataset_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&description)?);
        return Ok(());
    }

    let ds = &description.dataset;
    println!("{}  [{}]", ds.id, ds.platform.as_str());
    println!("{}", ds.title);
    if !ds.description.is_empty() {
        println!("{}", ds.description);
    }
    println!("endpoint: {}", ds.api_endpoint);
    if let Some(count) = ds.record_count {
        println!("records:  ~{count}");
    }
    if !ds.temporal.is_empty() {
        println!("period:   {}", ds.temporal);
    }
    if !ds.columns.is_empty() {
        println!("\ncolumns:");
        for column in &ds.columns {
            if column.example.is_empty() {
                println!("  {} ({})", column.name, column.data_type);
            } else {
                let example = &column.example;
                println!("  {} ({}), e.g. {example}", column.name, column.data_type);
            }
        }
    }
    if !description.joinable.is_empty() {
        println!("\njoins with:");
        for candidate in &description.joinable {
            println!(
                "  {} on {} ({})",
                candidate.dataset_id, candidate.join_column, candidate.title
            );
        }
    }
    Ok(())
}

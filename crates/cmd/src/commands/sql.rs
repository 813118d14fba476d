use anyhow::Result;
use diagnostics::emit;
use warehouse::Warehouse;

use crate::common::{format_table, parse_load_spec};

/// Run SQL, optionally loading tables first from `alias=dataset_id?...`
/// directives so one invocation can express a whole federated join.
#[allow(clippy::print_stdout)]
pub async fn sql_command(
    warehouse: &Warehouse,
    statement: &str,
    loads: &[String],
    json: bool,
) -> Result<()> {
    for raw in loads {
        let spec = parse_load_spec(raw)?;
        let table = warehouse
            .load_dataset(&spec.dataset_id, &spec.query, Some(&spec.alias))
            .await?;
        let alias = &table.alias;
        let rows = table.row_count;
        diagnostics::log_debug!("Loaded '{alias}' with {rows} rows", alias: alias, rows: rows);
    }

    let result = warehouse.run_sql(statement)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    print!("{}", format_table(&result));
    println!("\n{} rows", result.row_count());
    Ok(())
}

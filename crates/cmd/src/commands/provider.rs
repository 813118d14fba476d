use anyhow::Result;
use clap::Args;
use platforms::ProviderQuery;
use warehouse::Warehouse;

use crate::common::format_records;

#[derive(Args, Debug)]
pub struct ProviderArgs {
    /// 10-digit NPI number
    #[arg(long)]
    pub npi: Option<String>,
    #[arg(long)]
    pub first_name: Option<String>,
    #[arg(long)]
    pub last_name: Option<String>,
    /// Organization (type 2) name
    #[arg(long)]
    pub organization: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
    /// Two-letter state code
    #[arg(long)]
    pub state: Option<String>,
    #[arg(long)]
    pub postal_code: Option<String>,
    /// Taxonomy description, e.g. "Cardiology"
    #[arg(long)]
    pub specialty: Option<String>,
    /// NPI-1 (individual) or NPI-2 (organization)
    #[arg(long)]
    pub enumeration_type: Option<String>,
    /// Maximum results (registry cap is 200)
    #[arg(long)]
    pub limit: Option<usize>,
}

impl ProviderArgs {
    fn to_query(&self) -> ProviderQuery {
        ProviderQuery {
            npi: self.npi.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            organization_name: self.organization.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            postal_code: self.postal_code.clone(),
            taxonomy_description: self.specialty.clone(),
            enumeration_type: self.enumeration_type.clone(),
            limit: self.limit,
        }
    }
}

#[allow(clippy::print_stdout)]
pub async fn provider_command(warehouse: &Warehouse, args: &ProviderArgs, json: bool) -> Result<()> {
    let outcome = warehouse.lookup_provider(&args.to_query()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.records)?);
        return Ok(());
    }
    if outcome.records.is_empty() {
        println!("No providers matched");
        return Ok(());
    }
    // A compact identity summary; the full flattened record is in --json.
    let columns = [
        "npi",
        "enumeration_type",
        "basic_first_name",
        "basic_last_name",
        "basic_organization_name",
        "practice_city",
        "practice_state",
        "taxonomy_desc",
    ]
    .iter()
    .map(|c| c.to_string())
    .filter(|c| outcome.records.iter().any(|r| r.contains_key(c)))
    .collect::<Vec<_>>();
    print!("{}", format_records(&columns, &outcome.records));
    if let Some(total) = outcome.total_hint {
        let shown = outcome.records.len();
        println!("\n{shown} of {total} matching providers");
    }
    Ok(())
}

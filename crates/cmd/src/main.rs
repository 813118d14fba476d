use anyhow::Result;
use clap::{Parser, Subcommand};
use warehouse::{Config, Warehouse};

mod commands;
mod common;

use commands::cache::CacheCommand;
use commands::provider::ProviderArgs;

#[derive(Parser)]
#[command(name = "cmsdata")]
#[command(author, version, about = "Query and join public CMS healthcare datasets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Emit machine-readable JSON instead of text tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the dataset catalog by keyword
    Search {
        /// Free-text search phrase
        query: String,
        /// Restrict to a program area, e.g. hospital_compare
        #[arg(short, long)]
        domain: Option<String>,
        /// Maximum results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show a dataset's columns, endpoint and join candidates
    Describe {
        /// Dataset id, e.g. xubh-q36u
        dataset_id: String,
    },
    /// Fetch rows from a dataset, through the local cache
    Query {
        /// Dataset id
        dataset_id: String,
        /// Equality filter, repeatable: -f state=CA
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
        /// Column projection, repeatable
        #[arg(short = 'c', long = "column")]
        columns: Vec<String>,
        /// Maximum rows
        #[arg(short, long)]
        limit: Option<usize>,
        /// Platform-native filter fragment (SoQL $where, CMS keyword)
        #[arg(long = "where")]
        raw_where: Option<String>,
    },
    /// Cache a dataset query and register it as a SQL table
    Load {
        /// Dataset id
        dataset_id: String,
        /// Table alias (defaults to a slug of the dataset title)
        #[arg(short, long)]
        alias: Option<String>,
        /// Equality filter, repeatable: -f state=CA
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
        /// Column projection, repeatable
        #[arg(short = 'c', long = "column")]
        columns: Vec<String>,
        /// Maximum rows
        #[arg(short, long)]
        limit: Option<usize>,
        /// Platform-native filter fragment
        #[arg(long = "where")]
        raw_where: Option<String>,
    },
    /// Run SQL across loaded tables, loading more first if asked
    Sql {
        /// SQL statement
        statement: String,
        /// Load a table first, repeatable: --load hospitals=xubh-q36u?state=CA
        #[arg(long = "load")]
        loads: Vec<String>,
    },
    /// List tables loaded in this session
    Tables,
    /// Look up providers in the NPPES NPI registry (always live)
    Provider(ProviderArgs),
    /// Inspect or clear the local cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init_diagnostics();
    let cli = Cli::parse();
    let warehouse = Warehouse::open(Config::from_env())?;

    match &cli.command {
        Commands::Search { query, domain, limit } => {
            commands::search_command(&warehouse, query, domain.as_deref(), *limit, cli.json)
        }
        Commands::Describe { dataset_id } => {
            commands::describe_command(&warehouse, dataset_id, cli.json)
        }
        Commands::Query {
            dataset_id,
            filters,
            columns,
            limit,
            raw_where,
        } => {
            commands::query_command(
                &warehouse,
                dataset_id,
                filters,
                columns,
                *limit,
                raw_where.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Load {
            dataset_id,
            alias,
            filters,
            columns,
            limit,
            raw_where,
        } => {
            commands::load_command(
                &warehouse,
                dataset_id,
                alias.as_deref(),
                filters,
                columns,
                *limit,
                raw_where.as_deref(),
            )
            .await
        }
        Commands::Sql { statement, loads } => {
            commands::sql_command(&warehouse, statement, loads, cli.json).await
        }
        Commands::Tables => commands::tables_command(&warehouse, cli.json),
        Commands::Provider(args) => commands::provider_command(&warehouse, args, cli.json).await,
        Commands::Cache { command } => commands::cache_command(&warehouse, command, cli.json),
    }
}

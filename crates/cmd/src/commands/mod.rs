pub mod cache;
pub mod describe;
pub mod load;
pub mod provider;
pub mod query;
pub mod search;
pub mod sql;
pub mod tables;

pub use cache::cache_command;
pub use describe::describe_command;
pub use load::load_command;
pub use provider::provider_command;
pub use query::query_command;
pub use search::search_command;
pub use sql::sql_command;
pub use tables::tables_command;

//! SQLite-backed domain inventory and run ledger.

mod export;
mod models;
mod open;
mod query;
mod runs;
mod schema;
mod store;

pub use export::export_domains_csv;
pub use models::*;
pub use open::Db;
pub use query::*;

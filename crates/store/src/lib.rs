//! Durable SQLite store shared by the scheduler server, the planner and the admin CLI.

mod open;
mod models;
mod query;
mod schema;
mod storage;

pub use open::{now_ms, Db};
pub use models::*;
pub use query::*;
pub use storage::*;

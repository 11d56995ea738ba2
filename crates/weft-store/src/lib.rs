pub mod bundle;
pub mod store;

pub use bundle::{Bundle, ImportSummary};
pub use store::{GraphSummary, SqliteGraphStore};

//! SQL persistence: pools, migrations, the command catalog and the engine store.

mod catalog;
mod pool;
mod store;

pub use catalog::Catalog;
pub use pool::*;
pub use store::SqlStore;

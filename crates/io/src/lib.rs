// File and store I/O: input spreadsheets in, locality records out.

pub mod store;
pub mod xlsx;

pub use store::{EconomicView, LocalityFilter, LocalityView, Store, StoreError, TableCounts};
pub use xlsx::{load_inputs, load_population, load_tax, load_unemployment, InputSet, LoadError, Loaded};

/// Schema version written to `PRAGMA user_version`.
/// Increment when the store schema changes in a way old builds can't read.
pub const STORE_SCHEMA_VERSION: u32 = 1;

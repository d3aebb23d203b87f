pub mod error;
pub mod kpi;
pub mod lifecycle;
pub mod raw;
pub mod usage;

pub use error::AggregateError;
pub use kpi::{start_kpi_tracking, update_kpi};
pub use lifecycle::aggregate_lifecycle;
pub use raw::process_raw;
pub use usage::aggregate_usage;

pub mod error;
pub mod time;
pub mod types;

pub use error::DomainError;
pub use time::{date_equals_second, from_decimal, parse_timestamp, second_window, to_decimal};
pub use types::*;

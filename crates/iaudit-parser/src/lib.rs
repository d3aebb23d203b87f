pub mod envelope;
pub mod error;
pub mod fields;
pub mod handler;
pub mod registry;

pub use envelope::Envelope;
pub use error::ParseError;
pub use fields::RawFields;
pub use handler::{ComputeInstanceHandler, NotificationHandler};
pub use registry::ParserRegistry;

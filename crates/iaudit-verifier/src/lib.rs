pub mod error;
pub mod outcome;
pub mod pool;
pub mod publisher;
pub mod reconcile;
pub mod verify;
pub mod worker;

pub use error::VerifyError;
pub use outcome::VerifyOutcome;
pub use pool::{Verifier, VerifierConfig};
pub use publisher::Publisher;
pub use worker::verify_one;

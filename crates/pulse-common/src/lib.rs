pub mod errors;
pub mod wire;

pub use errors::{ConfigError, PulseError};
pub use wire::Envelope;

pub type Result<T> = std::result::Result<T, PulseError>;

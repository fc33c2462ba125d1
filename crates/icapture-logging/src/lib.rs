pub mod sampler;
pub mod subscriber;

pub use sampler::LogThrottle;
pub use subscriber::{init_logging, LoggingError};

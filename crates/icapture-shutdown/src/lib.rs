pub mod coordinator;
pub mod signal;
pub mod token;

pub use coordinator::{ShutdownCoordinator, ShutdownReport};
pub use signal::{ShutdownError, ShutdownSignal, SignalHandler};
pub use token::StopToken;

//! Logging and shutdown helpers shared by the binary and the factory.

mod logging;
mod shutdown;

pub use logging::init_logging;
pub use shutdown::ShutdownSignal;

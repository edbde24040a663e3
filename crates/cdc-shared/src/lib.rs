//! Configuration, observability, retry, and health-check plumbing shared by
//! the CDC worker binary.

pub mod config;
pub mod health;
pub mod observability;
pub mod retry;
pub mod shutdown;

pub use config::*;
pub use health::*;
pub use observability::*;
pub use retry::*;
pub use shutdown::ShutdownSignal;
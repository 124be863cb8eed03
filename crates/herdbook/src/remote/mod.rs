pub mod memory;
#[cfg(feature = "rest")]
pub mod rest;
pub mod timeout;
pub mod traits;

pub use memory::{MemoryRemote, RemoteCall, RemoteOp};
#[cfg(feature = "rest")]
pub use rest::{PostgrestOptions, PostgrestRemote};
pub use timeout::TimeoutRemote;
pub use traits::{probe_outcome, zero_rows_error, RemoteCollection};

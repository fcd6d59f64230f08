mod adapter;
mod pool;
mod types;

pub use adapter::{Adapter, AdapterInfo, AdapterRegistry, CliAdapter, EchoAdapter};
pub use pool::{Handle, WorkerPoolManager};
pub use types::{DispatchOptions, DispatchResult, DispatchStatus, DispatchTask, Priority, TokenEstimate};

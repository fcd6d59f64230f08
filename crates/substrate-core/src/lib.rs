pub mod config;
pub mod error;
pub mod event_bus;

pub use config::{ConfigStore, SubstrateConfig};
pub use error::{SubstrateError, SubstrateResult, ValidationCategory};
pub use event_bus::{EventBus, EventSubscriber};

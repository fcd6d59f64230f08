pub mod monitor;
pub mod routing;
pub mod types;

pub use monitor::MonitorAgent;
pub use routing::RoutingEngine;
pub use types::{task_type_key, BillingMode, MonitorConfidence, MonitorRecommendation, RoutableTask, RoutingDecision};

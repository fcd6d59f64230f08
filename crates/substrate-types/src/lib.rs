mod decision;
mod events;
mod normalize;
mod task_graph;

pub use decision::*;
pub use events::*;
pub use normalize::normalize_agent_id;
pub use task_graph::*;

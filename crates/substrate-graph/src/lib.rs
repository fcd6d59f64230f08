mod adjacency;
mod cycle;
mod document;
mod scheduler;
mod validate;

pub use adjacency::{build_adjacency_list, depths, topo_sort, AdjacencyList};
pub use cycle::find_cycle;
pub use document::{parse_task_graph_document, render_task_graph_yaml};
pub use scheduler::{execution_waves, propagate_blocked, ready};
pub use validate::{validate, ValidationReport};

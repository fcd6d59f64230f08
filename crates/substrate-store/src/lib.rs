mod schema;
mod store;
mod version;

pub use store::{DecisionStore, MAX_AMENDMENT_DEPTH};
pub use version::{get_next_version, parse_version};

//! Child-side navigation state that parent dashboards read.

mod store;

pub use store::{NavigationStore, VERIFICATION_RADIUS_M};

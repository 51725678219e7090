mod migrations;
mod schema;
mod store;

pub use store::{PairFilter, PendingPair, TrackingStore};

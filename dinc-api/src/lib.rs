// DiNC API Library
//
// HTTP surface of a DiNC node: routing entry point, liveness checks and the
// gossip control endpoints

pub mod http;

pub use http::{create_router, AppState};

// API module
//
// HTTP surface of a node: chain access, transaction submission, mining,
// balances, consensus, peers and wallet helpers

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;

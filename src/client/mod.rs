// ============================================================================
// Reliable Client
// ============================================================================
//
// Ties the pieces together for application code: versioned puts, batch
// writes and deletes that honor an open write coordinator, and reads that
// consult the item cache unless a consistency scope is active.
//
// ============================================================================

pub mod config;
pub mod reliable_client;

pub use config::ReliableConfig;
pub use reliable_client::{RecordPage, ReliableClient};

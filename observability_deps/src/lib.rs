//! This crate exists to coordinate versions of `tracing` and friends so
//! that we can manage their updates in a single crate.

// Export these crates publicly so we can have a single reference
pub use tracing;

// Forum ranking - vote ledger, aggregate maintenance and comment trees

// Core types and primitives
pub mod core;

// Registry, ledger and aggregate rows
pub mod models;

// Storage, ids and monitoring
pub mod infrastructure;

// Voting engine and comment tree builder
pub mod engine;

// Common utilities
pub mod config;
pub mod error;

// Re-exports for convenience
pub use config::Config;
pub use engine::{CommentNode, CommentSort, PostRemoval, VoteOutcome, VotingEngine};
pub use error::{AppError, AppResult};

//! Test Environment Manager
//!
//! Provides isolated engine instances for testing:
//! - Temporary state and watch directories, cleaned up on drop
//! - Engine construction with any affect backend
//! - Log-file writers that mimic the host agent's append-only JSONL
//! - Watcher-through-channel draining for pipeline tests

mod env_manager;

pub use env_manager::TestEnv;

//! End-to-end test support for the Luminal engine.
//!
//! `harness` builds isolated state/watch directories per test; `mocks`
//! provides log-line factories and scripted affect backends.

pub mod harness;
pub mod mocks;

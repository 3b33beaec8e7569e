//! Test Data Factory
//!
//! Log-line builders and scripted affect backends for deterministic
//! scenario tests.

mod fixtures;

pub use fixtures::{FixedAffectBackend, assistant_line, line_with_uuid, user_line};

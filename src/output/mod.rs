//! Output formatting module
//!
//! Renders item results, session summaries, plans and shard assignments.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};

//! Test execution engine
//!
//! Runs collected items through the setup/call/teardown protocol with
//! bounded retries.

mod body;
mod protocol;
mod retry;
mod scripted;

pub use body::{BodyProvider, BodyTable, RunContext, TestBody};
pub use protocol::{ExecutionProtocol, ItemState};
pub use retry::{duration_from_secs, sleep_with_cancellation, Backoff, RetryPlan, RetryPolicy};
pub use scripted::{Script, ScriptBook, Step};

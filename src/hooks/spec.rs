//! Hook specifications
//!
//! Every extension point is a type implementing [`HookSpec`]; the type fixes
//! the hook's name, dispatch policy, context type and answer type.

use std::fmt;

/// How answers from multiple callbacks are combined
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookPolicy {
    /// Call every callback in ascending priority, registration order within
    /// equal priority; the last writer to the context wins
    CollectAll,
    /// Call callbacks in the reverse of that order and stop at the first
    /// callback that returns an answer
    FirstResult,
}

impl fmt::Display for HookPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPolicy::CollectAll => write!(f, "collect-all"),
            HookPolicy::FirstResult => write!(f, "first-result"),
        }
    }
}

/// Typed contract of one extension point
pub trait HookSpec: 'static {
    /// Table key of the hook
    const NAME: &'static str;
    /// Dispatch policy
    const POLICY: HookPolicy;
    /// Mutable context shared by every callback of one invocation
    type Context: 'static;
    /// Value a callback may answer with
    type Answer: 'static;
}

/// Callback signature for hook `H`
pub type HookFn<H> = dyn Fn(&mut <H as HookSpec>::Context) -> anyhow::Result<Option<<H as HookSpec>::Answer>>
    + Send
    + Sync;

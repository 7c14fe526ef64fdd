//! Hook system
//!
//! Typed extension points, the registry that dispatches them, and the
//! plugin contract used to populate it.

mod extensions;
pub mod points;
mod plugin;
mod registry;
mod spec;

pub use extensions::Extensions;
pub use points::{
    FixtureRequest, GenerateTests, GenerateTestsContext, MakeReport, ModifyItems,
    ModifyItemsContext, Parametrization, ReportContext, ResolveFixture, RuntestContext,
    RuntestSetup, RuntestTeardown, SessionFinish, SessionFinishContext, SessionInfo, SessionStart,
    SessionStartContext, TerminalSummary, TerminalSummaryContext,
};
pub use plugin::{Plugin, PluginRegistrar};
pub use registry::{HookEntry, HookRegistry};
pub use spec::{HookFn, HookPolicy, HookSpec};

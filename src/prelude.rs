//! Common imports for driving the rewrite pipeline.
//!
//! Covers the session, its two seams (host services and engine) and the
//! values that flow between them.

pub use crate::activation::ActivationDecision;
pub use crate::config::{AgentConfig, DetachPolicy, ProcessInfo};
pub use crate::engine::{
    BodyAllocator, EngineLoader, HostCapabilities, OffsetMapping, RewriteEngine, RewriteRequest, RewriteResponse,
};
pub use crate::error::{AgentError, HResult};
pub use crate::exclusion::ExclusionFilter;
pub use crate::info::{FunctionInfo, ModuleInfo, ProfilerInfo};
pub use crate::session::{Session, SessionSlot};
pub use crate::sys::corprof;

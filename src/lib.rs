//! # clr-rewriter
//!
//! A CLR profiler agent that rewrites IL method bodies just before they are
//! JIT-compiled.
//!
//! The agent does no IL transformation itself. It decides whether the
//! process should be instrumented, filters out methods that must never be
//! touched, lazily loads an external rewriting engine exactly once, and
//! installs the bodies and offset maps the engine hands back.
//!
//! ## Loading the agent
//!
//! Build the `cdylib` and point the runtime at it:
//!
//! ```bash
//! export CORECLR_ENABLE_PROFILING=1
//! export CORECLR_PROFILER={8A3C2F71-5D4E-4B9A-9C1E-3F6A7B2D0E54}
//! export CORECLR_PROFILER_PATH=/opt/clr-rewriter/libclr_rewriter.so
//! dotnet MyApp.dll
//! ```
//!
//! The engine library (`libClrRewriter.Engine.so`, `ClrRewriter.Engine.dll`)
//! and the `clr-rewriter.settings` activation file live next to the agent.
//! A process not listed in the settings file is left alone and the agent
//! asks the runtime to detach it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │             COM surface (callback module)                │
//! │   DllGetClassObject, class factory, callback vtable      │
//! ├─────────────────────────────────────────────────────────┤
//! │                Session (session module)                  │
//! │   activation -> identity -> exclusion -> engine -> install│
//! ├─────────────────────────────────────────────────────────┤
//! │        Host services (info)  |  Engine (engine)          │
//! │   ProfilerInfo trait         |  RewriteEngine trait      │
//! │   CorProfilerInfo (COM)      |  NativeEngine (libloading)│
//! ├─────────────────────────────────────────────────────────┤
//! │              Raw FFI Bindings (sys module)               │
//! │   sys::cor, sys::corprof, sys::metadata                  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sys`] | Raw COM, profiling API and metadata vtables |
//! | [`info`] | [`ProfilerInfo`] and its COM implementation |
//! | [`settings`] | Activation file tokenizer and matcher |
//! | [`config`] | [`AgentConfig`], [`ProcessInfo`] and environment overrides |
//! | [`activation`] | Attach-time instrument/decline decision |
//! | [`identity`] | `FunctionID` to assembly/module/type/method names |
//! | [`exclusion`] | Assemblies that are never rewritten |
//! | [`engine`] | [`RewriteEngine`] contract and the native engine loader |
//! | [`session`] | The per-process [`Session`] and rewrite pipeline |
//! | [`watchdog`] | Self-detach for declined processes |
//! | [`callback`] | COM objects and DLL exports |
//!
//! ## Embedding the pipeline
//!
//! [`Session`] is generic over [`ProfilerInfo`] and takes its engine from an
//! [`EngineLoader`], so the whole pipeline runs without a runtime:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clr_rewriter::prelude::*;
//!
//! let session = Session::new(
//!     Arc::new(my_info),
//!     AgentConfig::new("/opt/clr-rewriter"),
//!     ActivationDecision::Instrument,
//!     Box::new(MyLoader),
//! );
//! session.jit_compilation_started(function_id, true)?;
//! ```

pub mod sys;

pub mod activation;
pub mod callback;
pub mod config;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod identity;
pub mod info;
pub mod memory;
pub mod prelude;
pub mod session;
pub mod settings;
pub mod watchdog;

pub use crate::activation::ActivationDecision;
pub use crate::config::{AgentConfig, DetachPolicy, ProcessInfo};
pub use crate::engine::{
    BodyAllocator, EngineLoader, HostCapabilities, NativeEngineLoader, OffsetMapping, RewriteEngine, RewriteRequest,
    RewriteResponse,
};
pub use crate::error::{AgentError, HResult};
pub use crate::exclusion::ExclusionFilter;
pub use crate::identity::MethodIdentity;
pub use crate::info::{CorProfilerInfo, FunctionInfo, ModuleInfo, ProfilerInfo};
pub use crate::session::{Session, SessionSlot};

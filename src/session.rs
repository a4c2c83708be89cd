//! Per-process profiler session and the JIT rewrite pipeline.
//!
//! One [`Session`] exists per attached runtime. Every JIT compilation event
//! runs through [`Session::jit_compilation_started`]:
//!
//! ```text
//! resolve identity -> exclusion filter -> engine (loaded once) -> rewrite -> install
//! ```
//!
//! Anything short of a failed install is a pass-through: the method compiles
//! exactly as written and the runtime sees success.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::thread::JoinHandle;

use log::{debug, error, info, warn};

use crate::activation::ActivationDecision;
use crate::config::{AgentConfig, ProcessInfo};
use crate::engine::{BodyAllocator, EngineLoader, HostCapabilities, RewriteEngine, RewriteRequest};
use crate::error::HResult;
use crate::identity::MethodIdentity;
use crate::info::ProfilerInfo;
use crate::memory;
use crate::sys::corprof::{mdSignature, FunctionID, ModuleID, COR_IL_MAP};
use crate::watchdog;

/// Outcome of the one-time engine load.
enum EngineState {
    Ready(Box<dyn RewriteEngine>),
    /// Load or handshake failed; never retried.
    Failed,
}

thread_local! {
    // Set while this thread is inside the engine's load handshake.
    static LOADING_ENGINE: Cell<bool> = const { Cell::new(false) };
}

struct LoadingGuard;

impl LoadingGuard {
    fn enter() -> Self {
        LOADING_ENGINE.with(|flag| flag.set(true));
        LoadingGuard
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        LOADING_ENGINE.with(|flag| flag.set(false));
    }
}

pub struct Session<I: ProfilerInfo + 'static> {
    info: Arc<I>,
    config: AgentConfig,
    activation: ActivationDecision,
    loader: Box<dyn EngineLoader>,
    engine: OnceLock<EngineState>,
}

impl<I: ProfilerInfo + 'static> Session<I> {
    /// A session that has already made its activation decision.
    ///
    /// Does not touch the runtime; see [`Session::attach`] for the full
    /// attach sequence.
    pub fn new(info: Arc<I>, config: AgentConfig, activation: ActivationDecision, loader: Box<dyn EngineLoader>) -> Self {
        Session {
            info,
            config,
            activation,
            loader,
            engine: OnceLock::new(),
        }
    }

    /// Decide activation, set the event mask and, when declining, start the
    /// detach watchdog.
    ///
    /// `attaching` is `true` when the runtime loaded the agent through
    /// `InitializeForAttach`, which restricts the event mask. Returns the
    /// session together with the watchdog handle if one was spawned.
    pub fn attach(
        info: Arc<I>,
        config: AgentConfig,
        process: &ProcessInfo,
        attaching: bool,
        loader: Box<dyn EngineLoader>,
    ) -> Result<(Self, Option<JoinHandle<Option<u32>>>), HResult> {
        let activation = ActivationDecision::decide(&config, process);
        let mask = activation.event_mask(attaching);
        info.set_event_mask(mask).map_err(|e| {
            error!("SetEventMask({:#x}) failed: {}", mask, e);
            e
        })?;

        let watchdog = match activation {
            ActivationDecision::Instrument => None,
            ActivationDecision::Decline => match watchdog::spawn(Arc::clone(&info), config.detach) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("cannot start detach watchdog, agent stays attached: {}", e);
                    None
                }
            },
        };

        Ok((Session::new(info, config, activation, loader), watchdog))
    }

    pub fn activation(&self) -> ActivationDecision {
        self.activation
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn info(&self) -> &Arc<I> {
        &self.info
    }

    /// `true` once the engine has been loaded and initialized.
    pub fn engine_ready(&self) -> bool {
        matches!(self.engine.get(), Some(EngineState::Ready(_)))
    }

    /// Handle one `JITCompilationStarted` notification.
    ///
    /// `Err` only when a rewritten body was produced but could not be
    /// installed. The first call may block on the engine load whatever
    /// `safe_to_block` says.
    pub fn jit_compilation_started(&self, function_id: FunctionID, safe_to_block: bool) -> Result<(), HResult> {
        if !self.activation.is_instrumenting() {
            return Ok(());
        }
        if !safe_to_block {
            debug!("function {:#x}: compiling where the runtime asked not to block", function_id);
        }

        let identity = match MethodIdentity::resolve(&*self.info, function_id) {
            Ok(identity) => identity,
            Err((step, e)) => {
                debug!("function {:#x}: {} failed ({}), skipped", function_id, step, e);
                return Ok(());
            }
        };

        if self.config.exclusions.is_excluded(&identity.assembly_name) {
            debug!("{} [{}]: excluded assembly", identity.qualified_name(), identity.assembly_name);
            return Ok(());
        }

        let Some(engine) = self.engine() else {
            debug!("{}: no rewriting engine", identity.qualified_name());
            return Ok(());
        };

        self.rewrite(engine, &identity)
    }

    fn rewrite(&self, engine: &dyn RewriteEngine, identity: &MethodIdentity) -> Result<(), HResult> {
        let body = match self.info.il_function_body(identity.module_id, identity.method_def) {
            Ok(body) => body,
            Err(e) => {
                debug!("{}: no IL body ({})", identity.qualified_name(), e);
                return Ok(());
            }
        };

        let request = RewriteRequest {
            assembly_name: &identity.assembly_name,
            module_name: &identity.module_name,
            module_id: identity.module_id,
            method_def: identity.method_def,
            body,
        };
        let info = &self.info;
        let allocator = |module: ModuleID, size: u32| -> Option<NonNull<u8>> {
            match info.allocate_il_body(module, size) {
                Ok(block) => NonNull::new(block),
                Err(e) => {
                    debug!("IL body allocation of {} bytes in module {:#x} failed: {}", size, module, e);
                    None
                }
            }
        };
        let response = engine.rewrite(&request, &allocator as &dyn BodyAllocator);

        let Some(new_body) = response.new_body else {
            debug!("{}: left unchanged by the engine", identity.qualified_name());
            return Ok(());
        };

        // An empty map is not installed, so an earlier map for this function stays.
        if !response.offset_map.is_empty() {
            let map: Vec<COR_IL_MAP> = response.offset_map.iter().copied().map(COR_IL_MAP::from).collect();
            self.info
                .set_il_instrumented_code_map(identity.function_id, true, &map)
                .map_err(|e| {
                    error!("{}: SetILInstrumentedCodeMap failed: {}", identity.qualified_name(), e);
                    e
                })?;
        }

        self.info
            .set_il_function_body(identity.module_id, identity.method_def, new_body.as_ptr())
            .map_err(|e| {
                error!("{}: SetILFunctionBody failed: {}", identity.qualified_name(), e);
                e
            })?;

        debug!(
            "{} [{}]: rewritten, {} offset mappings",
            identity.qualified_name(),
            identity.assembly_name,
            response.offset_map.len()
        );
        Ok(())
    }

    /// The engine, loading it on first use.
    ///
    /// Concurrent first callers block until the one load finishes. A
    /// compilation triggered on the loading thread by the handshake itself
    /// sees no engine instead of re-entering the load. A panic inside the
    /// loader or the handshake counts as a failed load.
    fn engine(&self) -> Option<&dyn RewriteEngine> {
        let state = match self.engine.get() {
            Some(state) => state,
            None => {
                if LOADING_ENGINE.with(Cell::get) {
                    return None;
                }
                self.engine.get_or_init(|| {
                    let _loading = LoadingGuard::enter();
                    panic::catch_unwind(AssertUnwindSafe(|| self.load_engine())).unwrap_or_else(|_| {
                        warn!("rewriting engine panicked while loading, methods compile unmodified");
                        EngineState::Failed
                    })
                })
            }
        };
        match state {
            EngineState::Ready(engine) => Some(engine.as_ref()),
            EngineState::Failed => None,
        }
    }

    fn load_engine(&self) -> EngineState {
        let engine = match self.loader.load(&self.config) {
            Ok(engine) => engine,
            Err(e) => {
                warn!("rewriting engine unavailable, methods compile unmodified: {}", e);
                return EngineState::Failed;
            }
        };

        if let Err(e) = engine.set_home_path(&self.config.home_dir) {
            warn!("rewriting engine unavailable, methods compile unmodified: {}", e);
            return EngineState::Failed;
        }

        let info = Arc::clone(&self.info);
        engine.initialize(HostCapabilities {
            token_from_sig: Arc::new(move |module: ModuleID, signature: &[u8]| -> Option<mdSignature> {
                match info.token_from_sig(module, signature) {
                    Ok(token) => Some(token),
                    Err(e) => {
                        debug!("GetTokenFromSig in module {:#x} failed: {}", module, e);
                        None
                    }
                }
            }),
            allocate: memory::task_mem_alloc,
        });

        info!("rewriting engine initialized from {}", self.config.home_dir.display());
        EngineState::Ready(engine)
    }
}

/// Holder for the attached session, cleared again on shutdown or detach.
///
/// Notifications take their own [`Arc`] to the session, so clearing the slot
/// while a compilation is in flight only releases the session (and with it
/// the info interface) once that compilation returns.
pub struct SessionSlot<I: ProfilerInfo + 'static> {
    current: RwLock<Option<Arc<Session<I>>>>,
}

impl<I: ProfilerInfo + 'static> SessionSlot<I> {
    pub const fn new() -> Self {
        SessionSlot {
            current: RwLock::new(None),
        }
    }

    /// Install `session`, handing it back if one is already installed.
    pub fn publish(&self, session: Session<I>) -> Result<(), Session<I>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            return Err(session);
        }
        *current = Some(Arc::new(session));
        Ok(())
    }

    pub fn is_occupied(&self) -> bool {
        self.current.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn current(&self) -> Option<Arc<Session<I>>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Empty the slot, returning the session that was in it.
    pub fn take(&self) -> Option<Arc<Session<I>>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl<I: ProfilerInfo + 'static> Default for SessionSlot<I> {
    fn default() -> Self {
        SessionSlot::new()
    }
}

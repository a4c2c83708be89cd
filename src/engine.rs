//! The external rewriting engine.
//!
//! The agent never transforms IL itself. It hands each admitted method body
//! to an engine and installs whatever comes back. In production the engine
//! is a native library living next to the agent, loaded with `libloading`;
//! the [`RewriteEngine`] and [`EngineLoader`] traits keep that detail out of
//! the rewrite pipeline.
//!
//! # Native ABI
//!
//! The engine library exports three functions:
//!
//! | Symbol | Signature |
//! |--------|-----------|
//! | `SetHomePath` | `(path: *const u16)` |
//! | `Init` | `(token_from_sig: TokenFromSigFn, allocate: AllocateFn)` |
//! | `Trace` | `(assembly, module, module_id, method_def, body, body_len, allocate_body) -> RawRewriteResponse` |
//!
//! Strings are NUL-terminated UTF-16. The offset map in a response is
//! allocated with the `Init` allocator; the agent copies and frees it.

use std::cell::Cell;
use std::ffi::c_void;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use libloading::Library;
use log::{debug, warn};
use widestring::U16CString;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::memory;
use crate::sys::cor::{self, WCHAR};
use crate::sys::corprof::{mdMethodDef, mdSignature, mdToken, ModuleID, COR_IL_MAP};

// =============================================================================
// Rust-side contract
// =============================================================================

/// Everything the engine needs to decide how to rewrite one method.
#[derive(Debug, Clone, Copy)]
pub struct RewriteRequest<'a> {
    pub assembly_name: &'a str,
    pub module_name: &'a str,
    pub module_id: ModuleID,
    pub method_def: mdMethodDef,
    /// Current IL body, header included.
    pub body: &'a [u8],
}

/// Where an original IL offset ended up in the rewritten body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OffsetMapping {
    pub old_offset: u32,
    pub new_offset: u32,
    /// `false` when the engine could only approximate the position.
    pub accurate: bool,
}

impl From<OffsetMapping> for COR_IL_MAP {
    fn from(m: OffsetMapping) -> Self {
        COR_IL_MAP {
            oldOffset: m.old_offset,
            newOffset: m.new_offset,
            fAccurate: if m.accurate { cor::TRUE } else { cor::FALSE },
        }
    }
}

impl From<COR_IL_MAP> for OffsetMapping {
    fn from(m: COR_IL_MAP) -> Self {
        OffsetMapping {
            old_offset: m.oldOffset,
            new_offset: m.newOffset,
            accurate: m.fAccurate != cor::FALSE,
        }
    }
}

/// The engine's answer for one method.
#[derive(Debug, Default)]
pub struct RewriteResponse {
    /// Replacement body, allocated through the request's [`BodyAllocator`].
    /// `None` leaves the method as it is.
    pub new_body: Option<NonNull<u8>>,
    pub offset_map: Vec<OffsetMapping>,
}

impl RewriteResponse {
    pub fn unchanged() -> Self {
        RewriteResponse::default()
    }

    pub fn replaced(body: NonNull<u8>, offset_map: Vec<OffsetMapping>) -> Self {
        RewriteResponse {
            new_body: Some(body),
            offset_map,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.new_body.is_none()
    }
}

/// Allocates memory for a new method body from the runtime's per-module
/// allocator. The runtime owns the block once the body is installed.
pub trait BodyAllocator {
    fn allocate(&self, module: ModuleID, size: u32) -> Option<NonNull<u8>>;
}

impl<F> BodyAllocator for F
where
    F: Fn(ModuleID, u32) -> Option<NonNull<u8>>,
{
    fn allocate(&self, module: ModuleID, size: u32) -> Option<NonNull<u8>> {
        self(module, size)
    }
}

pub type TokenResolver = Arc<dyn Fn(ModuleID, &[u8]) -> Option<mdSignature> + Send + Sync>;

/// Generic allocator whose blocks the engine may hand back to the agent.
pub type AllocateFn = extern "system" fn(size: usize) -> *mut c_void;

/// Host services handed to the engine once, at initialization.
#[derive(Clone)]
pub struct HostCapabilities {
    /// Finds or creates a standalone signature token in a module, so the
    /// engine can emit calls whose signatures the module did not have.
    pub token_from_sig: TokenResolver,
    pub allocate: AllocateFn,
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCapabilities").finish_non_exhaustive()
    }
}

/// A loaded rewriting engine.
///
/// The agent calls [`set_home_path`](Self::set_home_path) and then
/// [`initialize`](Self::initialize) exactly once, before any
/// [`rewrite`](Self::rewrite). `rewrite` is called concurrently from every
/// thread the runtime compiles on.
pub trait RewriteEngine: Send + Sync {
    fn set_home_path(&self, home: &Path) -> Result<(), AgentError>;

    fn initialize(&self, host: HostCapabilities);

    fn rewrite(&self, request: &RewriteRequest<'_>, allocator: &dyn BodyAllocator) -> RewriteResponse;
}

/// Finds and opens an engine. Called at most once per process.
pub trait EngineLoader: Send + Sync {
    fn load(&self, config: &AgentConfig) -> Result<Box<dyn RewriteEngine>, AgentError>;
}

// =============================================================================
// Native engine
// =============================================================================

pub const SET_HOME_PATH_SYMBOL: &str = "SetHomePath";
pub const INIT_SYMBOL: &str = "Init";
pub const TRACE_SYMBOL: &str = "Trace";

/// Signature-token callback as the engine sees it. Returns `0` on failure.
pub type TokenFromSigFn = extern "system" fn(module: ModuleID, signature: *const u8, len: i32) -> mdToken;

pub type AllocateBodyFn = extern "system" fn(module: ModuleID, size: u32) -> *mut u8;

pub type SetHomePathFn = unsafe extern "system" fn(path: *const WCHAR);

pub type InitFn = unsafe extern "system" fn(token_from_sig: TokenFromSigFn, allocate: AllocateFn);

pub type TraceFn = unsafe extern "system" fn(
    assembly_name: *const WCHAR,
    module_name: *const WCHAR,
    module_id: ModuleID,
    method_def: mdMethodDef,
    body: *const u8,
    body_len: u32,
    allocate_body: AllocateBodyFn,
) -> RawRewriteResponse;

/// `Trace` return value, by value across the boundary.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct RawRewriteResponse {
    pub new_method_body: *mut u8,
    pub map_entries_count: u32,
    pub map_entries: *mut COR_IL_MAP,
}

impl RawRewriteResponse {
    /// Copy the offset map out and release the engine's buffer.
    ///
    /// # Safety
    /// `map_entries` must be null or a task-allocator block holding
    /// `map_entries_count` entries, not referenced anywhere else.
    pub unsafe fn into_response(self) -> RewriteResponse {
        let offset_map = if self.map_entries.is_null() {
            Vec::new()
        } else {
            std::slice::from_raw_parts(self.map_entries, self.map_entries_count as usize)
                .iter()
                .copied()
                .map(OffsetMapping::from)
                .collect()
        };
        memory::task_mem_free(self.map_entries as *mut c_void);

        match NonNull::new(self.new_method_body) {
            Some(body) => RewriteResponse::replaced(body, offset_map),
            None => RewriteResponse::unchanged(),
        }
    }
}

// Published by the initialized engine and cleared when it is dropped.
static HOST: RwLock<Option<HostCapabilities>> = RwLock::new(None);

thread_local! {
    // `*const &dyn BodyAllocator` for the `Trace` call running on this thread.
    static BODY_ALLOCATOR: Cell<*const c_void> = const { Cell::new(ptr::null()) };
}

extern "system" fn host_token_from_sig(module: ModuleID, signature: *const u8, len: i32) -> mdToken {
    let resolver = HOST
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(|host| Arc::clone(&host.token_from_sig));
    let Some(resolver) = resolver else {
        return 0;
    };
    if signature.is_null() || len < 0 {
        return 0;
    }
    let signature = unsafe { std::slice::from_raw_parts(signature, len as usize) };
    resolver(module, signature).unwrap_or(0)
}

extern "system" fn host_allocate_body(module: ModuleID, size: u32) -> *mut u8 {
    BODY_ALLOCATOR.with(|slot| {
        let current = slot.get();
        if current.is_null() {
            debug!("body allocation for module {module:#x} outside of a rewrite");
            return ptr::null_mut();
        }
        let allocator = unsafe { &*(current as *const &dyn BodyAllocator) };
        allocator
            .allocate(module, size)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    })
}

/// Publishes `allocator` to [`host_allocate_body`] for the duration of `f`.
fn with_body_allocator<R>(allocator: &dyn BodyAllocator, f: impl FnOnce() -> R) -> R {
    struct Restore(*const c_void);
    impl Drop for Restore {
        fn drop(&mut self) {
            BODY_ALLOCATOR.with(|slot| slot.set(self.0));
        }
    }

    let current = &allocator as *const &dyn BodyAllocator as *const c_void;
    let _restore = Restore(BODY_ALLOCATOR.with(|slot| slot.replace(current)));
    f()
}

/// Engine library opened with `libloading`, its three entry points resolved.
pub struct NativeEngine {
    set_home_path: SetHomePathFn,
    init: InitFn,
    trace: TraceFn,
    /// Set once this engine has published its host capabilities.
    published: AtomicBool,
    // Keeps the entry points above valid; `None` for entry points linked
    // into the process.
    _lib: Option<Library>,
}

impl NativeEngine {
    /// Open the engine library and resolve its entry points.
    ///
    /// # Safety
    /// Loading runs the library's initializers, and the exported symbols are
    /// trusted to have the signatures in the module documentation.
    pub unsafe fn open(path: &Path) -> Result<Self, AgentError> {
        let lib = Library::new(path).map_err(|source| AgentError::EngineLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let set_home_path = *symbol::<SetHomePathFn>(&lib, SET_HOME_PATH_SYMBOL)?;
        let init = *symbol::<InitFn>(&lib, INIT_SYMBOL)?;
        let trace = *symbol::<TraceFn>(&lib, TRACE_SYMBOL)?;

        Ok(NativeEngine {
            set_home_path,
            init,
            trace,
            published: AtomicBool::new(false),
            _lib: Some(lib),
        })
    }

    /// An engine whose entry points are already in the process, such as a
    /// statically linked engine.
    ///
    /// # Safety
    /// The functions must honor the contract in the module documentation and
    /// stay valid for the life of the engine.
    pub unsafe fn from_entry_points(set_home_path: SetHomePathFn, init: InitFn, trace: TraceFn) -> Self {
        NativeEngine {
            set_home_path,
            init,
            trace,
            published: AtomicBool::new(false),
            _lib: None,
        }
    }
}

unsafe fn symbol<'lib, T>(lib: &'lib Library, name: &'static str) -> Result<libloading::Symbol<'lib, T>, AgentError> {
    lib.get::<T>(name.as_bytes())
        .map_err(|source| AgentError::MissingEntryPoint { symbol: name, source })
}

impl RewriteEngine for NativeEngine {
    fn set_home_path(&self, home: &Path) -> Result<(), AgentError> {
        let path = U16CString::from_os_str(home.as_os_str())
            .map_err(|_| AgentError::InvalidHomePath(home.to_path_buf()))?;
        unsafe { (self.set_home_path)(path.as_ptr()) };
        Ok(())
    }

    fn initialize(&self, host: HostCapabilities) {
        let allocate = host.allocate;
        let previous = HOST.write().unwrap_or_else(PoisonError::into_inner).replace(host);
        if previous.is_some() && !self.published.load(Ordering::Acquire) {
            warn!("replacing host capabilities published by another engine");
        }
        self.published.store(true, Ordering::Release);
        unsafe { (self.init)(host_token_from_sig, allocate) };
    }

    fn rewrite(&self, request: &RewriteRequest<'_>, allocator: &dyn BodyAllocator) -> RewriteResponse {
        let assembly = U16CString::from_str_truncate(request.assembly_name);
        let module = U16CString::from_str_truncate(request.module_name);

        let raw = with_body_allocator(allocator, || unsafe {
            (self.trace)(
                assembly.as_ptr(),
                module.as_ptr(),
                request.module_id,
                request.method_def,
                request.body.as_ptr(),
                request.body.len() as u32,
                host_allocate_body,
            )
        });
        unsafe { raw.into_response() }
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        if self.published.load(Ordering::Acquire) {
            HOST.write().unwrap_or_else(PoisonError::into_inner).take();
        }
    }
}

/// Loads [`NativeEngine`] from the agent's home directory.
#[derive(Debug, Default, Copy, Clone)]
pub struct NativeEngineLoader;

impl EngineLoader for NativeEngineLoader {
    fn load(&self, config: &AgentConfig) -> Result<Box<dyn RewriteEngine>, AgentError> {
        let path = config.engine_path();
        debug!("loading rewriting engine from {}", path.display());
        let engine = unsafe { NativeEngine::open(&path)? };
        Ok(Box::new(engine))
    }
}

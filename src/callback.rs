//! The COM surface the runtime loads.
//!
//! The runtime finds the agent through `DllGetClassObject`, creates one
//! profiler object from the class factory, and calls it through the
//! `ICorProfilerCallback4` vtable. Only a handful of slots do anything; the
//! rest come from [`ICorProfilerCallbackVtbl::with_noop_notifications`].
//!
//! The callbacks forward to a process-wide [`Session`], published by
//! `Initialize` or `InitializeForAttach` and taken down again by `Shutdown`
//! or `ProfilerDetachSucceeded`.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{error, info, warn};

use crate::config::{self, AgentConfig, ProcessInfo};
use crate::engine::NativeEngineLoader;
use crate::error::HResult;
use crate::info::CorProfilerInfo;
use crate::session::{Session, SessionSlot};
use crate::sys::cor::{
    IClassFactoryVtbl, IUnknownVtbl, BOOL, CLASS_E_CLASSNOTAVAILABLE, CLASS_E_NOAGGREGATION, CLSID, E_FAIL,
    E_NOINTERFACE, E_POINTER, FALSE, GUID, HRESULT, IID, IID_IClassFactory, IID_IUnknown, REFCLSID, REFIID,
    S_FALSE, S_OK, ULONG,
};
use crate::sys::corprof::{
    FunctionID, ICorProfilerCallbackVtbl, IID_ICorProfilerCallback, IID_ICorProfilerCallback2,
    IID_ICorProfilerCallback3, IID_ICorProfilerCallback4,
};

/// Class id the runtime is pointed at (`CORECLR_PROFILER` / `COR_PROFILER`).
pub const CLSID_CLR_REWRITER: CLSID =
    GUID::new(0x8A3C2F71, 0x5D4E, 0x4B9A, [0x9C, 0x1E, 0x3F, 0x6A, 0x7B, 0x2D, 0x0E, 0x54]);

const CALLBACK_IIDS: [IID; 5] = [
    IID_IUnknown,
    IID_ICorProfilerCallback,
    IID_ICorProfilerCallback2,
    IID_ICorProfilerCallback3,
    IID_ICorProfilerCallback4,
];

/// The attached session, read by every notification.
pub static SESSION: SessionSlot<CorProfilerInfo> = SessionSlot::new();

/// Run a notification body, keeping panics on this side of the boundary.
fn dispatch(name: &str, f: impl FnOnce() -> Result<(), HResult>) -> HRESULT {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => S_OK,
        Ok(Err(e)) => e.code(),
        Err(_) => {
            error!("panic in {}", name);
            E_FAIL
        }
    }
}

fn init_logging() {
    let env = env_logger::Env::default().filter_or(config::LOG_ENV, "warn");
    let _ = env_logger::Builder::from_env(env).format_timestamp_millis().try_init();
}

// =============================================================================
// Profiler object
// =============================================================================

#[repr(C)]
struct CorProfiler {
    #[allow(dead_code)]
    vtbl: *const ICorProfilerCallbackVtbl,
    refs: AtomicU32,
}

static PROFILER_VTBL: ICorProfilerCallbackVtbl = ICorProfilerCallbackVtbl {
    Initialize: initialize,
    Shutdown: shutdown,
    JITCompilationStarted: jit_compilation_started,
    InitializeForAttach: initialize_for_attach,
    ProfilerDetachSucceeded: profiler_detach_succeeded,
    ..ICorProfilerCallbackVtbl::with_noop_notifications(profiler_query_interface, profiler_add_ref, profiler_release)
};

unsafe extern "system" fn profiler_query_interface(this: *mut c_void, riid: REFIID, ppv: *mut *mut c_void) -> HRESULT {
    if ppv.is_null() {
        return E_POINTER;
    }
    if riid.is_null() || !CALLBACK_IIDS.contains(&*riid) {
        *ppv = ptr::null_mut();
        return E_NOINTERFACE;
    }
    profiler_add_ref(this);
    *ppv = this;
    S_OK
}

unsafe extern "system" fn profiler_add_ref(this: *mut c_void) -> ULONG {
    let profiler = &*(this as *const CorProfiler);
    profiler.refs.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn profiler_release(this: *mut c_void) -> ULONG {
    let remaining = {
        let profiler = &*(this as *const CorProfiler);
        profiler.refs.fetch_sub(1, Ordering::AcqRel) - 1
    };
    if remaining == 0 {
        drop(Box::from_raw(this as *mut CorProfiler));
    }
    remaining
}

fn attach(unknown: *mut c_void, attaching: bool) -> Result<(), HResult> {
    init_logging();

    if SESSION.is_occupied() {
        warn!("agent already initialized in this process");
        return Err(HResult::FAIL);
    }

    let info = unsafe { CorProfilerInfo::from_unknown(unknown) }.map_err(|e| {
        error!("ICorProfilerInfo4 unavailable: {}", e);
        HResult::FAIL
    })?;
    let config = AgentConfig::from_environment().map_err(|e| {
        error!("{}", e);
        HResult::FAIL
    })?;
    let process = ProcessInfo::current();

    let (session, _watchdog) =
        Session::attach(Arc::new(info), config, &process, attaching, Box::new(NativeEngineLoader))?;
    SESSION.publish(session).map_err(|_| {
        warn!("agent already initialized in this process");
        HResult::FAIL
    })
}

unsafe extern "system" fn initialize(_this: *mut c_void, unknown: *mut c_void) -> HRESULT {
    dispatch("Initialize", || attach(unknown, false))
}

unsafe extern "system" fn initialize_for_attach(
    _this: *mut c_void,
    unknown: *mut c_void,
    _client_data: *mut c_void,
    _client_data_len: u32,
) -> HRESULT {
    dispatch("InitializeForAttach", || attach(unknown, true))
}

unsafe extern "system" fn shutdown(_this: *mut c_void) -> HRESULT {
    dispatch("Shutdown", || {
        info!("runtime shutting down");
        drop(SESSION.take());
        log::logger().flush();
        Ok(())
    })
}

unsafe extern "system" fn profiler_detach_succeeded(_this: *mut c_void) -> HRESULT {
    dispatch("ProfilerDetachSucceeded", || {
        info!("agent detached");
        drop(SESSION.take());
        log::logger().flush();
        Ok(())
    })
}

unsafe extern "system" fn jit_compilation_started(
    _this: *mut c_void,
    function_id: FunctionID,
    safe_to_block: BOOL,
) -> HRESULT {
    dispatch("JITCompilationStarted", || match SESSION.current() {
        Some(session) => session.jit_compilation_started(function_id, safe_to_block != FALSE),
        None => Ok(()),
    })
}

// =============================================================================
// Class factory and exports
// =============================================================================

#[repr(C)]
struct ClassFactory {
    #[allow(dead_code)]
    vtbl: &'static IClassFactoryVtbl,
}

static FACTORY_VTBL: IClassFactoryVtbl = IClassFactoryVtbl {
    base: IUnknownVtbl {
        QueryInterface: factory_query_interface,
        AddRef: factory_add_ref,
        Release: factory_release,
    },
    CreateInstance: factory_create_instance,
    LockServer: factory_lock_server,
};

static CLASS_FACTORY: ClassFactory = ClassFactory { vtbl: &FACTORY_VTBL };

unsafe extern "system" fn factory_query_interface(this: *mut c_void, riid: REFIID, ppv: *mut *mut c_void) -> HRESULT {
    if ppv.is_null() {
        return E_POINTER;
    }
    if riid.is_null() || (*riid != IID_IUnknown && *riid != IID_IClassFactory) {
        *ppv = ptr::null_mut();
        return E_NOINTERFACE;
    }
    *ppv = this;
    S_OK
}

// The factory is a static; reference counts are nominal.
unsafe extern "system" fn factory_add_ref(_this: *mut c_void) -> ULONG {
    2
}

unsafe extern "system" fn factory_release(_this: *mut c_void) -> ULONG {
    1
}

unsafe extern "system" fn factory_create_instance(
    _this: *mut c_void,
    outer: *mut c_void,
    riid: REFIID,
    ppv: *mut *mut c_void,
) -> HRESULT {
    if ppv.is_null() {
        return E_POINTER;
    }
    *ppv = ptr::null_mut();
    if !outer.is_null() {
        return CLASS_E_NOAGGREGATION;
    }

    let profiler = Box::into_raw(Box::new(CorProfiler {
        vtbl: &PROFILER_VTBL,
        refs: AtomicU32::new(1),
    })) as *mut c_void;
    let hr = profiler_query_interface(profiler, riid, ppv);
    profiler_release(profiler);
    hr
}

unsafe extern "system" fn factory_lock_server(_this: *mut c_void, _lock: BOOL) -> HRESULT {
    S_OK
}

/// COM entry point: hand out the class factory for [`CLSID_CLR_REWRITER`].
///
/// # Safety
/// Called by the COM loader with valid `rclsid`/`riid` pointers.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn DllGetClassObject(rclsid: REFCLSID, riid: REFIID, ppv: *mut *mut c_void) -> HRESULT {
    if ppv.is_null() || rclsid.is_null() {
        return E_POINTER;
    }
    *ppv = ptr::null_mut();
    if *rclsid != CLSID_CLR_REWRITER {
        return CLASS_E_CLASSNOTAVAILABLE;
    }
    factory_query_interface(&CLASS_FACTORY as *const ClassFactory as *mut c_void, riid, ppv)
}

/// The runtime decides when the agent goes away.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn DllCanUnloadNow() -> HRESULT {
    S_FALSE
}

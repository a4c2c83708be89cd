// clr-rewriter/src/sys/corprof.rs
//
// CLR profiling API bindings (corprof.h / cor.h).
//
// ICorProfilerInfo grows by appending interfaces; the vtable below is the
// flattened ICorProfilerInfo4 layout:
//   - ICorProfilerInfo:  slots 3..=35
//   - ICorProfilerInfo2: slots 36..=56
//   - ICorProfilerInfo3: slots 57..=70
//   - ICorProfilerInfo4: slots 71..=80
//
// The callback side is flattened the same way through ICorProfilerCallback4.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;

use crate::sys::cor::{
    AddRefFn, QueryInterfaceFn, ReleaseFn, BOOL, DWORD, GUID, HRESULT, IID, REFIID, S_OK, ULONG, WCHAR,
};

// --- Runtime identifiers (all pointer-sized opaque handles) ---
pub type UINT_PTR = usize;
pub type FunctionID = UINT_PTR;
pub type ModuleID = UINT_PTR;
pub type AssemblyID = UINT_PTR;
pub type AppDomainID = UINT_PTR;
pub type ClassID = UINT_PTR;
pub type ThreadID = UINT_PTR;
pub type ObjectID = UINT_PTR;
pub type GCHandleID = UINT_PTR;
pub type ReJITID = UINT_PTR;

// --- Metadata tokens ---
pub type mdToken = u32;
pub type mdMethodDef = mdToken;
pub type mdTypeDef = mdToken;
pub type mdSignature = mdToken;

pub type LPCBYTE = *const u8;

// --- COR_PRF_MONITOR event mask flags ---
pub const COR_PRF_MONITOR_NONE: DWORD = 0x0000_0000;
pub const COR_PRF_MONITOR_JIT_COMPILATION: DWORD = 0x0000_0020;
pub const COR_PRF_DISABLE_INLINING: DWORD = 0x0000_2000;
pub const COR_PRF_DISABLE_TRANSPARENCY_CHECKS_UNDER_FULL_TRUST: DWORD = 0x0008_0000;
/// Flags a profiler loaded by `InitializeForAttach` may set: threads, module,
/// assembly, appdomain and class loads, GC, suspends, exceptions, JIT
/// compilation, ReJIT and stack snapshots.
pub const COR_PRF_ALLOWABLE_AFTER_ATTACH: DWORD = 0x1004_16BE;

// --- CorOpenFlags for GetModuleMetaData ---
pub const ofRead: DWORD = 0x0000_0000;
pub const ofWrite: DWORD = 0x0000_0001;

/// One entry of an instrumented-code offset map.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct COR_IL_MAP {
    pub oldOffset: ULONG,
    pub newOffset: ULONG,
    pub fAccurate: BOOL,
}

pub const IID_ICorProfilerInfo: IID =
    GUID::new(0x28B5557D, 0x3F3F, 0x48B4, [0x90, 0xB2, 0x5F, 0x9E, 0xEA, 0x2F, 0x6C, 0x48]);
pub const IID_ICorProfilerInfo2: IID =
    GUID::new(0xCC0935CD, 0xA518, 0x487D, [0xB0, 0xBB, 0xA9, 0x32, 0x14, 0xE6, 0x54, 0x78]);
pub const IID_ICorProfilerInfo3: IID =
    GUID::new(0xB555ED4F, 0x452A, 0x4E54, [0x8B, 0x39, 0xB5, 0x36, 0x0B, 0xAD, 0x32, 0xA0]);
pub const IID_ICorProfilerInfo4: IID =
    GUID::new(0x0D8FDCAA, 0x6257, 0x47BF, [0xB1, 0xBF, 0x94, 0xDA, 0xC8, 0x84, 0x66, 0xEE]);

pub const IID_ICorProfilerCallback: IID =
    GUID::new(0x176FBED1, 0xA55C, 0x4796, [0x98, 0xCA, 0xA9, 0xDA, 0x0E, 0xF8, 0x83, 0xE7]);
pub const IID_ICorProfilerCallback2: IID =
    GUID::new(0x8A8CC829, 0xCCF2, 0x49FE, [0xBB, 0xAE, 0x0F, 0x02, 0x22, 0x28, 0x07, 0x1A]);
pub const IID_ICorProfilerCallback3: IID =
    GUID::new(0x4FD2ED52, 0x7731, 0x4B8D, [0x94, 0x69, 0x03, 0xD2, 0xCC, 0x30, 0x86, 0xC5]);
pub const IID_ICorProfilerCallback4: IID =
    GUID::new(0x7B63B2E3, 0x107D, 0x4D48, [0xB2, 0xF6, 0xF6, 0x1E, 0x22, 0x94, 0x70, 0xD2]);

/// Opaque vtable slot the agent never calls.
pub type Slot = *const c_void;

#[repr(C)]
pub struct ICorProfilerInfo4Vtbl {
    // IUnknown
    pub QueryInterface: QueryInterfaceFn,
    pub AddRef: AddRefFn,
    pub Release: ReleaseFn,

    // ICorProfilerInfo
    pub GetClassFromObject: Slot,
    pub GetClassFromToken: Slot,
    pub GetCodeInfo: Slot,
    pub GetEventMask: unsafe extern "system" fn(this: *mut c_void, pdwEvents: *mut DWORD) -> HRESULT,
    pub GetFunctionFromIP: Slot,
    pub GetFunctionFromToken: Slot,
    pub GetHandleFromThread: Slot,
    pub GetObjectSize: Slot,
    pub IsArrayClass: Slot,
    pub GetThreadInfo: Slot,
    pub GetCurrentThreadID: Slot,
    pub GetClassIDInfo: Slot,
    pub GetFunctionInfo: unsafe extern "system" fn(
        this: *mut c_void,
        functionId: FunctionID,
        pClassId: *mut ClassID,
        pModuleId: *mut ModuleID,
        pToken: *mut mdToken,
    ) -> HRESULT,
    pub SetEventMask: unsafe extern "system" fn(this: *mut c_void, dwEvents: DWORD) -> HRESULT,
    pub SetEnterLeaveFunctionHooks: Slot,
    pub SetFunctionIDMapper: Slot,
    pub GetTokenAndMetaDataFromFunction: Slot,
    pub GetModuleInfo: unsafe extern "system" fn(
        this: *mut c_void,
        moduleId: ModuleID,
        ppBaseLoadAddress: *mut LPCBYTE,
        cchName: ULONG,
        pcchName: *mut ULONG,
        szName: *mut WCHAR,
        pAssemblyId: *mut AssemblyID,
    ) -> HRESULT,
    pub GetModuleMetaData: unsafe extern "system" fn(
        this: *mut c_void,
        moduleId: ModuleID,
        dwOpenFlags: DWORD,
        riid: REFIID,
        ppOut: *mut *mut c_void,
    ) -> HRESULT,
    pub GetILFunctionBody: unsafe extern "system" fn(
        this: *mut c_void,
        moduleId: ModuleID,
        methodId: mdMethodDef,
        ppMethodHeader: *mut LPCBYTE,
        pcbMethodSize: *mut ULONG,
    ) -> HRESULT,
    pub GetILFunctionBodyAllocator: unsafe extern "system" fn(
        this: *mut c_void,
        moduleId: ModuleID,
        ppMalloc: *mut *mut c_void,
    ) -> HRESULT,
    pub SetILFunctionBody: unsafe extern "system" fn(
        this: *mut c_void,
        moduleId: ModuleID,
        methodid: mdMethodDef,
        pbNewILMethodHeader: LPCBYTE,
    ) -> HRESULT,
    pub GetAppDomainInfo: Slot,
    pub GetAssemblyInfo: unsafe extern "system" fn(
        this: *mut c_void,
        assemblyId: AssemblyID,
        cchName: ULONG,
        pcchName: *mut ULONG,
        szName: *mut WCHAR,
        pAppDomainId: *mut AppDomainID,
        pModuleId: *mut ModuleID,
    ) -> HRESULT,
    pub SetFunctionReJIT: Slot,
    pub ForceGC: Slot,
    pub SetILInstrumentedCodeMap: unsafe extern "system" fn(
        this: *mut c_void,
        functionId: FunctionID,
        fStartJit: BOOL,
        cILMapEntries: ULONG,
        rgILMapEntries: *mut COR_IL_MAP,
    ) -> HRESULT,
    pub GetInprocInspectionInterface: Slot,
    pub GetInprocInspectionIThisThread: Slot,
    pub GetThreadContext: Slot,
    pub BeginInprocDebugging: Slot,
    pub EndInprocDebugging: Slot,
    pub GetILToNativeMapping: Slot,

    // ICorProfilerInfo2
    pub DoStackSnapshot: Slot,
    pub SetEnterLeaveFunctionHooks2: Slot,
    pub GetFunctionInfo2: Slot,
    pub GetStringLayout: Slot,
    pub GetClassLayout: Slot,
    pub GetClassIDInfo2: Slot,
    pub GetCodeInfo2: Slot,
    pub GetClassFromTokenAndTypeArgs: Slot,
    pub GetFunctionFromTokenAndTypeArgs: Slot,
    pub EnumModuleFrozenObjects: Slot,
    pub GetArrayObjectInfo: Slot,
    pub GetBoxClassLayout: Slot,
    pub GetThreadAppDomain: Slot,
    pub GetRVAStaticAddress: Slot,
    pub GetAppDomainStaticAddress: Slot,
    pub GetThreadStaticAddress: Slot,
    pub GetContextStaticAddress: Slot,
    pub GetStaticFieldInfo: Slot,
    pub GetGenerationBounds: Slot,
    pub GetObjectGeneration: Slot,
    pub GetNotifiedExceptionClauseInfo: Slot,

    // ICorProfilerInfo3
    pub EnumJITedFunctions: Slot,
    pub RequestProfilerDetach:
        unsafe extern "system" fn(this: *mut c_void, dwExpectedCompletionMilliseconds: DWORD) -> HRESULT,
    pub SetFunctionIDMapper2: Slot,
    pub GetStringLayout2: Slot,
    pub SetEnterLeaveFunctionHooks3: Slot,
    pub SetEnterLeaveFunctionHooks3WithInfo: Slot,
    pub GetFunctionEnter3Info: Slot,
    pub GetFunctionLeave3Info: Slot,
    pub GetFunctionTailcall3Info: Slot,
    pub EnumModules: Slot,
    pub GetRuntimeInformation: Slot,
    pub GetThreadStaticAddress2: Slot,
    pub GetAppDomainsContainingModule: Slot,
    pub GetModuleInfo2: Slot,

    // ICorProfilerInfo4
    pub EnumThreads: Slot,
    pub InitializeCurrentThread: Slot,
    pub RequestReJIT: Slot,
    pub RequestRevert: Slot,
    pub GetCodeInfo3: Slot,
    pub GetFunctionFromIP2: Slot,
    pub GetReJITIDs: Slot,
    pub GetILToNativeMapping2: Slot,
    pub EnumJITedFunctions2: Slot,
    pub GetObjectSize2: Slot,
}

/// Per-module allocator handed out by `GetILFunctionBodyAllocator`.
#[repr(C)]
pub struct IMethodMallocVtbl {
    pub QueryInterface: QueryInterfaceFn,
    pub AddRef: AddRefFn,
    pub Release: ReleaseFn,
    pub Alloc: unsafe extern "system" fn(this: *mut c_void, cb: ULONG) -> *mut c_void,
}

macro_rules! profiler_callback_vtable {
    ($( $name:ident ( $($arg:ident : $ty:ty),* ); )*) => {
        /// Flattened `ICorProfilerCallback4` vtable.
        #[repr(C)]
        #[derive(Copy, Clone)]
        pub struct ICorProfilerCallbackVtbl {
            pub QueryInterface: QueryInterfaceFn,
            pub AddRef: AddRefFn,
            pub Release: ReleaseFn,
            $( pub $name: unsafe extern "system" fn(this: *mut c_void $(, $arg: $ty)*) -> HRESULT, )*
        }

        /// Notification handlers that accept the event and do nothing.
        #[allow(unused_variables)]
        pub mod noop {
            use super::*;
            $(
                pub unsafe extern "system" fn $name(this: *mut c_void $(, $arg: $ty)*) -> HRESULT {
                    S_OK
                }
            )*
        }

        impl ICorProfilerCallbackVtbl {
            /// Vtable whose every notification returns `S_OK`, wrapped around
            /// the object's own `IUnknown` slots.
            pub const fn with_noop_notifications(
                query_interface: QueryInterfaceFn,
                add_ref: AddRefFn,
                release: ReleaseFn,
            ) -> Self {
                ICorProfilerCallbackVtbl {
                    QueryInterface: query_interface,
                    AddRef: add_ref,
                    Release: release,
                    $( $name: noop::$name, )*
                }
            }
        }
    };
}

profiler_callback_vtable! {
    // ICorProfilerCallback
    Initialize(pICorProfilerInfoUnk: *mut c_void);
    Shutdown();
    AppDomainCreationStarted(appDomainId: AppDomainID);
    AppDomainCreationFinished(appDomainId: AppDomainID, hrStatus: HRESULT);
    AppDomainShutdownStarted(appDomainId: AppDomainID);
    AppDomainShutdownFinished(appDomainId: AppDomainID, hrStatus: HRESULT);
    AssemblyLoadStarted(assemblyId: AssemblyID);
    AssemblyLoadFinished(assemblyId: AssemblyID, hrStatus: HRESULT);
    AssemblyUnloadStarted(assemblyId: AssemblyID);
    AssemblyUnloadFinished(assemblyId: AssemblyID, hrStatus: HRESULT);
    ModuleLoadStarted(moduleId: ModuleID);
    ModuleLoadFinished(moduleId: ModuleID, hrStatus: HRESULT);
    ModuleUnloadStarted(moduleId: ModuleID);
    ModuleUnloadFinished(moduleId: ModuleID, hrStatus: HRESULT);
    ModuleAttachedToAssembly(moduleId: ModuleID, assemblyId: AssemblyID);
    ClassLoadStarted(classId: ClassID);
    ClassLoadFinished(classId: ClassID, hrStatus: HRESULT);
    ClassUnloadStarted(classId: ClassID);
    ClassUnloadFinished(classId: ClassID, hrStatus: HRESULT);
    FunctionUnloadStarted(functionId: FunctionID);
    JITCompilationStarted(functionId: FunctionID, fIsSafeToBlock: BOOL);
    JITCompilationFinished(functionId: FunctionID, hrStatus: HRESULT, fIsSafeToBlock: BOOL);
    JITCachedFunctionSearchStarted(functionId: FunctionID, pbUseCachedFunction: *mut BOOL);
    JITCachedFunctionSearchFinished(functionId: FunctionID, result: u32);
    JITFunctionPitched(functionId: FunctionID);
    JITInlining(callerId: FunctionID, calleeId: FunctionID, pfShouldInline: *mut BOOL);
    ThreadCreated(threadId: ThreadID);
    ThreadDestroyed(threadId: ThreadID);
    ThreadAssignedToOSThread(managedThreadId: ThreadID, osThreadId: DWORD);
    RemotingClientInvocationStarted();
    RemotingClientSendingMessage(pCookie: *mut GUID, fIsAsync: BOOL);
    RemotingClientReceivingReply(pCookie: *mut GUID, fIsAsync: BOOL);
    RemotingClientInvocationFinished();
    RemotingServerReceivingMessage(pCookie: *mut GUID, fIsAsync: BOOL);
    RemotingServerInvocationStarted();
    RemotingServerInvocationReturned();
    RemotingServerSendingReply(pCookie: *mut GUID, fIsAsync: BOOL);
    UnmanagedToManagedTransition(functionId: FunctionID, reason: u32);
    ManagedToUnmanagedTransition(functionId: FunctionID, reason: u32);
    RuntimeSuspendStarted(suspendReason: u32);
    RuntimeSuspendFinished();
    RuntimeSuspendAborted();
    RuntimeResumeStarted();
    RuntimeResumeFinished();
    RuntimeThreadSuspended(threadId: ThreadID);
    RuntimeThreadResumed(threadId: ThreadID);
    MovedReferences(cMovedObjectIDRanges: ULONG, oldObjectIDRangeStart: *mut ObjectID,
                    newObjectIDRangeStart: *mut ObjectID, cObjectIDRangeLength: *mut ULONG);
    ObjectAllocated(objectId: ObjectID, classId: ClassID);
    ObjectsAllocatedByClass(cClassCount: ULONG, classIds: *mut ClassID, cObjects: *mut ULONG);
    ObjectReferences(objectId: ObjectID, classId: ClassID, cObjectRefs: ULONG, objectRefIds: *mut ObjectID);
    RootReferences(cRootRefs: ULONG, rootRefIds: *mut ObjectID);
    ExceptionThrown(thrownObjectId: ObjectID);
    ExceptionSearchFunctionEnter(functionId: FunctionID);
    ExceptionSearchFunctionLeave();
    ExceptionSearchFilterEnter(functionId: FunctionID);
    ExceptionSearchFilterLeave();
    ExceptionSearchCatcherFound(functionId: FunctionID);
    ExceptionOSHandlerEnter(__unused: UINT_PTR);
    ExceptionOSHandlerLeave(__unused: UINT_PTR);
    ExceptionUnwindFunctionEnter(functionId: FunctionID);
    ExceptionUnwindFunctionLeave();
    ExceptionUnwindFinallyEnter(functionId: FunctionID);
    ExceptionUnwindFinallyLeave();
    ExceptionCatcherEnter(functionId: FunctionID, objectId: ObjectID);
    ExceptionCatcherLeave();
    COMClassicVTableCreated(wrappedClassId: ClassID, implementedIID: REFIID, pVTable: *mut c_void, cSlots: ULONG);
    COMClassicVTableDestroyed(wrappedClassId: ClassID, implementedIID: REFIID, pVTable: *mut c_void);
    ExceptionCLRCatcherFound();
    ExceptionCLRCatcherExecute();

    // ICorProfilerCallback2
    ThreadNameChanged(threadId: ThreadID, cchName: ULONG, name: *mut WCHAR);
    GarbageCollectionStarted(cGenerations: i32, generationCollected: *mut BOOL, reason: u32);
    SurvivingReferences(cSurvivingObjectIDRanges: ULONG, objectIDRangeStart: *mut ObjectID,
                        cObjectIDRangeLength: *mut ULONG);
    GarbageCollectionFinished();
    FinalizeableObjectQueued(finalizerFlags: DWORD, objectID: ObjectID);
    RootReferences2(cRootRefs: ULONG, rootRefIds: *mut ObjectID, rootKinds: *mut u32,
                    rootFlags: *mut u32, rootIds: *mut UINT_PTR);
    HandleCreated(handleId: GCHandleID, initialObjectId: ObjectID);
    HandleDestroyed(handleId: GCHandleID);

    // ICorProfilerCallback3
    InitializeForAttach(pCorProfilerInfoUnk: *mut c_void, pvClientData: *mut c_void, cbClientData: u32);
    ProfilerAttachComplete();
    ProfilerDetachSucceeded();

    // ICorProfilerCallback4
    ReJITCompilationStarted(functionId: FunctionID, rejitId: ReJITID, fIsSafeToBlock: BOOL);
    GetReJITParameters(moduleId: ModuleID, methodId: mdMethodDef, pFunctionControl: *mut c_void);
    ReJITCompilationFinished(functionId: FunctionID, rejitId: ReJITID, hrStatus: HRESULT, fIsSafeToBlock: BOOL);
    ReJITError(moduleId: ModuleID, methodId: mdMethodDef, functionId: FunctionID, hrStatus: HRESULT);
    MovedReferences2(cMovedObjectIDRanges: ULONG, oldObjectIDRangeStart: *mut ObjectID,
                     newObjectIDRangeStart: *mut ObjectID, cObjectIDRangeLength: *mut usize);
    SurvivingReferences2(cSurvivingObjectIDRanges: ULONG, objectIDRangeStart: *mut ObjectID,
                         cObjectIDRangeLength: *mut usize);
}

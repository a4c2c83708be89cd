//! Host runtime services.
//!
//! [`ProfilerInfo`] is the slice of the profiling API the rewrite pipeline
//! depends on. [`CorProfilerInfo`] implements it over the runtime's
//! `ICorProfilerInfo4` interface; tests substitute their own implementation.

use std::ffi::c_void;
use std::ptr;

use widestring::U16CStr;

use crate::error::HResult;
use crate::memory;
use crate::sys::cor::{self, IUnknownVtbl, HRESULT, ULONG, WCHAR};
use crate::sys::corprof::{
    self, AssemblyID, ClassID, FunctionID, ICorProfilerInfo4Vtbl, IMethodMallocVtbl, ModuleID, COR_IL_MAP,
    LPCBYTE,
};
use crate::sys::corprof::{mdMethodDef, mdSignature, mdToken, mdTypeDef};
use crate::sys::metadata::{IMetaDataEmitVtbl, IMetaDataImportVtbl, IID_IMetaDataEmit, IID_IMetaDataImport};

/// Initial capacity for names read from the runtime; longer names are re-read.
const NAME_BUFFER_LEN: usize = 1024;

/// The class/module/token triple behind a `FunctionID`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub class_id: ClassID,
    pub module_id: ModuleID,
    pub method_def: mdMethodDef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub assembly_id: AssemblyID,
}

/// Runtime services used by the rewrite pipeline.
///
/// Every method maps onto one profiling API call (or a short fixed sequence
/// of them). Implementations must be callable from any runtime thread.
pub trait ProfilerInfo: Send + Sync {
    fn function_info(&self, function: FunctionID) -> Result<FunctionInfo, HResult>;

    fn module_info(&self, module: ModuleID) -> Result<ModuleInfo, HResult>;

    fn assembly_name(&self, assembly: AssemblyID) -> Result<String, HResult>;

    /// Declaring type token and simple name of a method definition.
    fn method_props(&self, module: ModuleID, method: mdMethodDef) -> Result<(mdTypeDef, String), HResult>;

    fn type_def_name(&self, module: ModuleID, type_def: mdTypeDef) -> Result<String, HResult>;

    /// The method's current IL body: header, code and exception sections.
    fn il_function_body(&self, module: ModuleID, method: mdMethodDef) -> Result<&[u8], HResult>;

    /// Allocate `size` bytes from the module's IL body allocator. The
    /// runtime owns the block once it is installed as a method body.
    fn allocate_il_body(&self, module: ModuleID, size: u32) -> Result<*mut u8, HResult>;

    fn set_il_instrumented_code_map(
        &self,
        function: FunctionID,
        start_jit: bool,
        map: &[COR_IL_MAP],
    ) -> Result<(), HResult>;

    fn set_il_function_body(&self, module: ModuleID, method: mdMethodDef, body: *const u8) -> Result<(), HResult>;

    fn set_event_mask(&self, mask: u32) -> Result<(), HResult>;

    fn request_profiler_detach(&self, expected_completion_ms: u32) -> Result<(), HResult>;

    /// Find or create a standalone signature token for `signature` in `module`.
    fn token_from_sig(&self, module: ModuleID, signature: &[u8]) -> Result<mdSignature, HResult>;
}

/// Owned COM interface pointer, released on drop.
struct ComPtr(*mut c_void);

impl ComPtr {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

impl Drop for ComPtr {
    fn drop(&mut self) {
        unsafe { cor::release(self.0) };
    }
}

/// Safe wrapper around the runtime's `ICorProfilerInfo4` pointer.
pub struct CorProfilerInfo {
    // Holds one reference, released on drop.
    raw: *mut c_void,
}

// The profiling API is free-threaded: the info interface may be used from
// any thread, including ones the runtime did not create.
unsafe impl Send for CorProfilerInfo {}
unsafe impl Sync for CorProfilerInfo {}

impl CorProfilerInfo {
    /// Query `ICorProfilerInfo4` from the `IUnknown` passed to `Initialize`.
    ///
    /// # Safety
    /// `unknown` must be a live COM interface pointer.
    pub unsafe fn from_unknown(unknown: *mut c_void) -> Result<Self, HResult> {
        if unknown.is_null() {
            return Err(HResult::POINTER);
        }
        let mut raw: *mut c_void = ptr::null_mut();
        HResult::check(crate::com_call!(
            unknown,
            IUnknownVtbl,
            QueryInterface,
            &corprof::IID_ICorProfilerInfo4,
            &mut raw
        ))?;
        if raw.is_null() {
            return Err(HResult::POINTER);
        }
        Ok(CorProfilerInfo { raw })
    }

    /// The raw `ICorProfilerInfo4` pointer.
    pub fn raw(&self) -> *mut c_void {
        self.raw
    }

    unsafe fn module_metadata(&self, module: ModuleID, flags: u32, iid: &cor::IID) -> Result<ComPtr, HResult> {
        let mut out: *mut c_void = ptr::null_mut();
        HResult::check(crate::com_call!(
            self.raw,
            ICorProfilerInfo4Vtbl,
            GetModuleMetaData,
            module,
            flags,
            iid,
            &mut out
        ))?;
        if out.is_null() {
            return Err(HResult::POINTER);
        }
        Ok(ComPtr(out))
    }
}

impl Drop for CorProfilerInfo {
    fn drop(&mut self) {
        unsafe { cor::release(self.raw) };
    }
}

fn wide_to_string(buf: &[WCHAR]) -> String {
    match U16CStr::from_slice_truncate(buf) {
        Ok(s) => s.to_string_lossy(),
        Err(_) => String::from_utf16_lossy(buf),
    }
}

/// Read a runtime-owned wide string with the usual capacity/length/buffer
/// triple, growing the buffer once if the first read was truncated.
fn read_wide(mut fill: impl FnMut(ULONG, *mut ULONG, *mut WCHAR) -> HRESULT) -> Result<String, HResult> {
    let mut buf = vec![0 as WCHAR; NAME_BUFFER_LEN];
    let mut len: ULONG = 0;
    HResult::check(fill(buf.len() as ULONG, &mut len, buf.as_mut_ptr()))?;
    if len as usize > buf.len() {
        buf.resize(len as usize, 0);
        HResult::check(fill(buf.len() as ULONG, &mut len, buf.as_mut_ptr()))?;
    }
    buf.truncate((len as usize).min(buf.len()));
    Ok(wide_to_string(&buf))
}

impl ProfilerInfo for CorProfilerInfo {
    fn function_info(&self, function: FunctionID) -> Result<FunctionInfo, HResult> {
        let mut class_id: ClassID = 0;
        let mut module_id: ModuleID = 0;
        let mut token: mdToken = 0;
        unsafe {
            HResult::check(crate::com_call!(
                self.raw,
                ICorProfilerInfo4Vtbl,
                GetFunctionInfo,
                function,
                &mut class_id,
                &mut module_id,
                &mut token
            ))?;
        }
        Ok(FunctionInfo { class_id, module_id, method_def: token })
    }

    fn module_info(&self, module: ModuleID) -> Result<ModuleInfo, HResult> {
        let mut assembly_id: AssemblyID = 0;
        let name = read_wide(|cap, len, buf| unsafe {
            let mut base: LPCBYTE = ptr::null();
            crate::com_call!(self.raw, ICorProfilerInfo4Vtbl, GetModuleInfo, module, &mut base, cap, len, buf, &mut assembly_id)
        })?;
        Ok(ModuleInfo { name, assembly_id })
    }

    fn assembly_name(&self, assembly: AssemblyID) -> Result<String, HResult> {
        read_wide(|cap, len, buf| unsafe {
            crate::com_call!(
                self.raw,
                ICorProfilerInfo4Vtbl,
                GetAssemblyInfo,
                assembly,
                cap,
                len,
                buf,
                ptr::null_mut(),
                ptr::null_mut()
            )
        })
    }

    fn method_props(&self, module: ModuleID, method: mdMethodDef) -> Result<(mdTypeDef, String), HResult> {
        unsafe {
            let import = self.module_metadata(module, corprof::ofRead, &IID_IMetaDataImport)?;
            let mut type_def: mdTypeDef = 0;
            let name = read_wide(|cap, len, buf| {
                crate::com_call!(
                    import.get(),
                    IMetaDataImportVtbl,
                    GetMethodProps,
                    method,
                    &mut type_def,
                    buf,
                    cap,
                    len,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut()
                )
            })?;
            Ok((type_def, name))
        }
    }

    fn type_def_name(&self, module: ModuleID, type_def: mdTypeDef) -> Result<String, HResult> {
        unsafe {
            let import = self.module_metadata(module, corprof::ofRead, &IID_IMetaDataImport)?;
            read_wide(|cap, len, buf| {
                crate::com_call!(
                    import.get(),
                    IMetaDataImportVtbl,
                    GetTypeDefProps,
                    type_def,
                    buf,
                    cap,
                    len,
                    ptr::null_mut(),
                    ptr::null_mut()
                )
            })
        }
    }

    fn il_function_body(&self, module: ModuleID, method: mdMethodDef) -> Result<&[u8], HResult> {
        let mut header: LPCBYTE = ptr::null();
        let mut size: ULONG = 0;
        unsafe {
            HResult::check(crate::com_call!(
                self.raw,
                ICorProfilerInfo4Vtbl,
                GetILFunctionBody,
                module,
                method,
                &mut header,
                &mut size
            ))?;
            if header.is_null() {
                return Err(HResult::POINTER);
            }
            // Body memory lives as long as the module, which outlives this call.
            Ok(std::slice::from_raw_parts(header, size as usize))
        }
    }

    fn allocate_il_body(&self, module: ModuleID, size: u32) -> Result<*mut u8, HResult> {
        unsafe {
            let mut malloc: *mut c_void = ptr::null_mut();
            HResult::check(crate::com_call!(
                self.raw,
                ICorProfilerInfo4Vtbl,
                GetILFunctionBodyAllocator,
                module,
                &mut malloc
            ))?;
            if malloc.is_null() {
                return Err(HResult::POINTER);
            }
            let malloc = ComPtr(malloc);
            let block = crate::com_call!(malloc.get(), IMethodMallocVtbl, Alloc, size);
            if block.is_null() {
                return Err(HResult::OUT_OF_MEMORY);
            }
            Ok(block as *mut u8)
        }
    }

    fn set_il_instrumented_code_map(
        &self,
        function: FunctionID,
        start_jit: bool,
        map: &[COR_IL_MAP],
    ) -> Result<(), HResult> {
        // The runtime takes ownership of the array and frees it itself.
        let entries = memory::task_mem_copy(map);
        if entries.is_null() && !map.is_empty() {
            return Err(HResult::OUT_OF_MEMORY);
        }
        let start_jit = if start_jit { cor::TRUE } else { cor::FALSE };
        unsafe {
            HResult::check(crate::com_call!(
                self.raw,
                ICorProfilerInfo4Vtbl,
                SetILInstrumentedCodeMap,
                function,
                start_jit,
                map.len() as ULONG,
                entries
            ))
        }
    }

    fn set_il_function_body(&self, module: ModuleID, method: mdMethodDef, body: *const u8) -> Result<(), HResult> {
        unsafe {
            HResult::check(crate::com_call!(
                self.raw,
                ICorProfilerInfo4Vtbl,
                SetILFunctionBody,
                module,
                method,
                body
            ))
        }
    }

    fn set_event_mask(&self, mask: u32) -> Result<(), HResult> {
        unsafe { HResult::check(crate::com_call!(self.raw, ICorProfilerInfo4Vtbl, SetEventMask, mask)) }
    }

    fn request_profiler_detach(&self, expected_completion_ms: u32) -> Result<(), HResult> {
        unsafe {
            HResult::check(crate::com_call!(
                self.raw,
                ICorProfilerInfo4Vtbl,
                RequestProfilerDetach,
                expected_completion_ms
            ))
        }
    }

    fn token_from_sig(&self, module: ModuleID, signature: &[u8]) -> Result<mdSignature, HResult> {
        unsafe {
            let emit = self.module_metadata(module, corprof::ofRead | corprof::ofWrite, &IID_IMetaDataEmit)?;
            let mut token: mdSignature = 0;
            HResult::check(crate::com_call!(
                emit.get(),
                IMetaDataEmitVtbl,
                GetTokenFromSig,
                signature.as_ptr(),
                signature.len() as ULONG,
                &mut token
            ))?;
            Ok(token)
        }
    }
}

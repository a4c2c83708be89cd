// clr-rewriter/src/sys/cor.rs
//
// Minimal COM plumbing: HRESULT, GUID, IUnknown and IClassFactory.
// Layouts follow unknwn.h / guiddef.h. On non-Windows hosts CoreCLR's PAL
// uses the same layouts, with WCHAR fixed at 16 bits.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;

pub type HRESULT = i32;
pub type ULONG = u32;
pub type DWORD = u32;
pub type BOOL = i32;
pub type WCHAR = u16;

// --- Status codes ---
pub const S_OK: HRESULT = 0;
pub const S_FALSE: HRESULT = 1;
pub const E_NOTIMPL: HRESULT = 0x8000_4001_u32 as i32;
pub const E_NOINTERFACE: HRESULT = 0x8000_4002_u32 as i32;
pub const E_POINTER: HRESULT = 0x8000_4003_u32 as i32;
pub const E_FAIL: HRESULT = 0x8000_4005_u32 as i32;
pub const E_OUTOFMEMORY: HRESULT = 0x8007_000E_u32 as i32;
pub const E_INVALIDARG: HRESULT = 0x8007_0057_u32 as i32;
pub const CLASS_E_NOAGGREGATION: HRESULT = 0x8004_0110_u32 as i32;
pub const CLASS_E_CLASSNOTAVAILABLE: HRESULT = 0x8004_0111_u32 as i32;

pub const TRUE: BOOL = 1;
pub const FALSE: BOOL = 0;

#[inline]
pub fn FAILED(hr: HRESULT) -> bool {
    hr < 0
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct GUID {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

pub type IID = GUID;
pub type CLSID = GUID;
pub type REFIID = *const IID;
pub type REFCLSID = *const CLSID;

impl GUID {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        GUID { data1, data2, data3, data4 }
    }
}

impl std::fmt::Display for GUID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

pub const IID_IUnknown: IID =
    GUID::new(0x00000000, 0x0000, 0x0000, [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46]);
pub const IID_IClassFactory: IID =
    GUID::new(0x00000001, 0x0000, 0x0000, [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46]);

// --- IUnknown ---

pub type QueryInterfaceFn =
    unsafe extern "system" fn(this: *mut c_void, riid: REFIID, ppv: *mut *mut c_void) -> HRESULT;
pub type AddRefFn = unsafe extern "system" fn(this: *mut c_void) -> ULONG;
pub type ReleaseFn = unsafe extern "system" fn(this: *mut c_void) -> ULONG;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct IUnknownVtbl {
    pub QueryInterface: QueryInterfaceFn,
    pub AddRef: AddRefFn,
    pub Release: ReleaseFn,
}

/// Any COM object: a pointer to a vtable pointer.
#[repr(C)]
pub struct IUnknown {
    pub lpVtbl: *const IUnknownVtbl,
}

// --- IClassFactory ---

#[repr(C)]
pub struct IClassFactoryVtbl {
    pub base: IUnknownVtbl,
    pub CreateInstance: unsafe extern "system" fn(
        this: *mut c_void,
        outer: *mut c_void,
        riid: REFIID,
        ppv: *mut *mut c_void,
    ) -> HRESULT,
    pub LockServer: unsafe extern "system" fn(this: *mut c_void, lock: BOOL) -> HRESULT,
}

/// Calls a method through a COM object's vtable.
///
/// `com_call!(ptr, Vtbl, Method, args...)` casts `ptr` to a pointer to a
/// `*const Vtbl` and invokes `Method` with `ptr` as the implicit `this`.
#[macro_export]
macro_rules! com_call {
    ($obj:expr, $vtbl:ty, $func:ident $(, $args:expr)*) => {{
        let obj_ptr = $obj as *mut ::std::ffi::c_void;
        let vtbl = *(obj_ptr as *const *const $vtbl);
        ((*vtbl).$func)(obj_ptr $(, $args)*)
    }};
}

/// Release a COM reference held as a raw pointer. Null is ignored.
///
/// # Safety
/// `obj` must be null or a live COM interface pointer owned by the caller.
pub unsafe fn release(obj: *mut c_void) {
    if !obj.is_null() {
        com_call!(obj, IUnknownVtbl, Release);
    }
}

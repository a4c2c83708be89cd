//! COM task allocator.
//!
//! Buffers whose ownership passes to the runtime (the instrumented-code map)
//! or that the rewriting engine hands back must come from the COM task
//! allocator. CoreCLR's PAL maps it onto the C heap outside Windows.

use std::ffi::c_void;

#[cfg(windows)]
#[link(name = "ole32")]
extern "system" {
    fn CoTaskMemAlloc(cb: usize) -> *mut c_void;
    fn CoTaskMemFree(pv: *mut c_void);
}

/// Allocate `size` bytes from the task allocator. Returns null on failure.
pub extern "system" fn task_mem_alloc(size: usize) -> *mut c_void {
    #[cfg(windows)]
    unsafe {
        CoTaskMemAlloc(size)
    }
    #[cfg(unix)]
    unsafe {
        libc::malloc(size)
    }
}

/// Release a block obtained from [`task_mem_alloc`]. Null is ignored.
///
/// # Safety
/// `ptr` must be null or a live task-allocator block not freed elsewhere.
pub unsafe fn task_mem_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    #[cfg(windows)]
    CoTaskMemFree(ptr);
    #[cfg(unix)]
    libc::free(ptr);
}

/// Copy `items` into a fresh task-allocator block.
///
/// Returns null for an empty slice or when allocation fails.
pub fn task_mem_copy<T: Copy>(items: &[T]) -> *mut T {
    if items.is_empty() {
        return std::ptr::null_mut();
    }
    let bytes = std::mem::size_of_val(items);
    let dst = task_mem_alloc(bytes) as *mut T;
    if !dst.is_null() {
        unsafe { std::ptr::copy_nonoverlapping(items.as_ptr(), dst, items.len()) };
    }
    dst
}

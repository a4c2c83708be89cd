//! The native engine ABI, driven through entry points defined in this test.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, OnceLock};

use clr_rewriter::engine::{AllocateBodyFn, AllocateFn, NativeEngine, RawRewriteResponse, TokenFromSigFn};
use clr_rewriter::memory;
use clr_rewriter::prelude::*;
use clr_rewriter::sys::cor::WCHAR;
use clr_rewriter::sys::corprof::{mdMethodDef, mdSignature, ModuleID, COR_IL_MAP};
use widestring::U16CStr;

const RESOLVED: mdSignature = 0x1100_0042;
const MODULE: ModuleID = 0x2001;

static HOME: Mutex<Option<String>> = Mutex::new(None);
static TOKEN_FROM_SIG: OnceLock<TokenFromSigFn> = OnceLock::new();
static ALLOCATE_BODY: OnceLock<AllocateBodyFn> = OnceLock::new();

thread_local! {
    static ASSEMBLIES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

unsafe extern "system" fn set_home_path(path: *const WCHAR) {
    *HOME.lock().unwrap() = Some(U16CStr::from_ptr_str(path).to_string_lossy());
}

unsafe extern "system" fn init(token_from_sig: TokenFromSigFn, _allocate: AllocateFn) {
    let _ = TOKEN_FROM_SIG.set(token_from_sig);
}

/// Allocates a scratch block and then the body block through the host, and
/// appends a `ret` to the original body.
unsafe extern "system" fn trace(
    assembly: *const WCHAR,
    _module: *const WCHAR,
    module_id: ModuleID,
    _method_def: mdMethodDef,
    body: *const u8,
    body_len: u32,
    allocate_body: AllocateBodyFn,
) -> RawRewriteResponse {
    let _ = ALLOCATE_BODY.set(allocate_body);
    let assembly = U16CStr::from_ptr_str(assembly).to_string_lossy();
    ASSEMBLIES.with(|seen| seen.borrow_mut().push(assembly));

    let scratch = allocate_body(module_id, 1);
    let block = allocate_body(module_id, body_len + 1);
    if scratch.is_null() || block.is_null() {
        return RawRewriteResponse {
            new_method_body: ptr::null_mut(),
            map_entries_count: 0,
            map_entries: ptr::null_mut(),
        };
    }
    ptr::copy_nonoverlapping(body, block, body_len as usize);
    *block.add(body_len as usize) = 0x2A;

    let map = [COR_IL_MAP { oldOffset: 0, newOffset: 0, fAccurate: 1 }];
    RawRewriteResponse {
        new_method_body: block,
        map_entries_count: map.len() as u32,
        map_entries: memory::task_mem_copy(&map),
    }
}

fn engine() -> NativeEngine {
    unsafe { NativeEngine::from_entry_points(set_home_path, init, trace) }
}

fn request(assembly: &str) -> RewriteRequest<'_> {
    RewriteRequest {
        assembly_name: assembly,
        module_name: "Shop.dll",
        module_id: MODULE,
        method_def: 0x0600_0001,
        body: &[0x00, 0x2A],
    }
}

fn block(blocks: &RefCell<Vec<Box<[u8]>>>, size: u32) -> NonNull<u8> {
    let mut block = vec![0u8; size as usize].into_boxed_slice();
    let ptr = NonNull::new(block.as_mut_ptr()).unwrap();
    blocks.borrow_mut().push(block);
    ptr
}

#[test]
fn home_path_reaches_engine_as_utf16() {
    engine().set_home_path(Path::new("/opt/clr-rewriter")).unwrap();
    assert_eq!(HOME.lock().unwrap().as_deref(), Some("/opt/clr-rewriter"));
}

// The only test that initializes an engine: host capabilities are process-wide.
#[test]
fn token_resolver_lives_as_long_as_the_engine() {
    let engine = engine();
    engine.initialize(HostCapabilities {
        token_from_sig: Arc::new(|_module: ModuleID, signature: &[u8]| -> Option<mdSignature> {
            (!signature.is_empty()).then_some(RESOLVED)
        }),
        allocate: memory::task_mem_alloc,
    });

    let token_from_sig = *TOKEN_FROM_SIG.get().unwrap();
    let signature = [0x00u8, 0x01, 0x01];
    assert_eq!(token_from_sig(MODULE, signature.as_ptr(), signature.len() as i32), RESOLVED);
    assert_eq!(token_from_sig(MODULE, signature.as_ptr(), 0), 0);
    assert_eq!(token_from_sig(MODULE, signature.as_ptr(), -1), 0);
    assert_eq!(token_from_sig(MODULE, ptr::null(), 3), 0);

    drop(engine);
    assert_eq!(token_from_sig(MODULE, signature.as_ptr(), signature.len() as i32), 0);
}

#[test]
fn body_allocator_is_only_reachable_during_a_rewrite() {
    let engine = engine();
    let calls = Cell::new(0);
    let blocks = RefCell::new(Vec::new());
    let allocator = |_module: ModuleID, size: u32| -> Option<NonNull<u8>> {
        calls.set(calls.get() + 1);
        Some(block(&blocks, size))
    };

    let response = engine.rewrite(&request("Shop"), &allocator);

    let body = response.new_body.expect("engine replaced the body");
    assert_eq!(unsafe { std::slice::from_raw_parts(body.as_ptr(), 3) }, &[0x00, 0x2A, 0x2A]);
    assert_eq!(
        response.offset_map,
        vec![OffsetMapping { old_offset: 0, new_offset: 0, accurate: true }]
    );
    assert_eq!(calls.get(), 2);
    ASSEMBLIES.with(|seen| assert_eq!(*seen.borrow(), vec!["Shop".to_string()]));

    let allocate_body = *ALLOCATE_BODY.get().unwrap();
    assert!(allocate_body(MODULE, 8).is_null());
    assert_eq!(calls.get(), 2);
}

#[test]
fn nested_rewrite_restores_the_outer_allocator() {
    let engine = engine();
    let log = RefCell::new(Vec::new());
    let blocks = RefCell::new(Vec::new());
    let inner_replaced = Cell::new(None);

    let inner = |_module: ModuleID, size: u32| -> Option<NonNull<u8>> {
        log.borrow_mut().push("inner");
        Some(block(&blocks, size))
    };
    let outer = |_module: ModuleID, size: u32| -> Option<NonNull<u8>> {
        if inner_replaced.get().is_none() {
            let response = engine.rewrite(&request("Shop.Inner"), &inner);
            inner_replaced.set(Some(!response.is_unchanged()));
        }
        log.borrow_mut().push("outer");
        Some(block(&blocks, size))
    };

    let response = engine.rewrite(&request("Shop.Outer"), &outer);

    assert!(!response.is_unchanged());
    assert_eq!(inner_replaced.get(), Some(true));
    // The outer `Trace` allocated again after the nested one returned.
    assert_eq!(*log.borrow(), vec!["inner", "inner", "outer", "outer"]);
    ASSEMBLIES.with(|seen| {
        assert_eq!(*seen.borrow(), vec!["Shop.Outer".to_string(), "Shop.Inner".to_string()])
    });

    let allocate_body = *ALLOCATE_BODY.get().unwrap();
    assert!(allocate_body(MODULE, 8).is_null());
}

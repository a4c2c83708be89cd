use std::ptr;

use clr_rewriter::config::AgentConfig;
use clr_rewriter::engine::{EngineLoader, NativeEngineLoader, OffsetMapping, RawRewriteResponse, RewriteResponse};
use clr_rewriter::memory;
use clr_rewriter::sys::corprof::COR_IL_MAP;
use clr_rewriter::AgentError;

#[test]
fn offset_mapping_converts_to_runtime_layout() {
    let exact = COR_IL_MAP::from(OffsetMapping {
        old_offset: 4,
        new_offset: 19,
        accurate: true,
    });
    assert_eq!(exact, COR_IL_MAP { oldOffset: 4, newOffset: 19, fAccurate: 1 });

    let approximate = OffsetMapping::from(COR_IL_MAP { oldOffset: 7, newOffset: 30, fAccurate: 0 });
    assert!(!approximate.accurate);
    assert_eq!((approximate.old_offset, approximate.new_offset), (7, 30));
}

#[test]
fn raw_response_without_body_is_unchanged() {
    let raw = RawRewriteResponse {
        new_method_body: ptr::null_mut(),
        map_entries_count: 0,
        map_entries: ptr::null_mut(),
    };
    let response = unsafe { raw.into_response() };
    assert!(response.is_unchanged());
    assert!(response.offset_map.is_empty());
}

#[test]
fn raw_response_map_is_copied_out_of_task_memory() {
    let entries = [
        COR_IL_MAP { oldOffset: 0, newOffset: 0, fAccurate: 1 },
        COR_IL_MAP { oldOffset: 2, newOffset: 12, fAccurate: 1 },
        COR_IL_MAP { oldOffset: 5, newOffset: 15, fAccurate: 0 },
    ];
    let mut body = [0x2Au8; 4];
    let raw = RawRewriteResponse {
        new_method_body: body.as_mut_ptr(),
        map_entries_count: entries.len() as u32,
        map_entries: memory::task_mem_copy(&entries),
    };
    assert!(!raw.map_entries.is_null());

    let response = unsafe { raw.into_response() };

    assert_eq!(response.new_body.map(|p| p.as_ptr()), Some(body.as_mut_ptr()));
    assert_eq!(
        response.offset_map,
        vec![
            OffsetMapping { old_offset: 0, new_offset: 0, accurate: true },
            OffsetMapping { old_offset: 2, new_offset: 12, accurate: true },
            OffsetMapping { old_offset: 5, new_offset: 15, accurate: false },
        ]
    );
}

#[test]
fn raw_response_layout_matches_engine_abi() {
    assert_eq!(
        std::mem::size_of::<RawRewriteResponse>(),
        3 * std::mem::size_of::<usize>()
    );
}

#[test]
fn task_mem_copy_of_empty_slice_is_null() {
    let empty: [COR_IL_MAP; 0] = [];
    assert!(memory::task_mem_copy(&empty).is_null());
}

#[test]
fn default_response_is_unchanged() {
    assert!(RewriteResponse::default().is_unchanged());
    assert!(RewriteResponse::unchanged().offset_map.is_empty());
}

#[test]
fn native_loader_reports_missing_library() {
    let dir = tempfile::tempdir().unwrap();
    let config = AgentConfig::new(dir.path());

    match NativeEngineLoader.load(&config) {
        Err(AgentError::EngineLoad { path, .. }) => assert_eq!(path, config.engine_path()),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("loaded an engine from an empty directory"),
    }
}

/// A shared object already mapped into this process whose file name starts
/// with `prefix`.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn mapped_library(prefix: &str) -> std::path::PathBuf {
    let maps = std::fs::read_to_string("/proc/self/maps").unwrap();
    maps.lines()
        .filter_map(|line| line.split_whitespace().nth(5))
        .map(std::path::PathBuf::from)
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(prefix))
        })
        .unwrap_or_else(|| panic!("no {prefix}* mapped"))
}

#[test]
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn native_loader_reports_first_missing_entry_point() {
    let dir = tempfile::tempdir().unwrap();
    let config = AgentConfig::new(dir.path());
    std::fs::copy(mapped_library("libgcc_s"), config.engine_path()).unwrap();

    match NativeEngineLoader.load(&config) {
        Err(AgentError::MissingEntryPoint { symbol, .. }) => assert_eq!(symbol, "SetHomePath"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("resolved engine entry points in libgcc_s"),
    }
}

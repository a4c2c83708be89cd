//! Test doubles for the runtime and the rewriting engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clr_rewriter::prelude::*;
use clr_rewriter::sys::corprof::{
    mdMethodDef, mdSignature, mdTypeDef, AssemblyID, FunctionID, ModuleID, COR_IL_MAP,
};

pub const TOKEN_FROM_SIG: mdSignature = 0x1100_0001;

/// A runtime interaction the pipeline performed, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetEventMask(u32),
    SetCodeMap {
        function: FunctionID,
        start_jit: bool,
        map: Vec<COR_IL_MAP>,
    },
    SetBody {
        module: ModuleID,
        method: mdMethodDef,
        body: Vec<u8>,
    },
    RequestDetach(u32),
}

/// Ids handed out by [`MockInfo::add_method`].
#[derive(Debug, Copy, Clone)]
pub struct MethodIds {
    pub function: FunctionID,
    pub module: ModuleID,
    pub method_def: mdMethodDef,
}

#[derive(Default)]
pub struct MockInfo {
    functions: HashMap<FunctionID, FunctionInfo>,
    modules: HashMap<ModuleID, ModuleInfo>,
    assemblies: HashMap<AssemblyID, String>,
    methods: HashMap<(ModuleID, mdMethodDef), (mdTypeDef, String)>,
    types: HashMap<(ModuleID, mdTypeDef), String>,
    bodies: HashMap<(ModuleID, mdMethodDef), Vec<u8>>,
    /// Blocks returned by `allocate_il_body`, keyed by address.
    allocations: Mutex<Vec<Box<[u8]>>>,
    calls: Mutex<Vec<Call>>,
    pub fail_code_map: AtomicBool,
    pub fail_body: AtomicBool,
    /// Detach request number (1-based) that succeeds; 0 means never.
    pub detach_succeeds_on: AtomicU32,
    detach_requests: AtomicU32,
}

impl MockInfo {
    pub fn new() -> Self {
        MockInfo::default()
    }

    /// Register a fully resolvable method with an IL body.
    pub fn add_method(&mut self, assembly: &str, module: &str, type_name: &str, method: &str) -> MethodIds {
        let n = self.functions.len() + 1;
        let ids = MethodIds {
            function: 0x1000 + n,
            module: 0x2000 + n,
            method_def: 0x0600_0000 + n as u32,
        };
        let assembly_id = 0x3000 + n;
        let type_def = 0x0200_0000 + n as u32;

        self.functions.insert(
            ids.function,
            FunctionInfo {
                class_id: 0x4000 + n,
                module_id: ids.module,
                method_def: ids.method_def,
            },
        );
        self.modules.insert(
            ids.module,
            ModuleInfo {
                name: module.to_string(),
                assembly_id,
            },
        );
        self.assemblies.insert(assembly_id, assembly.to_string());
        self.methods
            .insert((ids.module, ids.method_def), (type_def, method.to_string()));
        self.types.insert((ids.module, type_def), type_name.to_string());
        self.bodies
            .insert((ids.module, ids.method_def), vec![0x0A, 0x00, 0x2A]);
        ids
    }

    /// Register a function whose module cannot be resolved.
    pub fn add_orphan_function(&mut self, function: FunctionID) {
        self.functions.insert(
            function,
            FunctionInfo {
                class_id: 0,
                module_id: 0xDEAD,
                method_def: 0x0600_0001,
            },
        );
    }

    pub fn remove_body(&mut self, ids: MethodIds) {
        self.bodies.remove(&(ids.module, ids.method_def));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn detach_requests(&self) -> u32 {
        self.detach_requests.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    /// Length of a block this mock allocated, if `ptr` is one.
    fn allocation_len(&self, ptr: *const u8) -> Option<usize> {
        self.allocations
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.as_ptr() == ptr)
            .map(|b| b.len())
    }
}

impl ProfilerInfo for MockInfo {
    fn function_info(&self, function: FunctionID) -> Result<FunctionInfo, HResult> {
        self.functions.get(&function).copied().ok_or(HResult::INVALID_ARG)
    }

    fn module_info(&self, module: ModuleID) -> Result<ModuleInfo, HResult> {
        self.modules.get(&module).cloned().ok_or(HResult::INVALID_ARG)
    }

    fn assembly_name(&self, assembly: AssemblyID) -> Result<String, HResult> {
        self.assemblies.get(&assembly).cloned().ok_or(HResult::INVALID_ARG)
    }

    fn method_props(&self, module: ModuleID, method: mdMethodDef) -> Result<(mdTypeDef, String), HResult> {
        self.methods.get(&(module, method)).cloned().ok_or(HResult::INVALID_ARG)
    }

    fn type_def_name(&self, module: ModuleID, type_def: mdTypeDef) -> Result<String, HResult> {
        self.types.get(&(module, type_def)).cloned().ok_or(HResult::INVALID_ARG)
    }

    fn il_function_body(&self, module: ModuleID, method: mdMethodDef) -> Result<&[u8], HResult> {
        self.bodies
            .get(&(module, method))
            .map(Vec::as_slice)
            .ok_or(HResult::FAIL)
    }

    fn allocate_il_body(&self, _module: ModuleID, size: u32) -> Result<*mut u8, HResult> {
        let mut block = vec![0u8; size as usize].into_boxed_slice();
        let ptr = block.as_mut_ptr();
        self.allocations.lock().unwrap().push(block);
        Ok(ptr)
    }

    fn set_il_instrumented_code_map(
        &self,
        function: FunctionID,
        start_jit: bool,
        map: &[COR_IL_MAP],
    ) -> Result<(), HResult> {
        self.record(Call::SetCodeMap {
            function,
            start_jit,
            map: map.to_vec(),
        });
        if self.fail_code_map.load(Ordering::SeqCst) {
            return Err(HResult::OUT_OF_MEMORY);
        }
        Ok(())
    }

    fn set_il_function_body(&self, module: ModuleID, method: mdMethodDef, body: *const u8) -> Result<(), HResult> {
        let len = self.allocation_len(body).ok_or(HResult::POINTER)?;
        let bytes = unsafe { std::slice::from_raw_parts(body, len) }.to_vec();
        self.record(Call::SetBody {
            module,
            method,
            body: bytes,
        });
        if self.fail_body.load(Ordering::SeqCst) {
            return Err(HResult::FAIL);
        }
        Ok(())
    }

    fn set_event_mask(&self, mask: u32) -> Result<(), HResult> {
        self.record(Call::SetEventMask(mask));
        Ok(())
    }

    fn request_profiler_detach(&self, expected_completion_ms: u32) -> Result<(), HResult> {
        self.record(Call::RequestDetach(expected_completion_ms));
        let n = self.detach_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let succeeds_on = self.detach_succeeds_on.load(Ordering::SeqCst);
        if succeeds_on != 0 && n >= succeeds_on {
            Ok(())
        } else {
            Err(HResult::FAIL)
        }
    }

    fn token_from_sig(&self, _module: ModuleID, signature: &[u8]) -> Result<mdSignature, HResult> {
        if signature.is_empty() {
            return Err(HResult::INVALID_ARG);
        }
        Ok(TOKEN_FROM_SIG)
    }
}

/// What the mock engine does with every request.
#[derive(Debug, Clone)]
pub enum Behavior {
    Unchanged,
    Replace { body: Vec<u8>, map: Vec<OffsetMapping> },
}

#[derive(Debug, Default)]
pub struct EngineStats {
    pub loads: AtomicUsize,
    pub home_paths: Mutex<Vec<PathBuf>>,
    pub inits: AtomicUsize,
    /// Result of calling the token resolver once during `initialize`.
    pub resolved_token: Mutex<Option<mdSignature>>,
    /// `(assembly, module, method_def, body)` of every rewrite request.
    pub requests: Mutex<Vec<(String, String, mdMethodDef, Vec<u8>)>>,
}

/// Runs inside the engine's `initialize`, on the loading thread.
pub type InitHook = Arc<dyn Fn() + Send + Sync>;

pub struct MockLoader {
    pub stats: Arc<EngineStats>,
    pub behavior: Behavior,
    pub fail: bool,
    /// Panic inside `load` instead of returning.
    pub panic: bool,
    /// The loaded engine rejects its home path.
    pub fail_home_path: bool,
    pub on_initialize: Option<InitHook>,
    pub delay: Duration,
}

impl MockLoader {
    pub fn new(behavior: Behavior) -> Self {
        MockLoader {
            stats: Arc::new(EngineStats::default()),
            behavior,
            fail: false,
            panic: false,
            fail_home_path: false,
            on_initialize: None,
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        MockLoader {
            fail: true,
            ..MockLoader::new(Behavior::Unchanged)
        }
    }
}

impl EngineLoader for MockLoader {
    fn load(&self, config: &AgentConfig) -> Result<Box<dyn RewriteEngine>, AgentError> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if self.panic {
            panic!("engine loader blew up");
        }
        if self.fail {
            return Err(AgentError::HomeDirectory(format!(
                "no engine in {}",
                config.home_dir.display()
            )));
        }
        Ok(Box::new(MockEngine {
            stats: Arc::clone(&self.stats),
            behavior: self.behavior.clone(),
            fail_home_path: self.fail_home_path,
            on_initialize: self.on_initialize.clone(),
        }))
    }
}

struct MockEngine {
    stats: Arc<EngineStats>,
    behavior: Behavior,
    fail_home_path: bool,
    on_initialize: Option<InitHook>,
}

impl RewriteEngine for MockEngine {
    fn set_home_path(&self, home: &Path) -> Result<(), AgentError> {
        self.stats.home_paths.lock().unwrap().push(home.to_path_buf());
        if self.fail_home_path {
            return Err(AgentError::InvalidHomePath(home.to_path_buf()));
        }
        Ok(())
    }

    fn initialize(&self, host: HostCapabilities) {
        self.stats.inits.fetch_add(1, Ordering::SeqCst);
        let token = (host.token_from_sig)(0x2001, &[0x00, 0x01, 0x01]);
        *self.stats.resolved_token.lock().unwrap() = token;
        if let Some(hook) = &self.on_initialize {
            hook();
        }
    }

    fn rewrite(&self, request: &RewriteRequest<'_>, allocator: &dyn BodyAllocator) -> RewriteResponse {
        self.stats.requests.lock().unwrap().push((
            request.assembly_name.to_string(),
            request.module_name.to_string(),
            request.method_def,
            request.body.to_vec(),
        ));
        match &self.behavior {
            Behavior::Unchanged => RewriteResponse::unchanged(),
            Behavior::Replace { body, map } => {
                let Some(block) = allocator.allocate(request.module_id, body.len() as u32) else {
                    return RewriteResponse::unchanged();
                };
                unsafe { std::ptr::copy_nonoverlapping(body.as_ptr(), block.as_ptr(), body.len()) };
                RewriteResponse::replaced(block, map.clone())
            }
        }
    }
}

pub fn config() -> AgentConfig {
    AgentConfig::new("/opt/clr-rewriter")
}

pub fn replacing(body: &[u8], map: &[(u32, u32, bool)]) -> Behavior {
    Behavior::Replace {
        body: body.to_vec(),
        map: map
            .iter()
            .map(|&(old_offset, new_offset, accurate)| OffsetMapping {
                old_offset,
                new_offset,
                accurate,
            })
            .collect(),
    }
}

//! Resolve who a JIT compilation is for.

use crate::error::HResult;
use crate::info::ProfilerInfo;
use crate::sys::corprof::{mdMethodDef, mdTypeDef, ClassID, FunctionID, ModuleID};

/// Fully qualified identity of a method about to be compiled.
///
/// Derived fresh for each compilation; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodIdentity {
    pub function_id: FunctionID,
    pub class_id: ClassID,
    pub module_id: ModuleID,
    pub method_def: mdMethodDef,
    pub type_def: mdTypeDef,
    pub assembly_name: String,
    pub module_name: String,
    pub type_name: String,
    pub method_name: String,
}

impl MethodIdentity {
    /// Walk function → module → assembly → method → declaring type.
    ///
    /// Each step needs the previous one; the first failure aborts the walk
    /// and is returned together with the step that failed.
    pub fn resolve<I: ProfilerInfo + ?Sized>(
        info: &I,
        function_id: FunctionID,
    ) -> Result<Self, (ResolveStep, HResult)> {
        let function = info
            .function_info(function_id)
            .map_err(|e| (ResolveStep::Function, e))?;
        let module = info
            .module_info(function.module_id)
            .map_err(|e| (ResolveStep::Module, e))?;
        let assembly_name = info
            .assembly_name(module.assembly_id)
            .map_err(|e| (ResolveStep::Assembly, e))?;
        let (type_def, method_name) = info
            .method_props(function.module_id, function.method_def)
            .map_err(|e| (ResolveStep::Method, e))?;
        let type_name = info
            .type_def_name(function.module_id, type_def)
            .map_err(|e| (ResolveStep::Type, e))?;

        Ok(MethodIdentity {
            function_id,
            class_id: function.class_id,
            module_id: function.module_id,
            method_def: function.method_def,
            type_def,
            assembly_name,
            module_name: module.name,
            type_name,
            method_name,
        })
    }

    /// `Namespace.Type.Method` form used in diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.type_name, self.method_name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResolveStep {
    Function,
    Module,
    Assembly,
    Method,
    Type,
}

impl std::fmt::Display for ResolveStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            ResolveStep::Function => "GetFunctionInfo",
            ResolveStep::Module => "GetModuleInfo",
            ResolveStep::Assembly => "GetAssemblyInfo",
            ResolveStep::Method => "GetMethodProps",
            ResolveStep::Type => "GetTypeDefProps",
        };
        f.write_str(step)
    }
}

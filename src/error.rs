//! Error types shared by the agent.

use std::path::PathBuf;

use thiserror::Error;

use crate::sys::cor::{self, HRESULT};

/// A failed `HRESULT` returned by the runtime or by a metadata interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("HRESULT {0:#010x}")]
pub struct HResult(pub HRESULT);

impl HResult {
    pub const FAIL: HResult = HResult(cor::E_FAIL);
    pub const POINTER: HResult = HResult(cor::E_POINTER);
    pub const OUT_OF_MEMORY: HResult = HResult(cor::E_OUTOFMEMORY);
    pub const INVALID_ARG: HResult = HResult(cor::E_INVALIDARG);

    /// Turns a raw status into `Ok(())` or an error.
    pub fn check(hr: HRESULT) -> Result<(), HResult> {
        if cor::FAILED(hr) {
            Err(HResult(hr))
        } else {
            Ok(())
        }
    }

    pub fn code(self) -> HRESULT {
        self.0
    }
}

/// Errors raised while bringing the agent or its rewriting engine up.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to load rewriting engine {}: {source}", path.display())]
    EngineLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("rewriting engine does not export `{symbol}`: {source}")]
    MissingEntryPoint {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("cannot resolve the agent's home directory: {0}")]
    HomeDirectory(String),

    #[error("engine rejected home path {}", .0.display())]
    InvalidHomePath(PathBuf),

    #[error("runtime call failed: {0}")]
    Runtime(#[from] HResult),
}

//! Agent configuration, built once at attach and never mutated afterwards.
//!
//! # Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `CLR_REWRITER_SETTINGS` | Path of the activation settings file |
//! | `CLR_REWRITER_ENGINE` | File name of the rewriting engine inside the home directory |
//! | `CLR_REWRITER_LOG` | `env_logger` filter, default `warn` |

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AgentError;
use crate::exclusion::ExclusionFilter;

pub const SETTINGS_FILE_NAME: &str = "clr-rewriter.settings";
pub const ENGINE_LIBRARY_STEM: &str = "ClrRewriter.Engine";

pub const SETTINGS_ENV: &str = "CLR_REWRITER_SETTINGS";
pub const ENGINE_ENV: &str = "CLR_REWRITER_ENGINE";
pub const LOG_ENV: &str = "CLR_REWRITER_LOG";

/// How the watchdog asks the runtime to unload an inactive agent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DetachPolicy {
    pub attempts: u32,
    pub interval: Duration,
    /// Hint passed to `RequestProfilerDetach`.
    pub expected_completion: Duration,
}

impl Default for DetachPolicy {
    fn default() -> Self {
        DetachPolicy {
            attempts: 10,
            interval: Duration::from_secs(1),
            expected_completion: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Directory the agent library was loaded from.
    pub home_dir: PathBuf,
    pub settings_path: PathBuf,
    /// Engine library file name, resolved inside `home_dir`.
    pub engine_library: OsString,
    pub exclusions: ExclusionFilter,
    pub detach: DetachPolicy,
}

impl AgentConfig {
    /// Defaults for an agent installed in `home_dir`.
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        AgentConfig {
            settings_path: home_dir.join(SETTINGS_FILE_NAME),
            engine_library: libloading::library_filename(ENGINE_LIBRARY_STEM),
            home_dir,
            exclusions: ExclusionFilter::default(),
            detach: DetachPolicy::default(),
        }
    }

    /// Defaults for the agent's own installation directory, with the
    /// environment overrides applied.
    pub fn from_environment() -> Result<Self, AgentError> {
        let mut config = AgentConfig::new(agent_home_dir()?);
        if let Some(path) = std::env::var_os(SETTINGS_ENV) {
            config.settings_path = PathBuf::from(path);
        }
        if let Some(name) = std::env::var_os(ENGINE_ENV) {
            config.engine_library = name;
        }
        Ok(config)
    }

    pub fn engine_path(&self) -> PathBuf {
        self.home_dir.join(&self.engine_library)
    }
}

/// Identity of the process the agent is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Base name of the executable, e.g. `dotnet` or `MyApp.exe`.
    pub executable_name: String,
    pub command_line: String,
}

impl ProcessInfo {
    pub fn new(executable_name: impl Into<String>, command_line: impl Into<String>) -> Self {
        ProcessInfo {
            executable_name: executable_name.into(),
            command_line: command_line.into(),
        }
    }

    /// The running process.
    ///
    /// On Windows the command line is the one the process was started with,
    /// quotes included. Elsewhere there is no such string, only `argv`, so
    /// the arguments are joined with single spaces and carry no quoting.
    pub fn current() -> Self {
        let executable_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();
        ProcessInfo {
            executable_name,
            command_line: raw_command_line(),
        }
    }
}

#[cfg(windows)]
fn raw_command_line() -> String {
    #[link(name = "kernel32")]
    extern "system" {
        fn GetCommandLineW() -> *const u16;
    }

    let line = unsafe { GetCommandLineW() };
    if line.is_null() {
        return String::new();
    }
    unsafe { widestring::U16CStr::from_ptr_str(line) }.to_string_lossy()
}

#[cfg(not(windows))]
fn raw_command_line() -> String {
    std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Directory containing the loaded agent library.
pub fn agent_home_dir() -> Result<PathBuf, AgentError> {
    let module = agent_module_path()?;
    module
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| AgentError::HomeDirectory(format!("{} has no parent directory", module.display())))
}

#[cfg(unix)]
fn agent_module_path() -> Result<PathBuf, AgentError> {
    use std::ffi::CStr;
    use std::os::unix::ffi::OsStrExt;

    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let anchor = agent_module_path as *const libc::c_void;
    let found = unsafe { libc::dladdr(anchor, &mut info) };
    if found == 0 || info.dli_fname.is_null() {
        return Err(AgentError::HomeDirectory("dladdr could not resolve the agent module".into()));
    }
    let name = unsafe { CStr::from_ptr(info.dli_fname) };
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(name.to_bytes())))
}

#[cfg(windows)]
fn agent_module_path() -> Result<PathBuf, AgentError> {
    use std::ffi::c_void;
    use std::os::windows::ffi::OsStringExt;

    const GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT: u32 = 0x2;
    const GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS: u32 = 0x4;

    #[link(name = "kernel32")]
    extern "system" {
        fn GetModuleHandleExW(flags: u32, module_name: *const u16, module: *mut *mut c_void) -> i32;
        fn GetModuleFileNameW(module: *mut c_void, filename: *mut u16, size: u32) -> u32;
    }

    let mut module: *mut c_void = std::ptr::null_mut();
    let anchor = agent_module_path as *const u16;
    let ok = unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            anchor,
            &mut module,
        )
    };
    if ok == 0 {
        return Err(AgentError::HomeDirectory("GetModuleHandleExW failed".into()));
    }

    let mut buf = vec![0u16; 1024];
    loop {
        let len = unsafe { GetModuleFileNameW(module, buf.as_mut_ptr(), buf.len() as u32) } as usize;
        if len == 0 {
            return Err(AgentError::HomeDirectory("GetModuleFileNameW failed".into()));
        }
        if len < buf.len() {
            return Ok(PathBuf::from(OsString::from_wide(&buf[..len])));
        }
        buf.resize(buf.len() * 2, 0);
    }
}

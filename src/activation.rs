//! Attach-time decision: instrument this process, or step aside.

use log::info;

use crate::config::{AgentConfig, ProcessInfo};
use crate::settings;
use crate::sys::corprof::{
    COR_PRF_ALLOWABLE_AFTER_ATTACH, COR_PRF_DISABLE_TRANSPARENCY_CHECKS_UNDER_FULL_TRUST,
    COR_PRF_MONITOR_JIT_COMPILATION, COR_PRF_MONITOR_NONE,
};

/// Made once per process and never revisited.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActivationDecision {
    /// Subscribe to JIT compilation and rewrite admitted methods.
    Instrument,
    /// Subscribe to nothing and ask the runtime to detach the agent.
    Decline,
}

impl ActivationDecision {
    pub fn decide(config: &AgentConfig, process: &ProcessInfo) -> Self {
        let decision = if settings::should_instrument_file(&config.settings_path, process) {
            ActivationDecision::Instrument
        } else {
            ActivationDecision::Decline
        };
        info!("{} with pid {}: {:?}", process.executable_name, std::process::id(), decision);
        decision
    }

    pub fn is_instrumenting(self) -> bool {
        self == ActivationDecision::Instrument
    }

    /// Event mask to hand to `SetEventMask`.
    ///
    /// An agent loaded into a running process (`attaching`) may only ask for
    /// [`COR_PRF_ALLOWABLE_AFTER_ATTACH`] flags, so the transparency override
    /// is dropped there.
    pub fn event_mask(self, attaching: bool) -> u32 {
        let mask = match self {
            ActivationDecision::Instrument => {
                COR_PRF_MONITOR_JIT_COMPILATION | COR_PRF_DISABLE_TRANSPARENCY_CHECKS_UNDER_FULL_TRUST
            }
            ActivationDecision::Decline => COR_PRF_MONITOR_NONE,
        };
        if attaching {
            mask & COR_PRF_ALLOWABLE_AFTER_ATTACH
        } else {
            mask
        }
    }
}


//! Self-detach for an agent that decided not to instrument.
//!
//! `RequestProfilerDetach` is refused while the runtime is still starting
//! up, so the request is retried a bounded number of times from a
//! background thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::config::DetachPolicy;
use crate::info::ProfilerInfo;

pub const THREAD_NAME: &str = "clr-rewriter-detach";

/// Sleep, request detach, repeat.
///
/// Returns the 1-based attempt that the runtime accepted, or `None` after
/// `policy.attempts` refusals.
pub fn run<I: ProfilerInfo + ?Sized>(info: &I, policy: &DetachPolicy) -> Option<u32> {
    let expected_ms = u32::try_from(policy.expected_completion.as_millis()).unwrap_or(u32::MAX);

    for attempt in 1..=policy.attempts {
        thread::sleep(policy.interval);
        match info.request_profiler_detach(expected_ms) {
            Ok(()) => {
                info!("detach requested on attempt {}", attempt);
                return Some(attempt);
            }
            Err(e) => debug!("detach attempt {} refused: {}", attempt, e),
        }
    }

    warn!("runtime refused detach {} times; agent stays attached and idle", policy.attempts);
    None
}

/// Run [`run`] on a named background thread.
pub fn spawn<I: ProfilerInfo + 'static>(info: Arc<I>, policy: DetachPolicy) -> io::Result<JoinHandle<Option<u32>>> {
    thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || run(&*info, &policy))
}

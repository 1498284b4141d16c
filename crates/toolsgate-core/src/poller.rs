use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{HypervisorSession, ObjectRef, PowerState, VmStatus};
use crate::cancel::CancelSignal;
use crate::config::{DEFAULT_INTERVAL_SECONDS, DEFAULT_MAX_ATTEMPTS};
use crate::error::{BackendError, ProcessError};

/// How long and how often to wait for guest tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Sleeps allowed between checks; the loop checks `max_attempts + 1` times.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Result of a single status check inside the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Ready,
    Waiting(VmStatus),
    Retryable(BackendError),
    Fatal(BackendError),
}

impl Observation {
    pub fn classify(fetched: Result<VmStatus, BackendError>) -> Self {
        match fetched {
            Ok(status) if status.tools.is_ok() => Observation::Ready,
            Ok(status) => Observation::Waiting(status),
            Err(e) if e.is_transient() => Observation::Retryable(e),
            Err(e) => Observation::Fatal(e),
        }
    }
}

/// How the VM reached a usable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readiness {
    /// Tools were running at the first check; nothing was touched.
    AlreadyReady,
    Registered {
        /// Status checks made inside the poll loop, the successful one included.
        fetches: u32,
        powered_on: bool,
        /// False when the VM was already running, or the shutdown call failed.
        shutdown_requested: bool,
    },
}

/// Brings `vm` to a state where guest tools report ok, powering it on and
/// back off if it was off.
pub async fn await_tools<S>(
    session: &S,
    vm: &ObjectRef,
    policy: &PollPolicy,
    cancel: &CancelSignal,
) -> Result<Readiness, ProcessError>
where
    S: HypervisorSession + ?Sized,
{
    let status = cancel
        .guard(session.vm_status(vm))
        .await?
        .map_err(ProcessError::VmStatus)?;
    debug!(%vm, ?status, "initial vm status");

    if status.tools.is_ok() {
        info!(%vm, "guest tools already ok");
        return Ok(Readiness::AlreadyReady);
    }

    let powered_on = match status.power {
        PowerState::PoweredOff => {
            info!(%vm, "guest tools not ok and vm powered off; booting so tools register with vCenter");
            cancel
                .guard(session.power_on(vm))
                .await?
                .map_err(ProcessError::PowerOn)?;
            true
        }
        PowerState::PoweredOn => {
            info!(%vm, tools = ?status.tools, "vm already running; waiting for guest tools");
            false
        }
        PowerState::Suspended => return Err(ProcessError::UnexpectedPowerState(status.power)),
    };

    let mut attempt: u32 = 0;
    let last_error = loop {
        let fetched = cancel.guard(session.vm_status(vm)).await?;
        let observed_error = match Observation::classify(fetched) {
            Observation::Ready => {
                let fetches = attempt + 1;
                info!(%vm, fetches, "guest tools registered");
                let shutdown_requested = powered_on && request_shutdown(session, vm, cancel).await?;
                return Ok(Readiness::Registered {
                    fetches,
                    powered_on,
                    shutdown_requested,
                });
            }
            // The power-on was accepted but did not take; no amount of waiting helps.
            Observation::Waiting(status) if powered_on && status.power == PowerState::PoweredOff => {
                return Err(ProcessError::VmStayedOff {
                    fetches: attempt + 1,
                });
            }
            Observation::Waiting(status) => {
                debug!(%vm, attempt, tools = ?status.tools, "guest tools not ready yet");
                None
            }
            Observation::Retryable(e) => {
                warn!(%vm, attempt, "error retrieving vm status: {e}");
                Some(e)
            }
            Observation::Fatal(e) => return Err(ProcessError::StatusPoll(e)),
        };

        if attempt >= policy.max_attempts {
            break observed_error;
        }
        attempt += 1;
        cancel.guard(tokio::time::sleep(policy.interval)).await?;
    };

    let fetches = policy.max_attempts + 1;
    warn!(%vm, fetches, "giving up on guest tools");
    Err(match last_error {
        Some(source) => ProcessError::BackendUnavailable { fetches, source },
        None => ProcessError::ToolsTimeout {
            fetches,
            waited: policy.interval * policy.max_attempts,
        },
    })
}

async fn request_shutdown<S>(
    session: &S,
    vm: &ObjectRef,
    cancel: &CancelSignal,
) -> Result<bool, ProcessError>
where
    S: HypervisorSession + ?Sized,
{
    match cancel.guard(session.shutdown_guest(vm)).await? {
        Ok(()) => {
            info!(%vm, "guest shutdown requested");
            Ok(true)
        }
        Err(e) => {
            warn!(%vm, "error requesting guest shutdown: {e}");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ToolsStatus;

    #[test]
    fn classifies_observations() {
        let ok = VmStatus::new(ToolsStatus::ToolsOk, PowerState::PoweredOn);
        let waiting = VmStatus::new(ToolsStatus::ToolsNotRunning, PowerState::PoweredOn);
        assert_eq!(Observation::classify(Ok(ok)), Observation::Ready);
        assert_eq!(
            Observation::classify(Ok(waiting.clone())),
            Observation::Waiting(waiting)
        );
        assert!(matches!(
            Observation::classify(Err(BackendError::Http(502))),
            Observation::Retryable(_)
        ));
        assert!(matches!(
            Observation::classify(Err(BackendError::Fault {
                code: "ManagedObjectNotFound".into(),
                message: "gone".into()
            })),
            Observation::Fatal(_)
        ));
    }

    #[test]
    fn default_policy() {
        let p = PollPolicy::default();
        assert_eq!(p.interval, Duration::from_secs(30));
        assert_eq!(p.max_attempts, 6);
    }
}

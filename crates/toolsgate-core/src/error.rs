use std::time::Duration;
use thiserror::Error;

use crate::backend::PowerState;

/// Faults the endpoint raises for conditions that usually clear on their own.
const TRANSIENT_FAULTS: [&str; 4] = [
    "HostCommunication",
    "HostNotConnected",
    "Timedout",
    "TaskInProgress",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("{} configuration error(s): {}", .0.len(), .0.join("; "))]
    Invalid(Vec<String>),
}

/// Failure of a single call against the management endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("endpoint returned HTTP {0}")]
    Http(u16),
    #[error("server fault {code}: {message}")]
    Fault { code: String, message: String },
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} '{name}' resolves to {count} objects")]
    Ambiguous {
        kind: &'static str,
        name: String,
        count: usize,
    },
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Whether a retry of the same call has a reasonable chance to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Http(status) => *status >= 500,
            BackendError::Fault { code, .. } => TRANSIENT_FAULTS.contains(&code.as_str()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(
        "artifact type {0} is not supported: only artifacts from the VMware builder \
         on a remote ESXi host or from the vSphere post-processor can be processed"
    )]
    UnsupportedArtifact(String),
    #[error(
        "the VM was exported without staying registered; \
         set keep_registered = true on the builder to use this post-processor"
    )]
    KeepRegisteredRequired,
    #[error("artifact id '{0}' is not of the form <datastore>::<folder>::<vm name>")]
    MalformedArtifactId(String),
    #[error("connecting to vSphere: {0}")]
    Connect(#[source] BackendError),
    #[error("resolving datacenter: {0}")]
    Datacenter(#[source] BackendError),
    #[error("finding vm '{name}': {source}")]
    VmNotFound {
        name: String,
        #[source]
        source: BackendError,
    },
    #[error("reading vm status: {0}")]
    VmStatus(#[source] BackendError),
    #[error("vm is {0:?}; refusing to wait for guest tools")]
    UnexpectedPowerState(PowerState),
    #[error("powering on vm: {0}")]
    PowerOn(#[source] BackendError),
    #[error("vm still powered off after power-on was accepted ({fetches} status checks)")]
    VmStayedOff { fetches: u32 },
    #[error("polling vm status: {0}")]
    StatusPoll(#[source] BackendError),
    #[error("guest tools did not register after {fetches} status checks over {waited:?}")]
    ToolsTimeout { fetches: u32, waited: Duration },
    #[error("endpoint unavailable while waiting for guest tools ({fetches} status checks): {source}")]
    BackendUnavailable {
        fetches: u32,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Transport("reset".into()).is_transient());
        assert!(BackendError::Http(503).is_transient());
        assert!(!BackendError::Http(404).is_transient());
        assert!(BackendError::Fault {
            code: "HostCommunication".into(),
            message: String::new()
        }
        .is_transient());
        assert!(!BackendError::Fault {
            code: "NotAuthenticated".into(),
            message: String::new()
        }
        .is_transient());
        assert!(!BackendError::Protocol("bad xml".into()).is_transient());
    }

    #[test]
    fn config_errors_are_reported_together() {
        let err = ConfigError::Invalid(vec!["host must be set".into(), "password must be set".into()]);
        assert_eq!(
            err.to_string(),
            "2 configuration error(s): host must be set; password must be set"
        );
    }
}

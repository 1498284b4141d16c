use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BackendError;

/// Managed object reference, e.g. `VirtualMachine:vm-42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub value: String,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolsStatus {
    ToolsOk,
    ToolsOld,
    ToolsNotRunning,
    ToolsNotInstalled,
    /// Property unset or a value this client does not know.
    #[serde(untagged)]
    Unknown(String),
}

impl ToolsStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "toolsOk" => ToolsStatus::ToolsOk,
            "toolsOld" => ToolsStatus::ToolsOld,
            "toolsNotRunning" => ToolsStatus::ToolsNotRunning,
            "toolsNotInstalled" => ToolsStatus::ToolsNotInstalled,
            other => ToolsStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolsStatus::ToolsOk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl PowerState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "poweredOn" => Some(PowerState::PoweredOn),
            "poweredOff" => Some(PowerState::PoweredOff),
            "suspended" => Some(PowerState::Suspended),
            _ => None,
        }
    }
}

/// Point-in-time read of a VM's guest tools and power state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatus {
    pub tools: ToolsStatus,
    pub power: PowerState,
}

impl VmStatus {
    pub fn new(tools: ToolsStatus, power: PowerState) -> Self {
        Self { tools, power }
    }
}

/// Something that can open an authenticated session on a management endpoint.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    type Session: HypervisorSession;

    async fn connect(&self) -> Result<Self::Session, BackendError>;
}

/// An open session. Callers must call [`HypervisorSession::logout`] once they
/// are done with it, on every path.
#[async_trait]
pub trait HypervisorSession: Send + Sync {
    /// Datacenter named `name`, or the only datacenter when `name` is `None`.
    async fn datacenter(&self, name: Option<&str>) -> Result<ObjectRef, BackendError>;

    async fn find_vm(&self, datacenter: &ObjectRef, name: &str) -> Result<ObjectRef, BackendError>;

    async fn vm_status(&self, vm: &ObjectRef) -> Result<VmStatus, BackendError>;

    /// Requests power-on. Does not wait for the guest to boot.
    async fn power_on(&self, vm: &ObjectRef) -> Result<(), BackendError>;

    /// Asks the guest OS to shut down through guest tools.
    async fn shutdown_guest(&self, vm: &ObjectRef) -> Result<(), BackendError>;

    async fn logout(&self) -> Result<(), BackendError>;
}

//! In-memory hypervisor for tests.
//!
//! Status reads are served from a script: the first read returns the initial
//! status, later reads pop the queue, and once the queue is empty the last
//! scripted entry repeats. Without a script the initial status repeats,
//! reporting the VM as powered on once a power-on has taken effect.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::backend::{Hypervisor, HypervisorSession, ObjectRef, PowerState, ToolsStatus, VmStatus};
use crate::error::BackendError;

/// Number of calls of each kind the scripted endpoint received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub connects: u32,
    pub logouts: u32,
    pub datacenter_lookups: u32,
    pub vm_lookups: u32,
    pub status_fetches: u32,
    pub power_ons: u32,
    pub shutdowns: u32,
}

#[derive(Clone)]
pub struct ScriptedHypervisor {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    datacenters: Vec<String>,
    vms: Vec<String>,
    initial: Result<VmStatus, BackendError>,
    script: VecDeque<Result<VmStatus, BackendError>>,
    last: Option<Result<VmStatus, BackendError>>,
    connect_error: Option<BackendError>,
    power_on_error: Option<BackendError>,
    power_on_ignored: bool,
    powered: bool,
    shutdown_error: Option<BackendError>,
    logout_error: Option<BackendError>,
    calls: CallLog,
}

impl Default for ScriptedHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHypervisor {
    /// One datacenter `dc0`, no VMs, every VM powered off without tools.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                datacenters: vec!["dc0".to_string()],
                vms: Vec::new(),
                initial: Ok(VmStatus::new(ToolsStatus::ToolsNotRunning, PowerState::PoweredOff)),
                script: VecDeque::new(),
                last: None,
                connect_error: None,
                power_on_error: None,
                power_on_ignored: false,
                powered: false,
                shutdown_error: None,
                logout_error: None,
                calls: CallLog::default(),
            })),
        }
    }

    fn with(self, f: impl FnOnce(&mut Inner)) -> Self {
        f(&mut self.inner.lock().unwrap());
        self
    }

    pub fn with_datacenters(self, names: &[&str]) -> Self {
        self.with(|i| i.datacenters = names.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_vm(self, name: &str) -> Self {
        self.with(|i| i.vms.push(name.to_string()))
    }

    pub fn with_initial_status(self, status: VmStatus) -> Self {
        self.with(|i| i.initial = Ok(status))
    }

    pub fn with_initial_error(self, err: BackendError) -> Self {
        self.with(|i| i.initial = Err(err))
    }

    /// Appends status reads served after the initial one.
    pub fn then_statuses<I>(self, reads: I) -> Self
    where
        I: IntoIterator<Item = Result<VmStatus, BackendError>>,
    {
        self.with(|i| i.script.extend(reads))
    }

    /// Tools stay down for `k - 1` polls and come up on poll `k`.
    pub fn tools_ready_on_poll(self, k: u32) -> Self {
        let down = VmStatus::new(ToolsStatus::ToolsNotRunning, PowerState::PoweredOn);
        let up = VmStatus::new(ToolsStatus::ToolsOk, PowerState::PoweredOn);
        let reads = (1..k)
            .map(|_| Ok(down.clone()))
            .chain(std::iter::once(Ok(up)));
        self.then_statuses(reads)
    }

    pub fn fail_connect(self, err: BackendError) -> Self {
        self.with(|i| i.connect_error = Some(err))
    }

    pub fn fail_power_on(self, err: BackendError) -> Self {
        self.with(|i| i.power_on_error = Some(err))
    }

    /// Power-on calls succeed but the VM never leaves its initial power state.
    pub fn ignore_power_on(self) -> Self {
        self.with(|i| i.power_on_ignored = true)
    }

    pub fn fail_shutdown(self, err: BackendError) -> Self {
        self.with(|i| i.shutdown_error = Some(err))
    }

    pub fn fail_logout(self, err: BackendError) -> Self {
        self.with(|i| i.logout_error = Some(err))
    }

    pub fn calls(&self) -> CallLog {
        self.inner.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Hypervisor for ScriptedHypervisor {
    type Session = ScriptedSession;

    async fn connect(&self) -> Result<ScriptedSession, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.connects += 1;
        if let Some(err) = inner.connect_error.clone() {
            return Err(err);
        }
        Ok(ScriptedSession {
            inner: Arc::clone(&self.inner),
        })
    }
}

pub struct ScriptedSession {
    inner: Arc<Mutex<Inner>>,
}

fn failing(err: &Option<BackendError>) -> Result<(), BackendError> {
    match err {
        Some(e) => Err(e.clone()),
        None => Ok(()),
    }
}

#[async_trait]
impl HypervisorSession for ScriptedSession {
    async fn datacenter(&self, name: Option<&str>) -> Result<ObjectRef, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.datacenter_lookups += 1;
        let found: Vec<&String> = inner
            .datacenters
            .iter()
            .filter(|dc| name.map_or(true, |n| n == dc.as_str()))
            .collect();
        let wanted = name.unwrap_or("*").to_string();
        match found.as_slice() {
            [dc] => Ok(ObjectRef::new("Datacenter", dc.as_str())),
            [] => Err(BackendError::NotFound {
                kind: "datacenter",
                name: wanted,
            }),
            many => Err(BackendError::Ambiguous {
                kind: "datacenter",
                name: wanted,
                count: many.len(),
            }),
        }
    }

    async fn find_vm(&self, _datacenter: &ObjectRef, name: &str) -> Result<ObjectRef, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.vm_lookups += 1;
        match inner.vms.iter().position(|vm| vm == name) {
            Some(idx) => Ok(ObjectRef::new("VirtualMachine", format!("vm-{}", idx + 1))),
            None => Err(BackendError::NotFound {
                kind: "vm",
                name: name.to_string(),
            }),
        }
    }

    async fn vm_status(&self, _vm: &ObjectRef) -> Result<VmStatus, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.status_fetches += 1;
        if inner.calls.status_fetches == 1 {
            return inner.initial.clone();
        }
        if let Some(next) = inner.script.pop_front() {
            inner.last = Some(next.clone());
            return next;
        }
        match &inner.last {
            Some(last) => last.clone(),
            None => {
                let powered = inner.powered;
                inner.initial.clone().map(|mut status| {
                    if powered {
                        status.power = PowerState::PoweredOn;
                    }
                    status
                })
            }
        }
    }

    async fn power_on(&self, _vm: &ObjectRef) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.power_ons += 1;
        failing(&inner.power_on_error)?;
        if !inner.power_on_ignored {
            inner.powered = true;
        }
        Ok(())
    }

    async fn shutdown_guest(&self, _vm: &ObjectRef) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.shutdowns += 1;
        failing(&inner.shutdown_error)
    }

    async fn logout(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.logouts += 1;
        failing(&inner.logout_error)
    }
}

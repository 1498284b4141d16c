use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::artifact::{Artifact, ArtifactLocation, ProducerKind};
use crate::backend::{Hypervisor, HypervisorSession};
use crate::cancel::CancelSignal;
use crate::error::ProcessError;
use crate::poller::{await_tools, PollPolicy, Readiness};

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the step hands back to the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutput {
    pub artifact: Artifact,
    pub readiness: Readiness,
    /// Keep the produced artifact.
    pub keep: bool,
    /// Replace the incoming artifact with this one.
    pub force_override: bool,
}

pub struct PostProcessor<H> {
    hypervisor: H,
    policy: PollPolicy,
    datacenter: Option<String>,
}

impl<H: Hypervisor> PostProcessor<H> {
    pub fn new(hypervisor: H, policy: PollPolicy) -> Self {
        Self {
            hypervisor,
            policy,
            datacenter: None,
        }
    }

    /// Search this datacenter instead of the endpoint's default one.
    pub fn with_datacenter(mut self, name: Option<String>) -> Self {
        self.datacenter = name;
        self
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub async fn process(
        &self,
        artifact: &Artifact,
        cancel: &CancelSignal,
    ) -> Result<ProcessOutput, ProcessError> {
        let producer = check_artifact(artifact)?;
        info!(builder_id = %artifact.builder_id, ?producer, id = %artifact.id, "incoming artifact");
        let location = ArtifactLocation::parse(&artifact.id)?;

        let session = cancel
            .guard(self.hypervisor.connect())
            .await?
            .map_err(ProcessError::Connect)?;

        let outcome = self.run(&session, &location, cancel).await;
        release(&session).await;

        let readiness = match outcome {
            Ok(r) => r,
            Err(e) => {
                warn!(vm = %location.vm_name, "post-process failed: {e}");
                return Err(e);
            }
        };

        let artifact = Artifact::vsphere(&location, artifact.files.clone());
        info!(id = %artifact.id, builder_id = %artifact.builder_id, "returning artifact");
        Ok(ProcessOutput {
            artifact,
            readiness,
            keep: true,
            force_override: true,
        })
    }

    async fn run(
        &self,
        session: &H::Session,
        location: &ArtifactLocation,
        cancel: &CancelSignal,
    ) -> Result<Readiness, ProcessError> {
        let dc = cancel
            .guard(session.datacenter(self.datacenter.as_deref()))
            .await?
            .map_err(ProcessError::Datacenter)?;

        let vm = cancel
            .guard(session.find_vm(&dc, &location.vm_name))
            .await?
            .map_err(|source| ProcessError::VmNotFound {
                name: location.vm_name.clone(),
                source,
            })?;
        info!(%dc, %vm, name = %location.vm_name, "found vm");

        await_tools(session, &vm, &self.policy, cancel).await
    }
}

/// Preconditions that need no endpoint access.
pub fn check_artifact(artifact: &Artifact) -> Result<ProducerKind, ProcessError> {
    let producer = artifact
        .producer()
        .ok_or_else(|| ProcessError::UnsupportedArtifact(artifact.builder_id.clone()))?;
    if artifact.exported_without_registration() {
        return Err(ProcessError::KeepRegisteredRequired);
    }
    Ok(producer)
}

/// Logs out, ignoring cancellation so the session is not leaked.
async fn release<S: HypervisorSession>(session: &S) {
    match tokio::time::timeout(LOGOUT_TIMEOUT, session.logout()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("logout failed: {e}"),
        Err(_) => warn!("logout timed out after {LOGOUT_TIMEOUT:?}"),
    }
}

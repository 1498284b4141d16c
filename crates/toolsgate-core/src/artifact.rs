use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProcessError;

/// Builder id of artifacts produced by the vSphere upload post-processor.
/// Also the builder id of every artifact this step emits.
pub const VSPHERE_BUILDER_ID: &str = "packer.post-processor.vsphere";
/// Builder id of the VMware builder running against a remote ESXi host.
pub const VMWARE_ESX_BUILDER_ID: &str = "mitchellh.vmware-esx";

pub const STATE_FORMAT: &str = "artifact.conf.format";
pub const STATE_KEEP_REGISTERED: &str = "artifact.conf.keep_registered";
pub const STATE_SKIP_EXPORT: &str = "artifact.conf.skip_export";

const ID_DELIMITER: &str = "::";

/// Upstream producers whose artifacts describe a VM registered on vSphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    VsphereUpload,
    VmwareEsx,
}

impl ProducerKind {
    pub const ALL: [ProducerKind; 2] = [ProducerKind::VsphereUpload, ProducerKind::VmwareEsx];

    pub fn builder_id(self) -> &'static str {
        match self {
            ProducerKind::VsphereUpload => VSPHERE_BUILDER_ID,
            ProducerKind::VmwareEsx => VMWARE_ESX_BUILDER_ID,
        }
    }

    pub fn from_builder_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.builder_id() == id)
    }
}

/// Build output handed between pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub builder_id: String,
    #[serde(default)]
    pub files: Vec<String>,
    /// Free-form side channel set by the producing stage.
    #[serde(default)]
    pub state: BTreeMap<String, String>,
}

impl Artifact {
    /// Reference to a VM on vSphere, as emitted by this step.
    pub fn vsphere(location: &ArtifactLocation, files: Vec<String>) -> Self {
        Self {
            id: location.to_string(),
            builder_id: VSPHERE_BUILDER_ID.to_string(),
            files,
            state: BTreeMap::new(),
        }
    }

    /// Value of a state key, or `""` when the producer did not set it.
    pub fn state(&self, key: &str) -> &str {
        self.state.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn producer(&self) -> Option<ProducerKind> {
        ProducerKind::from_builder_id(&self.builder_id)
    }

    /// True when the VM was exported and unregistered by the producer, which
    /// leaves nothing on the endpoint for this step to manage.
    pub fn exported_without_registration(&self) -> bool {
        !self.state(STATE_FORMAT).is_empty()
            && self.state(STATE_KEEP_REGISTERED) != "true"
            && self.state(STATE_SKIP_EXPORT) == "false"
    }

    pub fn description(&self) -> String {
        match ArtifactLocation::parse(&self.id) {
            Ok(loc) => format!(
                "VM: {} Folder: {} Datastore: {}",
                loc.vm_name, loc.folder, loc.datastore
            ),
            Err(_) => self.id.clone(),
        }
    }
}

/// Where a built VM lives: `<datastore>::<folder>::<vm name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub datastore: String,
    pub folder: String,
    pub vm_name: String,
}

impl ArtifactLocation {
    pub fn parse(id: &str) -> Result<Self, ProcessError> {
        let parts: Vec<&str> = id.split(ID_DELIMITER).collect();
        match parts.as_slice() {
            [datastore, folder, vm_name] if !vm_name.is_empty() => Ok(Self {
                datastore: datastore.to_string(),
                folder: folder.to_string(),
                vm_name: vm_name.to_string(),
            }),
            _ => Err(ProcessError::MalformedArtifactId(id.to_string())),
        }
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{ID_DELIMITER}{}{ID_DELIMITER}{}",
            self.datastore, self.folder, self.vm_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact_with_state(pairs: &[(&str, &str)]) -> Artifact {
        Artifact {
            id: "ds::f::vm".into(),
            builder_id: VMWARE_ESX_BUILDER_ID.into(),
            files: vec![],
            state: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn parses_three_part_id() {
        let loc = ArtifactLocation::parse("ds1::folder1::vm1").unwrap();
        assert_eq!(loc.datastore, "ds1");
        assert_eq!(loc.folder, "folder1");
        assert_eq!(loc.vm_name, "vm1");
        assert_eq!(loc.to_string(), "ds1::folder1::vm1");
    }

    #[test]
    fn empty_folder_is_allowed() {
        let loc = ArtifactLocation::parse("ds1::::vm1").unwrap();
        assert_eq!(loc.folder, "");
    }

    #[test]
    fn rejects_wrong_part_count_and_missing_name() {
        for id in ["vm1", "ds::vm1", "a::b::c::d", "ds::folder::", ""] {
            let err = ArtifactLocation::parse(id).unwrap_err();
            assert!(
                matches!(err, ProcessError::MalformedArtifactId(ref s) if s == id),
                "{id}: {err:?}"
            );
        }
    }

    #[test]
    fn producer_allow_list() {
        assert_eq!(
            ProducerKind::from_builder_id("mitchellh.vmware-esx"),
            Some(ProducerKind::VmwareEsx)
        );
        assert_eq!(
            ProducerKind::from_builder_id("packer.post-processor.vsphere"),
            Some(ProducerKind::VsphereUpload)
        );
        assert_eq!(ProducerKind::from_builder_id("mitchellh.vmware"), None);
        assert_eq!(ProducerKind::from_builder_id(""), None);
    }

    #[test]
    fn export_conflict_requires_all_three_conditions() {
        let conflict = artifact_with_state(&[(STATE_FORMAT, "ovf"), (STATE_SKIP_EXPORT, "false")]);
        assert!(conflict.exported_without_registration());

        let kept = artifact_with_state(&[
            (STATE_FORMAT, "ovf"),
            (STATE_KEEP_REGISTERED, "true"),
            (STATE_SKIP_EXPORT, "false"),
        ]);
        assert!(!kept.exported_without_registration());

        let skipped = artifact_with_state(&[(STATE_FORMAT, "ovf"), (STATE_SKIP_EXPORT, "true")]);
        assert!(!skipped.exported_without_registration());

        let no_format = artifact_with_state(&[(STATE_SKIP_EXPORT, "false")]);
        assert!(!no_format.exported_without_registration());
    }

    #[test]
    fn result_artifact_describes_location() {
        let loc = ArtifactLocation::parse("store0::vms::web01").unwrap();
        let a = Artifact::vsphere(&loc, vec!["disk.vmdk".into()]);
        assert_eq!(a.id, "store0::vms::web01");
        assert_eq!(a.builder_id, VSPHERE_BUILDER_ID);
        assert_eq!(a.files, vec!["disk.vmdk".to_string()]);
        assert_eq!(a.description(), "VM: web01 Folder: vms Datastore: store0");
    }

    #[test]
    fn artifact_json_defaults() {
        let a: Artifact =
            serde_json::from_str(r#"{"id":"a::b::c","builder_id":"mitchellh.vmware-esx"}"#).unwrap();
        assert!(a.files.is_empty());
        assert_eq!(a.state(STATE_FORMAT), "");
        assert_eq!(a.producer(), Some(ProducerKind::VmwareEsx));
    }
}

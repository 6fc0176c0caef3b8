/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::{SshSpec, SshStatus};
use crate::hardware::HardwareDetails;
use crate::machine::BareMetalMachine;
use crate::metadata::ObjectMeta;
use crate::provider_id::ServerId;
use crate::state::{ErrorType, ProvisioningState, RebootKind};

/// Operators set this annotation on a provisioned host to request a
/// one-shot reboot. The controller clears it once the host answered with
/// the expected hostname again.
pub const REBOOT_ANNOTATION: &str = "metal.anvil.nvidia.com/reboot";

/// How long after an issued reboot the controller refrains from probing,
/// so that it does not reconnect to the old system before the reboot has
/// physically taken effect.
pub const REBOOT_WAIT_SECS: i64 = 15;

/// One physical server managed by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BareMetalHost {
    pub metadata: ObjectMeta,
    pub spec: HostSpec,
    pub status: HostStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    /// The vendor-assigned server identifier.
    pub server_id: ServerId,
    /// The machine currently using this host. At most one at a time.
    pub consumer_ref: Option<ConsumerRef>,
    pub root_device_hints: Option<RootDeviceHints>,
    /// Copied from the consuming machine when the host is claimed and
    /// cleared again on release.
    pub install_image: Option<InstallImage>,
    /// Cloud-init user data, also copied from the consuming machine.
    pub user_data: Option<String>,
    pub ssh_spec: Option<SshSpec>,
    #[serde(default)]
    pub maintenance_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostStatus {
    pub provisioning_state: ProvisioningState,
    pub error_type: Option<ErrorType>,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub error_count: u32,
    /// When the last side effect on this host was recorded. The reboot
    /// ladder measures its deadlines against this.
    pub last_updated: Option<DateTime<Utc>>,
    pub hardware_details: Option<HardwareDetails>,
    #[serde(default)]
    pub ssh_status: SshStatus,
    /// Which out-of-band reboot kinds the vendor offers for this server.
    #[serde(default)]
    pub reboot_types: Vec<RebootKind>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    /// Set while an operator-requested reboot is in flight.
    #[serde(default)]
    pub rebooted: bool,
}

/// Points from a host to the single machine using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerRef {
    pub api_group: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

pub const MACHINE_API_GROUP: &str = "metal.anvil.nvidia.com";
pub const MACHINE_KIND: &str = "BareMetalMachine";

impl ConsumerRef {
    pub fn for_machine(machine: &BareMetalMachine) -> Self {
        ConsumerRef {
            api_group: MACHINE_API_GROUP.to_string(),
            kind: MACHINE_KIND.to_string(),
            name: machine.metadata.name.clone(),
            namespace: machine.metadata.namespace.clone(),
        }
    }

    pub fn references(&self, machine: &BareMetalMachine) -> bool {
        self.api_group == MACHINE_API_GROUP
            && self.kind == MACHINE_KIND
            && self.name == machine.metadata.name
            && self.namespace == machine.metadata.namespace
    }
}

/// Selects the install target among the storage devices found during
/// registration. Either a single WWN (plain install) or at least two RAID
/// member WWNs (software RAID) must be given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDeviceHints {
    pub wwn: Option<String>,
    #[serde(default)]
    pub raid: RaidHints,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidHints {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub wwns: Vec<String>,
}

impl RootDeviceHints {
    /// Whether the hints are compatible with the requested RAID level:
    /// software RAID needs at least two member WWNs, a plain install needs
    /// a single WWN.
    pub fn supports_swraid(&self, swraid: bool) -> bool {
        if swraid {
            self.raid.wwns.len() >= 2
        } else {
            self.wwn.as_deref().is_some_and(|wwn| !wwn.is_empty())
        }
    }

    /// The WWNs that `installimage` will write to for the requested mode.
    pub fn wwns_for(&self, swraid: bool) -> Vec<&str> {
        if swraid {
            self.raid.wwns.iter().map(String::as_str).collect()
        } else {
            self.wwn.as_deref().into_iter().collect()
        }
    }

    /// Every hinted WWN must have been discovered during registration.
    pub fn missing_from(&self, details: &HardwareDetails) -> Vec<String> {
        let mut hinted: Vec<&str> = self.wwn.as_deref().into_iter().collect();
        hinted.extend(self.raid.wwns.iter().map(String::as_str));
        hinted
            .into_iter()
            .filter(|wwn| !details.has_wwn(wwn))
            .map(str::to_string)
            .collect()
    }
}

/// What to install on the host, consumed by the vendor's scripted
/// installer via an autosetup file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallImage {
    pub image: Image,
    #[serde(default)]
    pub swraid: bool,
    pub swraid_level: Option<u8>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub logical_volumes: Vec<LogicalVolume>,
    pub post_install_script: Option<String>,
}

/// The image locator. Either a remote `url` (downloaded onto the rescue
/// system first, named via `name`) or a `path` already present there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetails {
    pub path: String,
    pub needs_download: bool,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ImageError {
    #[error("image specifies neither url nor path")]
    Unspecified,
    #[error("image url requires a name for the downloaded file")]
    MissingName,
    #[error("image url {0:?} has no recognized archive suffix")]
    UnknownSuffix(String),
}

const IMAGE_SUFFIXES: &[&str] = &["tar.gz", "tar.bz2", "tar.xz", "tgz", "tbz", "txz", "tar"];

impl Image {
    pub fn details(&self) -> Result<ImageDetails, ImageError> {
        if let Some(url) = &self.url {
            let name = self.name.as_deref().ok_or(ImageError::MissingName)?;
            let suffix = IMAGE_SUFFIXES
                .iter()
                .find(|suffix| url.ends_with(&format!(".{suffix}")))
                .ok_or_else(|| ImageError::UnknownSuffix(url.clone()))?;
            return Ok(ImageDetails {
                path: format!("/root/{name}.{suffix}"),
                needs_download: true,
            });
        }
        match &self.path {
            Some(path) => Ok(ImageDetails {
                path: path.clone(),
                needs_download: false,
            }),
            None => Err(ImageError::Unspecified),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub mount: String,
    pub file_system: String,
    pub size: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub vg: String,
    pub name: String,
    pub mount: String,
    pub file_system: String,
    pub size: String,
}

impl BareMetalHost {
    pub fn server_id(&self) -> ServerId {
        self.spec.server_id
    }

    /// Records an error on the status.
    ///
    /// `last_updated` moves only when the `(type, message)` pair actually
    /// changes; a repeated identical error merely bumps `error_count`.
    /// Deadline checks (reboot ladder, connection-refused grace window)
    /// therefore always measure from the first occurrence.
    pub fn set_error(&mut self, now: DateTime<Utc>, error_type: ErrorType, message: impl Into<String>) {
        let message = message.into();
        if self.status.error_type == Some(error_type) && self.status.error_message == message {
            self.status.error_count += 1;
            return;
        }
        tracing::debug!(
            host = %self.metadata.name,
            %error_type,
            %message,
            "updating host error"
        );
        self.status.error_type = Some(error_type);
        self.status.error_message = message;
        self.status.error_count = 1;
        self.status.last_updated = Some(now);
    }

    pub fn clear_error(&mut self, now: DateTime<Utc>) {
        if self.status.error_type.is_none() && self.status.error_message.is_empty() {
            return;
        }
        self.status.error_type = None;
        self.status.error_message = String::new();
        self.status.error_count = 0;
        self.status.last_updated = Some(now);
    }

    pub fn mark_updated(&mut self, now: DateTime<Utc>) {
        self.status.last_updated = Some(now);
    }

    /// How long the current error has been standing, if a timestamp exists.
    pub fn error_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.status.last_updated.map(|updated| now - updated)
    }

    /// True while a reboot issued by the controller is too fresh for the
    /// machine to have gone down yet. Actions requeue shortly instead of
    /// probing in this window.
    pub fn has_just_rebooted(&self, now: DateTime<Utc>) -> bool {
        self.status
            .error_type
            .is_some_and(|error_type| error_type.is_reboot_trigger())
            && self
                .status
                .last_updated
                .is_some_and(|updated| now - updated < Duration::seconds(REBOOT_WAIT_SECS))
    }

    pub fn consumer_is(&self, machine: &BareMetalMachine) -> bool {
        self.spec
            .consumer_ref
            .as_ref()
            .is_some_and(|consumer| consumer.references(machine))
    }

    pub fn reboot_annotation(&self) -> bool {
        self.metadata.annotations.contains_key(REBOOT_ANNOTATION)
    }

    /// Whether the vendor offers the given out-of-band reboot for this
    /// server.
    pub fn supports_reboot(&self, kind: RebootKind) -> bool {
        match kind {
            RebootKind::Ssh => true,
            RebootKind::Software | RebootKind::Hardware => {
                self.status.reboot_types.contains(&kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::machine::MachineSpec;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn machine(namespace: &str, name: &str) -> BareMetalMachine {
        BareMetalMachine {
            metadata: ObjectMeta::new(namespace, name),
            spec: MachineSpec::default(),
            status: Default::default(),
        }
    }

    #[test]
    fn repeated_identical_errors_keep_the_first_timestamp() {
        let mut host = BareMetalHost::default();
        host.set_error(at(0), ErrorType::ConnectionError, "connection refused");
        host.set_error(at(30), ErrorType::ConnectionError, "connection refused");
        host.set_error(at(70), ErrorType::ConnectionError, "connection refused");

        assert_eq!(host.status.last_updated, Some(at(0)));
        assert_eq!(host.status.error_count, 3);

        host.set_error(at(90), ErrorType::Provisioning, "ssh timed out");
        assert_eq!(host.status.last_updated, Some(at(90)));
        assert_eq!(host.status.error_count, 1);
    }

    #[test]
    fn has_just_rebooted_window() {
        let mut host = BareMetalHost::default();
        host.set_error(at(0), ErrorType::SshRebootTriggered, "reboot issued");
        assert!(host.has_just_rebooted(at(5)));
        assert!(!host.has_just_rebooted(at(20)));

        host.set_error(at(30), ErrorType::ConnectionError, "connection refused");
        assert!(!host.has_just_rebooted(at(31)));
    }

    #[test]
    fn hints_raid_discipline() {
        let single = RootDeviceHints {
            wwn: Some("0xw1".to_string()),
            ..Default::default()
        };
        assert!(single.supports_swraid(false));
        assert!(!single.supports_swraid(true));
        assert_eq!(single.wwns_for(false), vec!["0xw1"]);

        let raid = RootDeviceHints {
            raid: RaidHints {
                active: true,
                wwns: vec!["0xw1".to_string(), "0xw2".to_string()],
            },
            ..Default::default()
        };
        assert!(raid.supports_swraid(true));
        assert!(!raid.supports_swraid(false));
        assert_eq!(raid.wwns_for(true), vec!["0xw1", "0xw2"]);
    }

    #[test]
    fn consumer_reference_matching() {
        let machine = machine("default", "machine-1");
        let mut host = BareMetalHost::default();
        assert!(!host.consumer_is(&machine));

        host.spec.consumer_ref = Some(ConsumerRef::for_machine(&machine));
        assert!(host.consumer_is(&machine));
        assert!(!host.consumer_is(&self::machine("default", "machine-2")));
        assert!(!host.consumer_is(&self::machine("other", "machine-1")));
    }

    #[test]
    fn image_details_resolution() {
        let remote = Image {
            url: Some("https://images.example.com/ubuntu-24.04.tar.gz".to_string()),
            name: Some("ubuntu-24.04".to_string()),
            path: None,
        };
        assert_eq!(
            remote.details().unwrap(),
            ImageDetails {
                path: "/root/ubuntu-24.04.tar.gz".to_string(),
                needs_download: true,
            }
        );

        let local = Image {
            path: Some("/root/.oldroot/nfs/images/Ubuntu-2404.tar.gz".to_string()),
            ..Default::default()
        };
        assert!(!local.details().unwrap().needs_download);

        assert_eq!(Image::default().details(), Err(ImageError::Unspecified));
        assert_eq!(
            Image {
                url: Some("https://images.example.com/img.qcow2".to_string()),
                name: Some("img".to_string()),
                path: None,
            }
            .details(),
            Err(ImageError::UnknownSuffix(
                "https://images.example.com/img.qcow2".to_string()
            ))
        );
    }
}

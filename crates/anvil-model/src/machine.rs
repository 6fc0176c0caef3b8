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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::credentials::SshSpec;
use crate::host::InstallImage;
use crate::metadata::ObjectMeta;
use crate::selector::HostSelector;

/// Machine annotation holding the `namespace/name` of the bound host.
pub const HOST_ANNOTATION: &str = "metal.anvil.nvidia.com/bare-metal-host";

/// Label carrying the owning cluster's name; copied onto the host while it
/// is claimed.
pub const CLUSTER_NAME_LABEL: &str = "cluster.anvil.nvidia.com/cluster-name";

/// Failure reason recorded when the bound host was moved into maintenance.
pub const FAILURE_REASON_MAINTENANCE_MODE: &str = "MAINTENANCE_MODE";

/// One logical cluster node, to be realized by a physical host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BareMetalMachine {
    pub metadata: ObjectMeta,
    pub spec: MachineSpec,
    pub status: MachineStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Set once the bound host is provisioned; `hcloud://bm-<serverID>`.
    pub provider_id: Option<String>,
    #[serde(default)]
    pub host_selector: HostSelector,
    pub install_image: Option<InstallImage>,
    pub ssh_spec: Option<SshSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    #[serde(default)]
    pub addresses: Vec<MachineAddress>,
    #[serde(default)]
    pub ready: bool,
    pub failure_reason: Option<String>,
    pub failure_message: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineAddress {
    pub address_type: MachineAddressType,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum MachineAddressType {
    Hostname,
    InternalIp,
    InternalDns,
}

/// A user-visible condition on the machine status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum ConditionType {
    /// Bootstrap user data exists for this machine.
    BootstrapReady,
    /// A host was selected and claimed for this machine.
    HostAssociated,
    /// The vendor API is throttling us; the controller backs off globally.
    RateLimitExceeded,
}

impl BareMetalMachine {
    pub fn host_annotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(HOST_ANNOTATION)
            .map(String::as_str)
    }

    pub fn set_host_annotation(&mut self, namespaced_name: impl Into<String>) {
        self.metadata
            .annotations
            .insert(HOST_ANNOTATION.to_string(), namespaced_name.into());
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .get(CLUSTER_NAME_LABEL)
            .map(String::as_str)
    }

    /// Whether the machine wants its root filesystem on software RAID.
    pub fn wants_swraid(&self) -> bool {
        self.spec
            .install_image
            .as_ref()
            .is_some_and(|image| image.swraid)
    }

    pub fn has_failed(&self) -> bool {
        self.status.failure_reason.is_some() || self.status.failure_message.is_some()
    }

    pub fn set_failure(&mut self, reason: impl Into<String>, message: impl Into<String>) {
        self.status.failure_reason = Some(reason.into());
        self.status.failure_message = Some(message.into());
        self.status.ready = false;
    }
}

impl MachineStatus {
    /// Updates (or inserts) a condition. `last_transition` moves only when
    /// the status flag flips.
    pub fn set_condition(
        &mut self,
        now: DateTime<Utc>,
        condition_type: ConditionType,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let reason = reason.into();
        let message = message.into();
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|condition| condition.condition_type == condition_type)
        {
            if existing.status != status {
                existing.last_transition = now;
            }
            existing.status = status;
            existing.reason = reason;
            existing.message = message;
            return;
        }
        self.conditions.push(Condition {
            condition_type,
            status,
            reason,
            message,
            last_transition: now,
        });
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|condition| condition.condition_type == condition_type)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn condition_transition_time_moves_only_on_flip() {
        let mut status = MachineStatus::default();
        status.set_condition(at(0), ConditionType::BootstrapReady, false, "Waiting", "");
        status.set_condition(at(10), ConditionType::BootstrapReady, false, "Waiting", "");
        assert_eq!(
            status
                .condition(ConditionType::BootstrapReady)
                .unwrap()
                .last_transition,
            at(0)
        );

        status.set_condition(at(20), ConditionType::BootstrapReady, true, "Ready", "");
        assert_eq!(
            status
                .condition(ConditionType::BootstrapReady)
                .unwrap()
                .last_transition,
            at(20)
        );
    }

    #[test]
    fn host_annotation_round_trip() {
        let mut machine = BareMetalMachine::default();
        assert_eq!(machine.host_annotation(), None);
        machine.set_host_annotation("default/host-3");
        assert_eq!(machine.host_annotation(), Some("default/host-3"));
    }
}

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

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// The provisioning lifecycle of a bare-metal host.
///
/// A host only ever advances along
/// `None -> Preparing -> Registering -> ImageInstalling -> Provisioning ->
/// EnsureProvisioned -> Provisioned` and is torn down via
/// `Deprovisioning -> Deleting`, after which it returns to `None` and
/// becomes selectable again.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
pub enum ProvisioningState {
    /// The host is idle and can be claimed by a machine.
    #[default]
    None,
    /// Rescue key upload and rescue-boot activation are in progress.
    Preparing,
    /// The host is expected to run the rescue system; hardware inspection
    /// and root-device-hint validation happen here.
    Registering,
    /// The OS image is being written via the vendor's scripted installer.
    ImageInstalling,
    /// The installed OS booted; cloud-init seed files are written here.
    Provisioning,
    /// Waiting for cloud-init to finish on the final ssh port.
    EnsureProvisioned,
    /// Steady state. Only the reboot annotation is acted upon.
    Provisioned,
    Deprovisioning,
    Deleting,
}

/// Error classification on the host status; each variant carries its own
/// recovery semantics. The three `*RebootTriggered` variants double as
/// idempotency markers for the reboot ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum ErrorType {
    /// Key upload or rescue activation misconfiguration. Surfaced as a
    /// condition and waits for an operator fix.
    Preparation,
    /// Transient runtime failure, retried with backoff.
    Provisioning,
    /// Hardware validation failed. Fatal for this machine binding.
    Registration,
    /// An ssh connection was refused once. Grace period of one minute,
    /// then escalated to a permanent error.
    ConnectionError,
    SshRebootTriggered,
    SoftwareRebootTriggered,
    HardwareRebootTriggered,
    /// Set by the host itself for hardware-level unrecoverable failures,
    /// propagated to the owning machine.
    FatalError,
    /// The configuration precludes provisioning; requires operator
    /// intervention.
    PermanentError,
}

impl ErrorType {
    /// Whether this error marks a reboot that the controller has already
    /// issued and is waiting out.
    pub fn is_reboot_trigger(&self) -> bool {
        self.triggered_reboot().is_some()
    }

    /// The ladder level whose reboot this marker records, if any.
    pub fn triggered_reboot(&self) -> Option<RebootKind> {
        match self {
            ErrorType::SshRebootTriggered => Some(RebootKind::Ssh),
            ErrorType::SoftwareRebootTriggered => Some(RebootKind::Software),
            ErrorType::HardwareRebootTriggered => Some(RebootKind::Hardware),
            _ => None,
        }
    }

    /// Terminal errors stop the state machine until an operator removes
    /// the machine.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorType::Preparation
                | ErrorType::Registration
                | ErrorType::FatalError
                | ErrorType::PermanentError
        )
    }
}

/// The reboot escalation ladder. Ordering matters: within one provisioning
/// state the chosen kind never decreases.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RebootKind {
    /// `reboot` issued over an ssh session.
    Ssh,
    /// A software reset through the vendor's out-of-band API.
    Software,
    /// Power cycling through the vendor's out-of-band API.
    Hardware,
}

impl RebootKind {
    /// The marker recorded on the host status once a reboot of this kind
    /// was issued.
    pub fn marker(&self) -> ErrorType {
        match self {
            RebootKind::Ssh => ErrorType::SshRebootTriggered,
            RebootKind::Software => ErrorType::SoftwareRebootTriggered,
            RebootKind::Hardware => ErrorType::HardwareRebootTriggered,
        }
    }
}

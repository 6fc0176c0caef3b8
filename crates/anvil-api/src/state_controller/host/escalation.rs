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

//! The reboot ladder: ssh -> software -> hardware, each level with its own
//! deadline. The decision itself is a pure function over the current
//! marker, the vendor's capabilities and the elapsed time; the handler
//! methods below execute the decision and keep the host status in sync.

use anvil_model::host::BareMetalHost;
use anvil_model::state::{ErrorType, RebootKind};
use anvil_robot::RebootMode;
use anvil_ssh::SshClient;
use chrono::Duration;

use super::{HostContext, HostStateHandler};
use crate::state_controller::outcome::{ActionError, ActionOutcome, ActionResult};

/// How long an ssh reboot may take before the ladder escalates.
pub const SSH_RESET_TIMEOUT_SECS: i64 = 5 * 60;
/// How long a software reset may take before the ladder escalates.
pub const SOFTWARE_RESET_TIMEOUT_SECS: i64 = 5 * 60;
/// How long a hardware reset may take before it is issued again. There is
/// no higher level to go to.
pub const HARDWARE_RESET_TIMEOUT_SECS: i64 = 60 * 60;
/// Grace window for a refused ssh connection before it becomes permanent.
pub const CONNECTION_REFUSED_GRACE_SECS: i64 = 60;

/// Requeue while a reboot deadline has not passed yet.
const REBOOT_POLL_SECS: u64 = 10;
/// Requeue right after issuing a reboot.
pub const JUST_REBOOTED_REQUEUE_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStep {
    /// Issue a reboot of this kind now and record its marker.
    Issue(RebootKind),
    /// The current level's deadline has not passed; keep waiting.
    Wait,
}

/// Decides the next ladder step.
///
/// `elapsed` is the age of the current error; `None` (no timestamp on the
/// status) counts as expired so a host with a wiped clock still makes
/// progress. The returned kind never decreases relative to the current
/// marker.
pub fn next_step(
    current: Option<ErrorType>,
    software_available: bool,
    elapsed: Option<Duration>,
) -> EscalationStep {
    let deadline_passed =
        |timeout_secs: i64| elapsed.is_none_or(|age| age > Duration::seconds(timeout_secs));

    match current.and_then(|error_type| error_type.triggered_reboot()) {
        None => EscalationStep::Issue(RebootKind::Ssh),
        Some(RebootKind::Ssh) => {
            if deadline_passed(SSH_RESET_TIMEOUT_SECS) {
                EscalationStep::Issue(if software_available {
                    RebootKind::Software
                } else {
                    RebootKind::Hardware
                })
            } else {
                EscalationStep::Wait
            }
        }
        Some(RebootKind::Software) => {
            if deadline_passed(SOFTWARE_RESET_TIMEOUT_SECS) {
                EscalationStep::Issue(RebootKind::Hardware)
            } else {
                EscalationStep::Wait
            }
        }
        Some(RebootKind::Hardware) => {
            if deadline_passed(HARDWARE_RESET_TIMEOUT_SECS) {
                EscalationStep::Issue(RebootKind::Hardware)
            } else {
                EscalationStep::Wait
            }
        }
    }
}

impl HostStateHandler {
    /// Recovery for an incomplete boot (timeout or unexpected hostname):
    /// walk the reboot ladder. `ssh_client` talks to the port of the
    /// current phase and carries the ssh-level reboots; everything above
    /// goes out of band.
    pub(crate) async fn handle_incomplete_boot(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
        ssh_client: &dyn SshClient,
        expects_rescue: bool,
        observed: &str,
    ) -> ActionResult {
        let step = next_step(
            host.status.error_type,
            host.supports_reboot(RebootKind::Software),
            host.error_age(ctx.now),
        );
        let kind = match step {
            EscalationStep::Wait => return Ok(ActionOutcome::wait_secs(REBOOT_POLL_SECS)),
            EscalationStep::Issue(kind) => kind,
        };

        // A reboot that is supposed to land in the rescue system is
        // useless unless rescue boot is still armed.
        if expects_rescue {
            self.ensure_rescue_active(host).await?;
        }

        tracing::info!(
            host = %host.metadata.name,
            %kind,
            observed,
            "escalating with reboot"
        );
        match kind {
            RebootKind::Ssh => {
                Self::deliver_ssh_reboot(ssh_client).await;
            }
            RebootKind::Software => {
                self.robot
                    .reboot_server(host.server_id(), RebootMode::Software)
                    .await?;
            }
            RebootKind::Hardware => {
                self.robot
                    .reboot_server(host.server_id(), RebootMode::Hardware)
                    .await?;
            }
        }

        let marker = kind.marker();
        let repeated = host.status.error_type == Some(marker);
        host.set_error(ctx.now, marker, format!("{kind} reboot issued: {observed}"));
        if repeated {
            // Re-issuing the highest level: move the clock forward by hand
            // so subsequent runs measure from this reboot.
            host.mark_updated(ctx.now);
        }
        Ok(ActionOutcome::wait_secs(REBOOT_POLL_SECS))
    }

    /// A refused connection is tolerated once; when the same refusal still
    /// stands after the grace window the port is considered misconfigured.
    pub(crate) fn handle_connection_refused(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
    ) -> ActionResult {
        if host.status.error_type == Some(ErrorType::ConnectionError)
            && host
                .error_age(ctx.now)
                .is_some_and(|age| age > Duration::seconds(CONNECTION_REFUSED_GRACE_SECS))
        {
            return Ok(ActionOutcome::failed(
                ErrorType::PermanentError,
                "ssh connection refused for over a minute, the configured port is likely wrong",
            ));
        }
        host.set_error(ctx.now, ErrorType::ConnectionError, "ssh connection refused");
        Ok(ActionOutcome::wait_secs(REBOOT_POLL_SECS))
    }

    pub(crate) async fn ensure_rescue_active(
        &self,
        host: &BareMetalHost,
    ) -> Result<(), ActionError> {
        let rescue = self.robot.get_rescue_boot(host.server_id()).await?;
        if rescue.active {
            return Ok(());
        }
        let fingerprint = host
            .status
            .ssh_status
            .rescue_key_fingerprint
            .clone()
            .ok_or_else(|| {
                ActionError::Provisioning(
                    "cannot re-arm rescue boot, no rescue key fingerprint recorded".to_string(),
                )
            })?;
        tracing::debug!(host = %host.metadata.name, "re-arming rescue boot");
        self.robot
            .set_rescue_boot(host.server_id(), &fingerprint)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: i64) -> Option<Duration> {
        Some(Duration::minutes(m))
    }

    #[test]
    fn fresh_error_starts_with_ssh() {
        assert_eq!(
            next_step(None, true, None),
            EscalationStep::Issue(RebootKind::Ssh)
        );
        assert_eq!(
            next_step(Some(ErrorType::ConnectionError), true, minutes(10)),
            EscalationStep::Issue(RebootKind::Ssh)
        );
    }

    #[test]
    fn ssh_escalates_to_software_after_its_deadline() {
        assert_eq!(
            next_step(Some(ErrorType::SshRebootTriggered), true, minutes(6)),
            EscalationStep::Issue(RebootKind::Software)
        );
        assert_eq!(
            next_step(Some(ErrorType::SshRebootTriggered), true, minutes(4)),
            EscalationStep::Wait
        );
    }

    #[test]
    fn ssh_skips_to_hardware_when_software_is_unavailable() {
        assert_eq!(
            next_step(Some(ErrorType::SshRebootTriggered), false, minutes(6)),
            EscalationStep::Issue(RebootKind::Hardware)
        );
    }

    /// The concrete escalation walk: software reset six minutes after the
    /// ssh marker, no reaction thirty seconds later, hardware another six
    /// minutes on.
    #[test]
    fn escalation_walk() {
        assert_eq!(
            next_step(Some(ErrorType::SshRebootTriggered), true, minutes(6)),
            EscalationStep::Issue(RebootKind::Software)
        );
        assert_eq!(
            next_step(
                Some(ErrorType::SoftwareRebootTriggered),
                true,
                Some(Duration::seconds(30))
            ),
            EscalationStep::Wait
        );
        assert_eq!(
            next_step(Some(ErrorType::SoftwareRebootTriggered), true, minutes(6)),
            EscalationStep::Issue(RebootKind::Hardware)
        );
    }

    #[test]
    fn hardware_reissues_after_an_hour() {
        assert_eq!(
            next_step(Some(ErrorType::HardwareRebootTriggered), true, minutes(59)),
            EscalationStep::Wait
        );
        assert_eq!(
            next_step(Some(ErrorType::HardwareRebootTriggered), true, minutes(61)),
            EscalationStep::Issue(RebootKind::Hardware)
        );
    }

    /// The chosen kind never goes back down the ladder, whatever the
    /// elapsed time claims.
    #[test]
    fn escalation_is_monotonic() {
        for marker in [
            ErrorType::SshRebootTriggered,
            ErrorType::SoftwareRebootTriggered,
            ErrorType::HardwareRebootTriggered,
        ] {
            let floor = marker.triggered_reboot().unwrap();
            for elapsed in [minutes(0), minutes(6), minutes(61), None] {
                for software_available in [true, false] {
                    if let EscalationStep::Issue(kind) =
                        next_step(Some(marker), software_available, elapsed)
                    {
                        assert!(kind >= floor, "{kind:?} decreased below {floor:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn missing_timestamp_counts_as_expired() {
        assert_eq!(
            next_step(Some(ErrorType::SshRebootTriggered), true, None),
            EscalationStep::Issue(RebootKind::Software)
        );
    }
}

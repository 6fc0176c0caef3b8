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

//! The per-host provisioning state machine.
//!
//! One reconciliation tick enters [`HostStateHandler::handle`] with a
//! mutable copy of the host; exactly one action runs for the current
//! provisioning state and yields an [`ActionOutcome`]. The handler owns
//! the state transitions; the controller loop owns requeue and backoff.

mod actions;
pub mod autosetup;
pub mod escalation;

use std::sync::Arc;
use std::time::Duration;

use anvil_model::credentials::{SshCredentials, SshSpec};
use anvil_model::host::BareMetalHost;
use anvil_model::state::{ErrorType, ProvisioningState};
use anvil_robot::{RobotApi, RobotError};
use anvil_ssh::{SshClient, SshClientFactory, SshError, SshTarget};
use chrono::{DateTime, Utc};

use crate::state_controller::outcome::{ActionError, ActionOutcome, ActionResult};

/// The hostname every rescue system reports.
pub const RESCUE_HOSTNAME: &str = "rescue";
/// The rescue system always listens on the standard port.
pub const RESCUE_PORT: u16 = 22;
/// Requeue interval while a host sits in a terminal error awaiting an
/// operator.
const TERMINAL_ERROR_REQUEUE: Duration = Duration::from_secs(300);

/// Everything one reconciliation tick needs besides the host itself.
/// Resolved by the caller so that actions stay free of secret plumbing.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub now: DateTime<Utc>,
    /// The hostname the installed OS must report: the consuming machine's
    /// name.
    pub hostname: String,
    pub rescue_credentials: SshCredentials,
    pub os_credentials: SshCredentials,
}

pub struct HostStateHandler {
    robot: Arc<dyn RobotApi>,
    ssh: Arc<dyn SshClientFactory>,
}

/// What a `GetHostname` probe told us, classified per the shared ssh
/// error contract. Unrecoverable cases carry their own variants; generic
/// transport failures stay `Err(ActionError)` on the probe call itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProbeResult {
    /// The expected hostname answered.
    Correct,
    /// The rescue system answered although the installed OS was expected.
    Rescue,
    /// Some other hostname answered; the boot did not complete.
    Wrong(String),
    Timeout,
    ConnectionRefused,
    /// Authentication failed: the key does not match, which no retry will
    /// fix.
    WrongKey(String),
}

impl HostStateHandler {
    pub fn new(robot: Arc<dyn RobotApi>, ssh: Arc<dyn SshClientFactory>) -> Self {
        HostStateHandler { robot, ssh }
    }

    /// Runs the action for the host's current provisioning state and
    /// applies the resulting transition or error to the local copy.
    pub async fn handle(&self, host: &mut BareMetalHost, ctx: &HostContext) -> ActionResult {
        if let Some(error_type) = host.status.error_type
            && error_type.is_terminal()
        {
            tracing::debug!(
                host = %host.metadata.name,
                %error_type,
                "host has a terminal error, waiting for operator intervention"
            );
            return Ok(ActionOutcome::wait(TERMINAL_ERROR_REQUEUE));
        }

        let state = host.status.provisioning_state;

        // A consumer that went away pulls the host out of whatever state
        // it was in; deprovisioning reclaims it for the pool.
        if host.spec.consumer_ref.is_none() && Self::is_consumer_bound(state) {
            tracing::info!(
                host = %host.metadata.name,
                %state,
                "consumer is gone, deprovisioning"
            );
            host.status.provisioning_state = ProvisioningState::Deprovisioning;
            host.mark_updated(ctx.now);
            return Ok(ActionOutcome::wait(Duration::ZERO));
        }

        let outcome = match state {
            ProvisioningState::None => self.action_none(host),
            ProvisioningState::Preparing => self.action_preparing(host, ctx).await,
            ProvisioningState::Registering => self.action_registering(host, ctx).await,
            ProvisioningState::ImageInstalling => self.action_image_installing(host, ctx).await,
            ProvisioningState::Provisioning => self.action_provisioning(host, ctx).await,
            ProvisioningState::EnsureProvisioned => {
                self.action_ensure_provisioned(host, ctx).await
            }
            ProvisioningState::Provisioned => self.action_provisioned(host, ctx).await,
            ProvisioningState::Deprovisioning => self.action_deprovisioning(host, ctx).await,
            ProvisioningState::Deleting => self.action_deleting(host, ctx),
        }?;

        match outcome {
            ActionOutcome::Complete => {
                let next = Self::next_state(state);
                tracing::info!(
                    host = %host.metadata.name,
                    from = %state,
                    to = %next,
                    "provisioning state advanced"
                );
                host.clear_error(ctx.now);
                host.status.provisioning_state = next;
                host.mark_updated(ctx.now);
                Ok(ActionOutcome::Complete)
            }
            ActionOutcome::Failed { error_type, reason } => {
                tracing::warn!(
                    host = %host.metadata.name,
                    %state,
                    %error_type,
                    %reason,
                    "provisioning failed permanently"
                );
                host.set_error(ctx.now, error_type, reason.clone());
                Ok(ActionOutcome::Failed { error_type, reason })
            }
            outcome @ ActionOutcome::Continue { .. } => Ok(outcome),
        }
    }

    fn is_consumer_bound(state: ProvisioningState) -> bool {
        !matches!(
            state,
            ProvisioningState::None
                | ProvisioningState::Deprovisioning
                | ProvisioningState::Deleting
        )
    }

    /// The successor of each state once its action completed.
    fn next_state(state: ProvisioningState) -> ProvisioningState {
        match state {
            ProvisioningState::None => ProvisioningState::Preparing,
            ProvisioningState::Preparing => ProvisioningState::Registering,
            ProvisioningState::Registering => ProvisioningState::ImageInstalling,
            ProvisioningState::ImageInstalling => ProvisioningState::Provisioning,
            ProvisioningState::Provisioning => ProvisioningState::EnsureProvisioned,
            ProvisioningState::EnsureProvisioned => ProvisioningState::Provisioned,
            ProvisioningState::Provisioned => ProvisioningState::Deprovisioning,
            ProvisioningState::Deprovisioning => ProvisioningState::Deleting,
            ProvisioningState::Deleting => ProvisioningState::None,
        }
    }

    fn host_ip(host: &BareMetalHost) -> Result<String, ActionError> {
        host.status.ipv4.clone().ok_or_else(|| {
            ActionError::Provisioning("host has no cached ip address yet".to_string())
        })
    }

    fn ssh_spec(host: &BareMetalHost) -> Result<&SshSpec, ActionError> {
        host.spec.ssh_spec.as_ref().ok_or_else(|| {
            ActionError::Provisioning("host has no ssh spec".to_string())
        })
    }

    fn rescue_client(
        &self,
        host: &BareMetalHost,
        ctx: &HostContext,
    ) -> Result<Arc<dyn SshClient>, ActionError> {
        Ok(self.ssh.client(SshTarget {
            ip: Self::host_ip(host)?,
            port: RESCUE_PORT,
            credentials: ctx.rescue_credentials.clone(),
        }))
    }

    fn os_client(
        &self,
        host: &BareMetalHost,
        ctx: &HostContext,
        port: u16,
    ) -> Result<Arc<dyn SshClient>, ActionError> {
        Ok(self.ssh.client(SshTarget {
            ip: Self::host_ip(host)?,
            port,
            credentials: ctx.os_credentials.clone(),
        }))
    }

    /// Classifies a `GetHostname` probe per the shared error contract.
    pub(crate) async fn probe_hostname(
        client: &dyn SshClient,
        expected: &str,
    ) -> Result<ProbeResult, ActionError> {
        match client.get_hostname().await {
            Ok(output) => {
                let hostname = output.trimmed_stdout();
                if hostname.is_empty() {
                    return Err(ActionError::Provisioning(
                        "hostname probe returned empty output".to_string(),
                    ));
                }
                if hostname == expected {
                    Ok(ProbeResult::Correct)
                } else if hostname == RESCUE_HOSTNAME {
                    Ok(ProbeResult::Rescue)
                } else {
                    Ok(ProbeResult::Wrong(hostname.to_string()))
                }
            }
            Err(SshError::Timeout) => Ok(ProbeResult::Timeout),
            Err(SshError::ConnectionRefused) => Ok(ProbeResult::ConnectionRefused),
            Err(SshError::AuthenticationFailed(message)) => Ok(ProbeResult::WrongKey(message)),
            Err(err) => Err(err.into()),
        }
    }

    /// Issues an ssh reboot, tolerating the session dying underneath the
    /// command. Returns whether the command plausibly reached the host.
    pub(crate) async fn deliver_ssh_reboot(client: &dyn SshClient) -> bool {
        match client.reboot().await {
            Ok(_) => true,
            // The connection routinely collapses while the host goes down.
            Err(SshError::Timeout) | Err(SshError::Connection(_)) => true,
            Err(err) => {
                tracing::debug!(error = %err, "ssh reboot was not delivered");
                false
            }
        }
    }

    /// Makes sure the given public key is registered with the vendor and
    /// returns its fingerprint. The same key material registered under a
    /// different name is a configuration error no retry will fix.
    async fn ensure_key(
        &self,
        credentials: &SshCredentials,
    ) -> Result<KeyOutcome, ActionError> {
        let keys = self.robot.list_ssh_keys().await?;
        if let Some(existing) = keys.iter().find(|key| {
            key.name == credentials.name && key.data.trim() == credentials.public_key.trim()
        }) {
            return Ok(KeyOutcome::Registered(existing.fingerprint.clone()));
        }
        match self
            .robot
            .set_ssh_key(&credentials.name, &credentials.public_key)
            .await
        {
            Ok(key) => Ok(KeyOutcome::Registered(key.fingerprint)),
            Err(RobotError::KeyAlreadyExists(message)) => Ok(KeyOutcome::Conflict(message)),
            Err(err) => Err(err.into()),
        }
    }

    /// Permanent-failure outcome helper for key conflicts.
    fn key_conflict(message: String) -> ActionOutcome {
        ActionOutcome::failed(
            ErrorType::Preparation,
            format!("ssh key exists under a different name: {message}"),
        )
    }
}

pub(crate) enum KeyOutcome {
    Registered(String),
    Conflict(String),
}

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

//! One action per provisioning state. Every action either completes (the
//! dispatcher advances the state), asks to be re-run after a delay, fails
//! permanently, or raises a transient [`ActionError`].

use anvil_model::host::BareMetalHost;
use anvil_model::state::ErrorType;
use anvil_robot::{RebootMode, RobotError};
use anvil_ssh::Output;

use super::escalation::JUST_REBOOTED_REQUEUE_SECS;
use super::{HostContext, HostStateHandler, KeyOutcome, ProbeResult, RESCUE_HOSTNAME, autosetup};
use crate::inspect;
use crate::state_controller::outcome::{ActionError, ActionOutcome, ActionResult};

/// Requeue while waiting for a claim or in steady state.
const IDLE_REQUEUE_SECS: u64 = 60;
/// Requeue while an installimage run is still in flight.
const INSTALL_IMAGE_POLL_SECS: u64 = 30;
/// Requeue while cloud-init is working.
const CLOUD_INIT_POLL_SECS: u64 = 5;

fn require_success(what: &str, output: Output) -> Result<Output, ActionError> {
    if !output.is_success() {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(ActionError::Provisioning(format!("{what} failed: {detail}")));
    }
    Ok(output)
}

fn wrong_key_failure(message: &str) -> ActionOutcome {
    ActionOutcome::failed(
        ErrorType::PermanentError,
        format!("host rejects the configured ssh key: {message}"),
    )
}

impl HostStateHandler {
    /// An unclaimed host idles until the binder set a consumer along with
    /// the data needed to provision it.
    pub(super) fn action_none(&self, host: &BareMetalHost) -> ActionResult {
        let claimed = host.spec.consumer_ref.is_some()
            && host.spec.install_image.is_some()
            && host.spec.ssh_spec.is_some();
        if claimed {
            Ok(ActionOutcome::Complete)
        } else {
            Ok(ActionOutcome::wait_secs(IDLE_REQUEUE_SECS))
        }
    }

    /// Brings the host into a known rescue environment with the rescue
    /// key installed.
    pub(super) async fn action_preparing(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
    ) -> ActionResult {
        let server = match self.robot.get_server(host.server_id()).await {
            Ok(server) => server,
            Err(RobotError::NotFound) => {
                return Ok(ActionOutcome::failed(
                    ErrorType::PermanentError,
                    format!("server {} is unknown to the vendor", host.server_id()),
                ));
            }
            Err(err) => return Err(err.into()),
        };
        host.status.ipv4 = server.ipv4.clone();
        host.status.ipv6 = server.ipv6_net.clone();

        if !server.rescue {
            return Ok(ActionOutcome::failed(
                ErrorType::PermanentError,
                "no rescue system available for server",
            ));
        }

        let fingerprint = match self.ensure_key(&ctx.rescue_credentials).await? {
            KeyOutcome::Registered(fingerprint) => fingerprint,
            KeyOutcome::Conflict(message) => return Ok(Self::key_conflict(message)),
        };
        host.status.ssh_status.rescue_key_fingerprint = Some(fingerprint.clone());

        let modes = self.robot.get_reboot_modes(host.server_id()).await?;
        host.status.reboot_types = modes.iter().copied().map(Into::into).collect();

        // A stale activation may be armed with an old key; re-arm with the
        // fingerprint we just registered.
        let rescue = self.robot.get_rescue_boot(host.server_id()).await?;
        if rescue.active {
            self.robot.delete_rescue_boot(host.server_id()).await?;
        }
        self.robot
            .set_rescue_boot(host.server_id(), &fingerprint)
            .await?;

        // The host may already run Linux; an ssh reboot on the OS port is
        // the gentlest way into rescue. Otherwise reboot out of band.
        let port = Self::ssh_spec(host)?.port_after_cloud_init;
        let client = self.os_client(host, ctx, port)?;
        if !Self::deliver_ssh_reboot(client.as_ref()).await {
            let mode = if host.status.reboot_types.iter().any(|kind| {
                *kind == anvil_model::state::RebootKind::Software
            }) {
                RebootMode::Software
            } else {
                RebootMode::Hardware
            };
            self.robot.reboot_server(host.server_id(), mode).await?;
        }
        Ok(ActionOutcome::Complete)
    }

    /// Expects the rescue system; inspects hardware and validates the
    /// root device hints against what was found.
    pub(super) async fn action_registering(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
    ) -> ActionResult {
        if host.has_just_rebooted(ctx.now) {
            return Ok(ActionOutcome::wait_secs(JUST_REBOOTED_REQUEUE_SECS));
        }
        let client = self.rescue_client(host, ctx)?;
        match Self::probe_hostname(client.as_ref(), RESCUE_HOSTNAME).await? {
            ProbeResult::Correct | ProbeResult::Rescue => {}
            ProbeResult::Wrong(hostname) => {
                return self
                    .handle_incomplete_boot(
                        host,
                        ctx,
                        client.as_ref(),
                        true,
                        &format!("expected rescue system, got hostname {hostname:?}"),
                    )
                    .await;
            }
            ProbeResult::Timeout => {
                return self
                    .handle_incomplete_boot(
                        host,
                        ctx,
                        client.as_ref(),
                        true,
                        "rescue system did not answer in time",
                    )
                    .await;
            }
            ProbeResult::ConnectionRefused => {
                return self.handle_connection_refused(host, ctx);
            }
            ProbeResult::WrongKey(message) => return Ok(wrong_key_failure(&message)),
        }

        if host.status.hardware_details.is_none() {
            let details = inspect::inspect_hardware(client.as_ref()).await?;
            tracing::info!(
                host = %host.metadata.name,
                ram_mib = details.ram_mib,
                nics = details.nics.len(),
                disks = details.storage.len(),
                "hardware inspected"
            );
            host.status.hardware_details = Some(details);
        }

        let Some(hints) = host.spec.root_device_hints.clone() else {
            return Ok(ActionOutcome::failed(
                ErrorType::Registration,
                "host has no root device hints",
            ));
        };
        let details = host
            .status
            .hardware_details
            .as_ref()
            .expect("hardware details were just inspected");

        let missing = hints.missing_from(details);
        if !missing.is_empty() {
            return Ok(ActionOutcome::failed(
                ErrorType::Registration,
                format!("root device hints name unknown wwns: {}", missing.join(", ")),
            ));
        }
        let swraid = host
            .spec
            .install_image
            .as_ref()
            .is_some_and(|image| image.swraid);
        if !hints.supports_swraid(swraid) {
            let reason = if swraid {
                "install image wants software raid but the hints name fewer than two raid wwns"
            } else {
                "install image wants a plain install but the hints name no single wwn"
            };
            return Ok(ActionOutcome::failed(ErrorType::Registration, reason));
        }
        Ok(ActionOutcome::Complete)
    }

    /// Writes the OS image from the rescue system and reboots into it.
    pub(super) async fn action_image_installing(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
    ) -> ActionResult {
        let client = self.rescue_client(host, ctx)?;

        let fingerprint = match self.ensure_key(&ctx.os_credentials).await? {
            KeyOutcome::Registered(fingerprint) => fingerprint,
            KeyOutcome::Conflict(message) => return Ok(Self::key_conflict(message)),
        };
        host.status.ssh_status.os_key_fingerprint = Some(fingerprint);

        let Some(hints) = host.spec.root_device_hints.clone() else {
            return Ok(ActionOutcome::failed(
                ErrorType::Registration,
                "host has no root device hints",
            ));
        };
        let Some(install_image) = host.spec.install_image.clone() else {
            return Err(ActionError::Provisioning(
                "host has no install image".to_string(),
            ));
        };
        let wwns: Vec<String> = hints
            .wwns_for(install_image.swraid)
            .into_iter()
            .map(str::to_string)
            .collect();

        // A bootable Linux on a disk outside the install targets would win
        // the next boot; installing over the intended disks cannot fix
        // that.
        let detect = client.detect_linux_on_another_disk(&wwns).await?;
        if !detect.is_success() {
            return Ok(ActionOutcome::failed(
                ErrorType::PermanentError,
                format!(
                    "bootable linux found on another disk: {}",
                    detect.trimmed_stdout()
                ),
            ));
        }

        let running = client.get_running_install_image_processes().await?;
        if !running.trimmed_stdout().is_empty() {
            host.set_error(
                ctx.now,
                ErrorType::Provisioning,
                "a previous installimage run has not finished",
            );
            return Ok(ActionOutcome::wait_secs(INSTALL_IMAGE_POLL_SECS));
        }

        // Device names drift across reboots; resolve them fresh from the
        // running rescue system.
        let storage = inspect::current_storage(client.as_ref()).await?;
        let mut device_names = Vec::with_capacity(wwns.len());
        for wwn in &wwns {
            match storage.iter().find(|named| &named.device.wwn == wwn) {
                Some(named) => device_names.push(named.name.clone()),
                None => {
                    return Ok(ActionOutcome::failed(
                        ErrorType::Registration,
                        format!("hinted wwn {wwn} is no longer present"),
                    ));
                }
            }
        }

        let image_details = match install_image.image.details() {
            Ok(details) => details,
            Err(err) => {
                return Ok(ActionOutcome::failed(
                    ErrorType::PermanentError,
                    err.to_string(),
                ));
            }
        };
        if image_details.needs_download {
            let url = install_image.image.url.as_deref().unwrap_or_default();
            require_success(
                "image download",
                client.download_image(&image_details.path, url).await?,
            )?;
        }

        let autosetup = autosetup::render(
            &ctx.hostname,
            &device_names,
            &image_details.path,
            &install_image,
        );
        require_success("writing autosetup", client.create_autosetup(&autosetup).await?)?;

        let has_post_install_script = install_image.post_install_script.is_some();
        if let Some(script) = &install_image.post_install_script {
            require_success(
                "writing post-install script",
                client.create_post_install_script(script).await?,
            )?;
        }

        require_success("unpacking installimage", client.untar_tgz().await?)?;
        require_success(
            "installimage",
            client.execute_install_image(has_post_install_script).await?,
        )?;

        // Name the server after the machine so the vendor dashboard stays
        // useful.
        self.robot
            .set_server_name(host.server_id(), &ctx.hostname)
            .await?;

        Self::deliver_ssh_reboot(client.as_ref()).await;
        Ok(ActionOutcome::Complete)
    }

    /// Expects the installed OS on its first boot; writes the cloud-init
    /// seed and reboots into it.
    pub(super) async fn action_provisioning(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
    ) -> ActionResult {
        if host.has_just_rebooted(ctx.now) {
            return Ok(ActionOutcome::wait_secs(JUST_REBOOTED_REQUEUE_SECS));
        }
        let port = Self::ssh_spec(host)?.port_after_install_image;
        let client = self.os_client(host, ctx, port)?;

        match Self::probe_hostname(client.as_ref(), &ctx.hostname).await? {
            ProbeResult::Correct => {}
            ProbeResult::Rescue => {
                // The reboot out of rescue has not been taken yet.
                return self
                    .handle_incomplete_boot(
                        host,
                        ctx,
                        client.as_ref(),
                        false,
                        "host is still in the rescue system",
                    )
                    .await;
            }
            ProbeResult::Wrong(hostname) => {
                return self
                    .handle_incomplete_boot(
                        host,
                        ctx,
                        client.as_ref(),
                        false,
                        &format!("expected hostname {:?}, got {hostname:?}", ctx.hostname),
                    )
                    .await;
            }
            ProbeResult::Timeout => {
                return self
                    .handle_incomplete_boot(
                        host,
                        ctx,
                        client.as_ref(),
                        false,
                        "installed system did not answer in time",
                    )
                    .await;
            }
            ProbeResult::ConnectionRefused => return self.handle_connection_refused(host, ctx),
            ProbeResult::WrongKey(message) => return Ok(wrong_key_failure(&message)),
        }

        let cloud_init = client.ensure_cloud_init().await?;
        if !cloud_init.is_success() || cloud_init.trimmed_stdout().is_empty() {
            return Ok(ActionOutcome::failed(
                ErrorType::PermanentError,
                "installed image does not ship cloud-init",
            ));
        }

        let Some(user_data) = host.spec.user_data.clone() else {
            return Err(ActionError::Provisioning(
                "bootstrap user data was not copied to the host".to_string(),
            ));
        };
        require_success(
            "creating nocloud seed directory",
            client.create_nocloud_directory().await?,
        )?;
        require_success(
            "writing meta-data",
            client.create_meta_data(&ctx.hostname).await?,
        )?;
        require_success("writing user-data", client.create_user_data(&user_data).await?)?;

        Self::deliver_ssh_reboot(client.as_ref()).await;
        Ok(ActionOutcome::Complete)
    }

    /// Polls cloud-init on the final port until it finished cleanly.
    pub(super) async fn action_ensure_provisioned(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
    ) -> ActionResult {
        if host.has_just_rebooted(ctx.now) {
            return Ok(ActionOutcome::wait_secs(JUST_REBOOTED_REQUEUE_SECS));
        }
        let spec = Self::ssh_spec(host)?.clone();
        let client = self.os_client(host, ctx, spec.port_after_cloud_init)?;

        let status = match client.cloud_init_status().await {
            Ok(output) => output,
            Err(err) if err.is_connection_refused() => {
                // When cloud-init moves sshd to a new port, a refused
                // connection may just mean the new daemon is not up yet.
                // The old port can tell.
                if spec.port_after_cloud_init != spec.port_after_install_image {
                    let old_client =
                        self.os_client(host, ctx, spec.port_after_install_image)?;
                    if let Ok(output) = old_client.cloud_init_status().await
                        && output.stdout.contains("status: done")
                    {
                        tracing::debug!(
                            host = %host.metadata.name,
                            "cloud-init done on the old port, waiting for the new sshd"
                        );
                        return Ok(ActionOutcome::wait_secs(CLOUD_INIT_POLL_SECS));
                    }
                }
                return self.handle_connection_refused(host, ctx);
            }
            Err(err) if err.is_timeout() => {
                return self
                    .handle_incomplete_boot(
                        host,
                        ctx,
                        client.as_ref(),
                        false,
                        "cloud-init status probe timed out",
                    )
                    .await;
            }
            Err(anvil_ssh::SshError::AuthenticationFailed(message)) => {
                return Ok(wrong_key_failure(&message));
            }
            Err(err) => return Err(err.into()),
        };

        if status.stdout.contains("status: running") {
            return Ok(ActionOutcome::wait_secs(CLOUD_INIT_POLL_SECS));
        }
        if status.stdout.contains("status: disabled") {
            // cloud-init never started on this boot; another reboot is the
            // documented remedy.
            tracing::warn!(host = %host.metadata.name, "cloud-init disabled, rebooting");
            Self::deliver_ssh_reboot(client.as_ref()).await;
            return Ok(ActionOutcome::wait_secs(CLOUD_INIT_POLL_SECS));
        }
        if status.stdout.contains("status: done") {
            let sigterm = client.check_cloud_init_logs_for_sigterm().await?;
            if sigterm.stdout.contains("SIGTERM") {
                // The run was interrupted; wipe its traces and rerun from
                // a clean boot.
                tracing::warn!(
                    host = %host.metadata.name,
                    "cloud-init was interrupted by a sigterm, cleaning up and rebooting"
                );
                require_success(
                    "cleaning cloud-init logs",
                    client.clean_cloud_init_logs().await?,
                )?;
                require_success(
                    "cleaning cloud-init instances",
                    client.clean_cloud_init_instances().await?,
                )?;
                Self::deliver_ssh_reboot(client.as_ref()).await;
                host.set_error(
                    ctx.now,
                    ErrorType::SshRebootTriggered,
                    "cloud-init was interrupted by a sigterm, rebooting",
                );
                return Ok(ActionOutcome::wait_secs(CLOUD_INIT_POLL_SECS));
            }
            return Ok(ActionOutcome::Complete);
        }
        if status.stdout.contains("status: error") {
            return Ok(ActionOutcome::failed(
                ErrorType::PermanentError,
                "cloud-init returned status error",
            ));
        }
        Err(ActionError::Provisioning(format!(
            "unexpected cloud-init status output: {:?}",
            status.trimmed_stdout()
        )))
    }

    /// Steady state; only the operator reboot annotation is acted upon.
    pub(super) async fn action_provisioned(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
    ) -> ActionResult {
        if !host.reboot_annotation() {
            if host.status.rebooted {
                host.status.rebooted = false;
            }
            return Ok(ActionOutcome::wait_secs(IDLE_REQUEUE_SECS));
        }

        let port = Self::ssh_spec(host)?.port_after_cloud_init;
        let client = self.os_client(host, ctx, port)?;

        if !host.status.rebooted {
            tracing::info!(host = %host.metadata.name, "operator requested a reboot");
            Self::deliver_ssh_reboot(client.as_ref()).await;
            host.status.rebooted = true;
            host.set_error(
                ctx.now,
                ErrorType::SshRebootTriggered,
                "operator requested reboot",
            );
            return Ok(ActionOutcome::wait_secs(JUST_REBOOTED_REQUEUE_SECS));
        }
        if host.has_just_rebooted(ctx.now) {
            return Ok(ActionOutcome::wait_secs(JUST_REBOOTED_REQUEUE_SECS));
        }

        match Self::probe_hostname(client.as_ref(), &ctx.hostname).await? {
            ProbeResult::Correct => {
                host.metadata
                    .annotations
                    .remove(anvil_model::host::REBOOT_ANNOTATION);
                host.status.rebooted = false;
                host.clear_error(ctx.now);
                Ok(ActionOutcome::wait_secs(IDLE_REQUEUE_SECS))
            }
            ProbeResult::Rescue => {
                self.handle_incomplete_boot(
                    host,
                    ctx,
                    client.as_ref(),
                    false,
                    "host came back in the rescue system",
                )
                .await
            }
            ProbeResult::Wrong(hostname) => {
                self.handle_incomplete_boot(
                    host,
                    ctx,
                    client.as_ref(),
                    false,
                    &format!("host came back with hostname {hostname:?}"),
                )
                .await
            }
            ProbeResult::Timeout => {
                self.handle_incomplete_boot(
                    host,
                    ctx,
                    client.as_ref(),
                    false,
                    "host did not come back from the operator reboot",
                )
                .await
            }
            ProbeResult::ConnectionRefused => self.handle_connection_refused(host, ctx),
            ProbeResult::WrongKey(message) => Ok(wrong_key_failure(&message)),
        }
    }

    /// Finalizer work before the host returns to the pool. The node reset
    /// is best effort; the host may be unreachable precisely because it is
    /// being torn down.
    pub(super) async fn action_deprovisioning(
        &self,
        host: &mut BareMetalHost,
        ctx: &HostContext,
    ) -> ActionResult {
        if let Some(spec) = host.spec.ssh_spec.as_ref()
            && host.status.ipv4.is_some()
            && ctx.os_credentials.is_complete()
        {
            let client = self.os_client(host, ctx, spec.port_after_cloud_init)?;
            match client.reset_kubeadm().await {
                Ok(output) if output.is_success() => {
                    tracing::debug!(host = %host.metadata.name, "node reset completed");
                }
                Ok(output) => {
                    tracing::warn!(
                        host = %host.metadata.name,
                        stderr = output.stderr.trim(),
                        "node reset failed, continuing anyway"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        host = %host.metadata.name,
                        error = %err,
                        "host unreachable for node reset, continuing anyway"
                    );
                }
            }
        }
        host.status.rebooted = false;
        Ok(ActionOutcome::Complete)
    }

    /// Wipes the binding-scoped status; hardware details and cached
    /// addresses survive for the next consumer.
    pub(super) fn action_deleting(
        &self,
        host: &mut BareMetalHost,
        _ctx: &HostContext,
    ) -> ActionResult {
        host.status.ssh_status = Default::default();
        host.status.rebooted = false;
        Ok(ActionOutcome::Complete)
    }
}

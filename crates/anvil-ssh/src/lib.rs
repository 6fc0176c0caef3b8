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

//! The ssh transport towards rescue systems and freshly installed hosts.
//!
//! The state controller never builds raw command strings; it speaks the
//! fixed vocabulary of [`SshClient`]. The production implementation is
//! [`executor::RemoteExecutor`]; [`scripted::ScriptedSsh`] is its
//! deterministic twin for tests.

use std::sync::Arc;

use anvil_model::credentials::SshCredentials;

pub mod executor;
pub mod scripted;

/// What one remote command produced. Transport-level failures are
/// reported via [`SshError`] instead; a non-zero `exit_status` is a
/// *result*, not an error, because several callers branch on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
}

impl Output {
    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn trimmed_stdout(&self) -> &str {
        self.stdout.trim()
    }
}

/// Transport errors, classified so that callers can tell an unreachable
/// host (timeout), a not-yet-listening sshd (connection refused) and a
/// wrong key (authentication) apart from everything else.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SshError {
    #[error("ssh command timed out")]
    Timeout,
    #[error("ssh connection refused")]
    ConnectionRefused,
    #[error("ssh authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid ssh private key: {0}")]
    InvalidKey(String),
    #[error("ssh connection failed: {0}")]
    Connection(String),
}

impl SshError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SshError::Timeout)
    }

    pub fn is_connection_refused(&self) -> bool {
        matches!(self, SshError::ConnectionRefused)
    }
}

pub type SshResult = Result<Output, SshError>;

/// Where to connect and as whom. Every client acts for exactly one target;
/// switching ports or keys means asking the factory for a new client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub ip: String,
    pub port: u16,
    pub credentials: SshCredentials,
}

pub trait SshClientFactory: Send + Sync {
    fn client(&self, target: SshTarget) -> Arc<dyn SshClient>;
}

/// The fixed command vocabulary the provisioning core may execute.
#[async_trait::async_trait]
pub trait SshClient: Send + Sync {
    async fn get_hostname(&self) -> SshResult;

    async fn reboot(&self) -> SshResult;

    /// Writes the autosetup description consumed by `installimage`.
    async fn create_autosetup(&self, content: &str) -> SshResult;

    async fn create_post_install_script(&self, content: &str) -> SshResult;

    /// Unpacks the vendor's installer tarball shipped with the rescue
    /// system.
    async fn untar_tgz(&self) -> SshResult;

    async fn execute_install_image(&self, has_post_install_script: bool) -> SshResult;

    async fn download_image(&self, path: &str, url: &str) -> SshResult;

    /// Exits non-zero when a bootable Linux lives on a disk outside the
    /// expected WWN set.
    async fn detect_linux_on_another_disk(&self, expected_wwns: &[String]) -> SshResult;

    /// Lists still-running `installimage` invocations; empty stdout means
    /// none.
    async fn get_running_install_image_processes(&self) -> SshResult;

    async fn ensure_cloud_init(&self) -> SshResult;

    async fn create_nocloud_directory(&self) -> SshResult;

    async fn create_meta_data(&self, hostname: &str) -> SshResult;

    async fn create_user_data(&self, content: &str) -> SshResult;

    async fn cloud_init_status(&self) -> SshResult;

    /// Greps the cloud-init logs for a SIGTERM left behind by an
    /// interrupted run.
    async fn check_cloud_init_logs_for_sigterm(&self) -> SshResult;

    async fn clean_cloud_init_logs(&self) -> SshResult;

    async fn clean_cloud_init_instances(&self) -> SshResult;

    async fn reset_kubeadm(&self) -> SshResult;

    // Hardware inspection probes, only meaningful on the rescue system.

    /// Free memory total in KiB.
    async fn hardware_ram(&self) -> SshResult;

    /// One JSON object per NIC: name, model, mac, ip, speedMbps.
    async fn hardware_nics(&self) -> SshResult;

    /// One `KEY="VALUE"` pair line per block device.
    async fn hardware_storage(&self) -> SshResult;

    async fn cpu_arch(&self) -> SshResult;

    async fn cpu_model(&self) -> SshResult;

    async fn cpu_clock_ghz(&self) -> SshResult;

    async fn cpu_threads(&self) -> SshResult;

    async fn cpu_flags(&self) -> SshResult;
}

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

use anvil_model::provider_id::ServerId;

use crate::error::RobotError;
use crate::models::{RebootMode, Rescue, Server, SshKey};

/// The operations the provisioning core needs from the vendor.
///
/// The client is a process-wide resource for rate-limiting purposes, but
/// is injected rather than global so that tests can substitute a fake.
#[async_trait::async_trait]
pub trait RobotApi: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<Server>, RobotError>;

    async fn get_server(&self, server_id: ServerId) -> Result<Server, RobotError>;

    /// Renames the server in the vendor's dashboard.
    async fn set_server_name(&self, server_id: ServerId, name: &str) -> Result<(), RobotError>;

    async fn reboot_server(
        &self,
        server_id: ServerId,
        mode: RebootMode,
    ) -> Result<(), RobotError>;

    /// Which out-of-band reboot kinds the vendor offers for this server.
    async fn get_reboot_modes(&self, server_id: ServerId) -> Result<Vec<RebootMode>, RobotError>;

    /// Arms the rescue system for the next boot, authorizing the key with
    /// the given fingerprint.
    async fn set_rescue_boot(
        &self,
        server_id: ServerId,
        authorized_key_fingerprint: &str,
    ) -> Result<Rescue, RobotError>;

    async fn get_rescue_boot(&self, server_id: ServerId) -> Result<Rescue, RobotError>;

    async fn delete_rescue_boot(&self, server_id: ServerId) -> Result<(), RobotError>;

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, RobotError>;

    /// Registers a public key and returns it with the vendor-issued
    /// fingerprint. Fails with [`RobotError::KeyAlreadyExists`] when the
    /// same key material is registered under a different name.
    async fn set_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey, RobotError>;
}

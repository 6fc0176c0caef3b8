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
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::RobotError;
use crate::models::{RebootMode, Rescue, Server, SshKey};

pub const DEFAULT_BASE_URL: &str = "https://robot-ws.your-server.de";

/// Basic-auth HTTP client for the Robot webservice.
///
/// Every payload arrives wrapped in a single-field object named after the
/// resource (`{"server": {...}}`), and list endpoints return arrays of
/// those wrappers; the private helpers below unwrap that envelope.
// No Debug derive: the basic-auth password must not end up in logs.
#[derive(Clone)]
pub struct RobotClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Debug, Deserialize)]
struct RescueEnvelope {
    rescue: Rescue,
}

#[derive(Debug, Deserialize)]
struct SshKeyEnvelope {
    key: SshKey,
}

#[derive(Debug, Deserialize)]
struct ResetEnvelope {
    reset: ResetOptions,
}

#[derive(Debug, Deserialize)]
struct ResetOptions {
    #[serde(rename = "type", default)]
    types: Vec<String>,
}

impl RobotClient {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RobotError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| RobotError::Decode(format!("invalid base url {base_url:?}: {err}")))?;
        Ok(RobotClient {
            http: reqwest::Client::new(),
            base_url,
            username: username.into(),
            password: password.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, RobotError> {
        self.base_url
            .join(path)
            .map_err(|err| RobotError::Decode(format!("invalid path {path:?}: {err}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RobotError> {
        let request = self
            .http
            .get(self.url(path)?)
            .basic_auth(&self.username, Some(&self.password));
        Self::decode(request.send().await?).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, RobotError> {
        let request = self
            .http
            .post(self.url(path)?)
            .basic_auth(&self.username, Some(&self.password))
            .form(form);
        Self::decode(request.send().await?).await
    }

    async fn post_no_content(&self, path: &str, form: &[(&str, &str)]) -> Result<(), RobotError> {
        let response = self
            .http
            .post(self.url(path)?)
            .basic_auth(&self.username, Some(&self.password))
            .form(form)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn delete(&self, path: &str) -> Result<(), RobotError> {
        let response = self
            .http
            .delete(self.url(path)?)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RobotError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RobotError::from_envelope(status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|err| RobotError::Decode(format!("{err} in body {body:?}")))
    }

    async fn check(response: reqwest::Response) -> Result<(), RobotError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        Err(RobotError::from_envelope(status.as_u16(), &body))
    }
}

#[async_trait::async_trait]
impl crate::api::RobotApi for RobotClient {
    async fn list_servers(&self) -> Result<Vec<Server>, RobotError> {
        let servers: Vec<ServerEnvelope> = self.get("/server").await?;
        Ok(servers.into_iter().map(|envelope| envelope.server).collect())
    }

    async fn get_server(&self, server_id: ServerId) -> Result<Server, RobotError> {
        let envelope: ServerEnvelope = self.get(&format!("/server/{server_id}")).await?;
        Ok(envelope.server)
    }

    async fn set_server_name(&self, server_id: ServerId, name: &str) -> Result<(), RobotError> {
        tracing::debug!(%server_id, name, "renaming server");
        let _: ServerEnvelope = self
            .post(&format!("/server/{server_id}"), &[("server_name", name)])
            .await?;
        Ok(())
    }

    async fn reboot_server(
        &self,
        server_id: ServerId,
        mode: RebootMode,
    ) -> Result<(), RobotError> {
        tracing::info!(%server_id, mode = mode.wire_value(), "rebooting server out of band");
        self.post_no_content(&format!("/reset/{server_id}"), &[("type", mode.wire_value())])
            .await
    }

    async fn get_reboot_modes(&self, server_id: ServerId) -> Result<Vec<RebootMode>, RobotError> {
        let envelope: ResetEnvelope = self.get(&format!("/reset/{server_id}")).await?;
        // The webservice lists more reset kinds than we drive ("power",
        // "man"); anything unknown is ignored.
        Ok(envelope
            .reset
            .types
            .iter()
            .filter_map(|kind| match kind.as_str() {
                "sw" => Some(RebootMode::Software),
                "hw" => Some(RebootMode::Hardware),
                _ => None,
            })
            .collect())
    }

    async fn set_rescue_boot(
        &self,
        server_id: ServerId,
        authorized_key_fingerprint: &str,
    ) -> Result<Rescue, RobotError> {
        tracing::info!(%server_id, "activating rescue boot");
        let envelope: RescueEnvelope = self
            .post(
                &format!("/boot/{server_id}/rescue"),
                &[
                    ("os", "linux"),
                    ("authorized_key[]", authorized_key_fingerprint),
                ],
            )
            .await?;
        Ok(envelope.rescue)
    }

    async fn get_rescue_boot(&self, server_id: ServerId) -> Result<Rescue, RobotError> {
        let envelope: RescueEnvelope = self.get(&format!("/boot/{server_id}/rescue")).await?;
        Ok(envelope.rescue)
    }

    async fn delete_rescue_boot(&self, server_id: ServerId) -> Result<(), RobotError> {
        tracing::debug!(%server_id, "deactivating stale rescue boot");
        self.delete(&format!("/boot/{server_id}/rescue")).await
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, RobotError> {
        let keys: Vec<SshKeyEnvelope> = self.get("/key").await?;
        Ok(keys.into_iter().map(|envelope| envelope.key).collect())
    }

    async fn set_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey, RobotError> {
        tracing::debug!(name, "uploading ssh public key");
        let envelope: SshKeyEnvelope = self
            .post("/key", &[("name", name), ("data", public_key)])
            .await?;
        Ok(envelope.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_base_url() {
        assert!(RobotClient::new("not a url", "user", "pass").is_err());
    }

    #[test]
    fn reset_envelope_filters_unknown_kinds() {
        let envelope: ResetEnvelope =
            serde_json::from_str(r#"{"reset":{"type":["sw","hw","power","man"]}}"#).unwrap();
        let modes: Vec<RebootMode> = envelope
            .reset
            .types
            .iter()
            .filter_map(|kind| match kind.as_str() {
                "sw" => Some(RebootMode::Software),
                "hw" => Some(RebootMode::Hardware),
                _ => None,
            })
            .collect();
        assert_eq!(modes, vec![RebootMode::Software, RebootMode::Hardware]);
    }
}

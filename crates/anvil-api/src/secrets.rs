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

use std::path::PathBuf;

use anvil_model::credentials::SshCredentials;
use anvil_model::host::ConsumerRef;

use crate::state_controller::io::{CredentialsSource, StoreError};

/// Resolves secrets from a directory: `<name>` / `<name>.pub` for key
/// pairs, `<machine>-user-data` for bootstrap payloads. The standalone
/// deployment's stand-in for the framework's secret objects.
pub struct FileCredentialsSource {
    dir: PathBuf,
}

impl FileCredentialsSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileCredentialsSource { dir: dir.into() }
    }

    async fn read(&self, file_name: &str) -> Result<Option<String>, StoreError> {
        let path = self.dir.join(file_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Internal(format!(
                "reading {}: {err}",
                path.display()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl CredentialsSource for FileCredentialsSource {
    async fn ssh_credentials(&self, secret_name: &str) -> Result<SshCredentials, StoreError> {
        let private_key = self
            .read(secret_name)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("secret {secret_name}")))?;
        let public_key = self
            .read(&format!("{secret_name}.pub"))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("secret {secret_name}.pub")))?;
        Ok(SshCredentials {
            name: secret_name.to_string(),
            public_key: public_key.trim().to_string(),
            private_key,
        })
    }

    async fn bootstrap_user_data(
        &self,
        consumer: &ConsumerRef,
    ) -> Result<Option<String>, StoreError> {
        self.read(&format!("{}-user-data", consumer.name)).await
    }
}

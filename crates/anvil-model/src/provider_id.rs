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

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The scheme under which nodes of this provider are registered with the
/// control plane.
const PROVIDER_ID_SCHEME: &str = "hcloud://";
/// Marks a provider ID as belonging to a bare-metal server (as opposed to
/// a cloud instance, which uses the bare numeric form).
const BARE_METAL_PREFIX: &str = "bm-";

/// The numeric server identifier assigned by the vendor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ServerId(pub i64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ServerId {
    fn from(id: i64) -> Self {
        ServerId(id)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ProviderIdError {
    #[error("provider ID is not set")]
    Missing,
    #[error("invalid provider ID: {0:?}")]
    Invalid(String),
}

/// Renders the provider ID under which a bare-metal server is known to the
/// control plane: `hcloud://bm-<serverID>`.
pub fn provider_id_from_server_id(server_id: ServerId) -> String {
    format!("{PROVIDER_ID_SCHEME}{BARE_METAL_PREFIX}{server_id}")
}

/// Extracts the server ID from a provider ID.
///
/// Both the bare-metal form (`hcloud://bm-42`) and the cloud form
/// (`hcloud://42`) parse, since both identify servers by the vendor's
/// numeric ID.
pub fn server_id_from_provider_id(
    provider_id: Option<&str>,
) -> Result<ServerId, ProviderIdError> {
    let provider_id = provider_id.ok_or(ProviderIdError::Missing)?;
    let suffix = provider_id
        .strip_prefix(PROVIDER_ID_SCHEME)
        .ok_or_else(|| ProviderIdError::Invalid(provider_id.to_string()))?;
    let digits = suffix.strip_prefix(BARE_METAL_PREFIX).unwrap_or(suffix);
    let id = i64::from_str(digits)
        .map_err(|_| ProviderIdError::Invalid(provider_id.to_string()))?;
    if id < 0 {
        return Err(ProviderIdError::Invalid(provider_id.to_string()));
    }
    Ok(ServerId(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_bare_metal_form() {
        assert_eq!(provider_id_from_server_id(ServerId(42)), "hcloud://bm-42");
    }

    #[test]
    fn round_trips_for_non_negative_ids() {
        for id in [0, 1, 42, 1071843] {
            let rendered = provider_id_from_server_id(ServerId(id));
            assert_eq!(
                server_id_from_provider_id(Some(&rendered)),
                Ok(ServerId(id))
            );
        }
    }

    #[test]
    fn accepts_cloud_form() {
        assert_eq!(
            server_id_from_provider_id(Some("hcloud://42")),
            Ok(ServerId(42))
        );
    }

    #[test]
    fn rejects_missing_and_malformed() {
        assert_eq!(server_id_from_provider_id(None), Err(ProviderIdError::Missing));
        assert_eq!(
            server_id_from_provider_id(Some("hcloud:serverID")),
            Err(ProviderIdError::Invalid("hcloud:serverID".to_string()))
        );
        assert_eq!(
            server_id_from_provider_id(Some("hcloud://bm-")),
            Err(ProviderIdError::Invalid("hcloud://bm-".to_string()))
        );
        assert_eq!(
            server_id_from_provider_id(Some("hcloud://bm--7")),
            Err(ProviderIdError::Invalid("hcloud://bm--7".to_string()))
        );
    }
}

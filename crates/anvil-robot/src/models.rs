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
use anvil_model::state::RebootKind;
use serde::{Deserialize, Serialize};

/// One server record as reported by the vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "server_number")]
    pub id: ServerId,
    #[serde(rename = "server_name", default)]
    pub name: String,
    #[serde(rename = "server_ip")]
    pub ipv4: Option<String>,
    /// The /64 network routed to the server.
    #[serde(rename = "server_ipv6_net")]
    pub ipv6_net: Option<String>,
    /// Whether a rescue system can be booted on this server at all.
    #[serde(default)]
    pub rescue: bool,
}

/// An out-of-band reboot kind offered by the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebootMode {
    #[serde(rename = "sw")]
    Software,
    #[serde(rename = "hw")]
    Hardware,
}

impl RebootMode {
    /// The form value the webservice expects.
    pub fn wire_value(&self) -> &'static str {
        match self {
            RebootMode::Software => "sw",
            RebootMode::Hardware => "hw",
        }
    }
}

impl From<RebootMode> for RebootKind {
    fn from(mode: RebootMode) -> Self {
        match mode {
            RebootMode::Software => RebootKind::Software,
            RebootMode::Hardware => RebootKind::Hardware,
        }
    }
}

/// Rescue-boot activation state for one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rescue {
    pub active: bool,
    /// Fingerprints of the keys authorized for the rescue system.
    #[serde(default)]
    pub authorized_keys: Vec<String>,
}

/// A registered public key and its vendor-issued fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    pub name: String,
    pub fingerprint: String,
    #[serde(default)]
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reboot_mode_maps_onto_the_ladder() {
        assert_eq!(RebootKind::from(RebootMode::Software), RebootKind::Software);
        assert_eq!(RebootKind::from(RebootMode::Hardware), RebootKind::Hardware);
    }

    #[test]
    fn server_deserializes_from_vendor_field_names() {
        let server: Server = serde_json::from_str(
            r#"{
                "server_number": 321,
                "server_name": "bm-worker-0",
                "server_ip": "192.0.2.10",
                "server_ipv6_net": "2001:db8:0:4711::",
                "rescue": true
            }"#,
        )
        .unwrap();
        assert_eq!(server.id, ServerId(321));
        assert_eq!(server.ipv4.as_deref(), Some("192.0.2.10"));
        assert!(server.rescue);
    }
}

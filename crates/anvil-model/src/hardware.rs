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

/// The hardware record produced during registration.
///
/// Device names are deliberately absent: they are not stable across reboots
/// and are re-resolved from the live system right before `installimage`
/// consumes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareDetails {
    pub ram_mib: u64,
    pub nics: Vec<Nic>,
    pub storage: Vec<StorageDevice>,
    pub cpu: Cpu,
}

impl HardwareDetails {
    pub fn storage_wwns(&self) -> Vec<&str> {
        self.storage.iter().map(|device| device.wwn.as_str()).collect()
    }

    pub fn has_wwn(&self, wwn: &str) -> bool {
        self.storage.iter().any(|device| device.wwn == wwn)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    pub name: String,
    pub model: String,
    pub mac: String,
    pub ip: String,
    pub speed_mbps: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDevice {
    /// World-Wide Name, the stable identifier root device hints refer to.
    pub wwn: String,
    pub size_bytes: u64,
    pub size_gb: u64,
    pub rotational: bool,
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub hctl: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cpu {
    pub arch: String,
    pub model: String,
    pub clock_ghz: f64,
    pub threads: u32,
    pub flags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wwn_lookup() {
        let details = HardwareDetails {
            storage: vec![
                StorageDevice {
                    wwn: "0x5000000000000001".to_string(),
                    ..Default::default()
                },
                StorageDevice {
                    wwn: "0x5000000000000002".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert!(details.has_wwn("0x5000000000000002"));
        assert!(!details.has_wwn("0x5000000000000003"));
        assert_eq!(
            details.storage_wwns(),
            vec!["0x5000000000000001", "0x5000000000000002"]
        );
    }
}

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

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anvil_model::credentials::SshSpec;
use anvil_model::host::{
    BareMetalHost, HostSpec, Image, InstallImage, RaidHints, RootDeviceHints,
};
use anvil_model::machine::BareMetalMachine;
use anvil_model::metadata::ObjectMeta;
use anvil_model::provider_id::ServerId;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

use crate::state_controller::controller::IterationConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub robot: RobotSettings,
    #[serde(default)]
    pub controller: ControllerSettings,
    /// Name of the secret holding the process-wide rescue key pair.
    #[serde(default = "default_rescue_key_secret")]
    pub rescue_key_secret: String,
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,
    #[serde(default)]
    pub hosts: Vec<HostSeed>,
    #[serde(default)]
    pub machines: Vec<MachineSeed>,
}

#[derive(Debug, Deserialize)]
pub struct RobotSettings {
    #[serde(default = "default_robot_base_url")]
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ControllerSettings {
    #[serde(with = "humantime_serde", default = "default_iteration_time")]
    pub iteration_time: Duration,
    #[serde(with = "humantime_serde", default = "default_error_requeue_max")]
    pub error_requeue_max: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            iteration_time: default_iteration_time(),
            error_requeue_max: default_error_requeue_max(),
        }
    }
}

impl From<&ControllerSettings> for IterationConfig {
    fn from(settings: &ControllerSettings) -> Self {
        IterationConfig {
            iteration_time: settings.iteration_time,
            error_requeue_max: settings.error_requeue_max,
        }
    }
}

/// One physical server entry of the standalone inventory file.
#[derive(Debug, Deserialize)]
pub struct HostSeed {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub server_id: i64,
    /// Install target for plain installs.
    pub wwn: Option<String>,
    /// Install targets for software-raid installs.
    #[serde(default)]
    pub raid_wwns: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl HostSeed {
    pub fn into_host(self) -> BareMetalHost {
        let raid_active = !self.raid_wwns.is_empty();
        BareMetalHost {
            metadata: ObjectMeta {
                labels: self.labels,
                ..ObjectMeta::new(self.namespace, self.name)
            },
            spec: HostSpec {
                server_id: ServerId(self.server_id),
                root_device_hints: Some(RootDeviceHints {
                    wwn: self.wwn,
                    raid: RaidHints {
                        active: raid_active,
                        wwns: self.raid_wwns,
                    },
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// One logical node entry of the standalone inventory file.
#[derive(Debug, Deserialize)]
pub struct MachineSeed {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub image_url: Option<String>,
    pub image_name: Option<String>,
    pub image_path: Option<String>,
    #[serde(default)]
    pub swraid: bool,
    pub swraid_level: Option<u8>,
    /// Secret holding the OS key pair for this machine.
    pub ssh_secret: String,
    #[serde(default = "default_ssh_port")]
    pub port_after_install_image: u16,
    #[serde(default = "default_ssh_port")]
    pub port_after_cloud_init: u16,
}

impl MachineSeed {
    pub fn into_machine(self) -> BareMetalMachine {
        let mut machine = BareMetalMachine {
            metadata: ObjectMeta::new(self.namespace, self.name),
            ..Default::default()
        };
        machine.spec.install_image = Some(InstallImage {
            image: Image {
                url: self.image_url,
                name: self.image_name,
                path: self.image_path,
            },
            swraid: self.swraid,
            swraid_level: self.swraid_level,
            ..Default::default()
        });
        machine.spec.ssh_spec = Some(SshSpec {
            secret_name: self.ssh_secret,
            port_after_install_image: self.port_after_install_image,
            port_after_cloud_init: self.port_after_cloud_init,
        });
        machine
    }
}

impl Settings {
    /// Loads the TOML file and lets `ANVIL_*` environment variables
    /// override it (`ANVIL_ROBOT__PASSWORD` and friends).
    pub fn load(path: &Path) -> Result<Settings, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ANVIL_").split("__"))
            .extract()
    }
}

fn default_robot_base_url() -> String {
    anvil_robot::client::DEFAULT_BASE_URL.to_string()
}

fn default_rescue_key_secret() -> String {
    "rescue-ssh-key".to_string()
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/etc/anvil/secrets")
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_iteration_time() -> Duration {
    Duration::from_secs(30)
}

fn default_error_requeue_max() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_ssh_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_settings_parse_with_defaults() {
        let settings: Settings = Figment::new()
            .merge(Toml::string(
                r#"
                [robot]
                username = "user"
                password = "pass"

                [[hosts]]
                name = "host-0"
                server_id = 321
                wwn = "0x5000cca27dc48f45"

                [[machines]]
                name = "bm-worker-0"
                image_path = "/root/.oldroot/nfs/images/Ubuntu-2404.tar.gz"
                ssh_secret = "os-ssh-key"
                port_after_cloud_init = 2222
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(settings.robot.base_url, anvil_robot::client::DEFAULT_BASE_URL);
        assert_eq!(settings.controller.iteration_time, Duration::from_secs(30));
        assert_eq!(settings.rescue_key_secret, "rescue-ssh-key");

        let host = settings.hosts.into_iter().next().unwrap().into_host();
        assert_eq!(host.spec.server_id, ServerId(321));
        assert_eq!(host.metadata.namespace, "default");
        assert!(host.spec.root_device_hints.unwrap().supports_swraid(false));

        let machine = settings.machines.into_iter().next().unwrap().into_machine();
        let ssh_spec = machine.spec.ssh_spec.unwrap();
        assert_eq!(ssh_spec.port_after_install_image, 22);
        assert_eq!(ssh_spec.port_after_cloud_init, 2222);
    }

    #[test]
    fn durations_parse_humantime() {
        let settings: Settings = Figment::new()
            .merge(Toml::string(
                r#"
                [robot]
                username = "user"
                password = "pass"

                [controller]
                iteration_time = "10s"
                error_requeue_max = "2m"
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(settings.controller.iteration_time, Duration::from_secs(10));
        assert_eq!(
            settings.controller.error_requeue_max,
            Duration::from_secs(120)
        );
    }
}

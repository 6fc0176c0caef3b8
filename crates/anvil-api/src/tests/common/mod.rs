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

//! Shared fixtures: a scripted robot API, canned probe outputs, and
//! builders for hosts, machines and handler environments.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anvil_model::credentials::{SshCredentials, SshSpec};
use anvil_model::host::{
    BareMetalHost, ConsumerRef, HostSpec, Image, InstallImage, RootDeviceHints,
};
use anvil_model::machine::{BareMetalMachine, MachineSpec};
use anvil_model::metadata::ObjectMeta;
use anvil_model::provider_id::ServerId;
use anvil_model::state::ProvisioningState;
use anvil_robot::{RebootMode, Rescue, RobotApi, RobotError, Server, SshKey};
use anvil_ssh::scripted::{ScriptedSsh, ScriptedSshFactory};
use chrono::{DateTime, TimeZone, Utc};

use crate::state_controller::host::{HostContext, HostStateHandler};

pub const FIXTURE_SERVER_ID: i64 = 321;
pub const FIXTURE_HOSTNAME: &str = "bm-worker-0";
pub const FIXTURE_IPV4: &str = "192.0.2.10";
/// WWN of the fixture host's spinning disk (`sda` in [`LSBLK_LINES`]).
pub const FIXTURE_WWN: &str = "0x5000cca27dc48f45";

pub const LSBLK_LINES: &str = concat!(
    "NAME=\"nvme0n1\" TYPE=\"disk\" SIZE=\"512110190592\" VENDOR=\"\" MODEL=\"SAMSUNG MZVL2512\" SERIAL=\"S677NF0R\" WWN=\"eui.002538b811b57a11\" HCTL=\"\" ROTA=\"0\"\n",
    "NAME=\"sda\" TYPE=\"disk\" SIZE=\"4000787030016\" VENDOR=\"ATA     \" MODEL=\"HGST HUS726T4TAL\" SERIAL=\"V6K1ZMNR\" WWN=\"0x5000cca27dc48f45\" HCTL=\"0:0:0:0\" ROTA=\"1\"\n",
);

pub const NIC_LINES: &str = concat!(
    "{\"name\":\"eth0\",\"model\":\"Intel I210\",\"mac\":\"aa:bb:cc:dd:ee:01\",\"ip\":\"192.0.2.10/26\",\"speedMbps\":\"1000\"}\n",
    "{\"name\":\"eth1\",\"model\":\"Intel I210\",\"mac\":\"aa:bb:cc:dd:ee:02\",\"ip\":\"\",\"speedMbps\":\"-1\"}\n",
);

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[derive(Default)]
pub struct FakeRobotInner {
    pub servers: BTreeMap<i64, Server>,
    pub reboot_modes: Vec<RebootMode>,
    pub rescue: BTreeMap<i64, Rescue>,
    pub keys: Vec<SshKey>,
    /// Every call fails with `RateLimitExceeded` while set.
    pub rate_limited: bool,
    pub reboots: Vec<(ServerId, RebootMode)>,
    pub renames: Vec<(ServerId, String)>,
    pub rescue_activations: Vec<(ServerId, String)>,
    pub rescue_deletions: Vec<ServerId>,
}

/// Deterministic in-memory twin of the vendor API.
#[derive(Default)]
pub struct FakeRobot {
    pub inner: Mutex<FakeRobotInner>,
}

impl FakeRobot {
    fn guard(&self) -> Result<std::sync::MutexGuard<'_, FakeRobotInner>, RobotError> {
        let inner = self.inner.lock().unwrap();
        if inner.rate_limited {
            return Err(RobotError::RateLimitExceeded("slow down".to_string()));
        }
        Ok(inner)
    }
}

#[async_trait::async_trait]
impl RobotApi for FakeRobot {
    async fn list_servers(&self) -> Result<Vec<Server>, RobotError> {
        Ok(self.guard()?.servers.values().cloned().collect())
    }

    async fn get_server(&self, server_id: ServerId) -> Result<Server, RobotError> {
        self.guard()?
            .servers
            .get(&server_id.0)
            .cloned()
            .ok_or(RobotError::NotFound)
    }

    async fn set_server_name(&self, server_id: ServerId, name: &str) -> Result<(), RobotError> {
        let mut inner = self.guard()?;
        let server = inner
            .servers
            .get_mut(&server_id.0)
            .ok_or(RobotError::NotFound)?;
        server.name = name.to_string();
        inner.renames.push((server_id, name.to_string()));
        Ok(())
    }

    async fn reboot_server(
        &self,
        server_id: ServerId,
        mode: RebootMode,
    ) -> Result<(), RobotError> {
        self.guard()?.reboots.push((server_id, mode));
        Ok(())
    }

    async fn get_reboot_modes(&self, _server_id: ServerId) -> Result<Vec<RebootMode>, RobotError> {
        Ok(self.guard()?.reboot_modes.clone())
    }

    async fn set_rescue_boot(
        &self,
        server_id: ServerId,
        authorized_key_fingerprint: &str,
    ) -> Result<Rescue, RobotError> {
        let mut inner = self.guard()?;
        let rescue = Rescue {
            active: true,
            authorized_keys: vec![authorized_key_fingerprint.to_string()],
        };
        inner.rescue.insert(server_id.0, rescue.clone());
        inner
            .rescue_activations
            .push((server_id, authorized_key_fingerprint.to_string()));
        Ok(rescue)
    }

    async fn get_rescue_boot(&self, server_id: ServerId) -> Result<Rescue, RobotError> {
        Ok(self
            .guard()?
            .rescue
            .get(&server_id.0)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_rescue_boot(&self, server_id: ServerId) -> Result<(), RobotError> {
        let mut inner = self.guard()?;
        inner.rescue.remove(&server_id.0);
        inner.rescue_deletions.push(server_id);
        Ok(())
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, RobotError> {
        Ok(self.guard()?.keys.clone())
    }

    async fn set_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey, RobotError> {
        let mut inner = self.guard()?;
        if let Some(existing) = inner
            .keys
            .iter()
            .find(|key| key.data.trim() == public_key.trim() && key.name != name)
        {
            return Err(RobotError::KeyAlreadyExists(format!(
                "key already registered as {}",
                existing.name
            )));
        }
        if let Some(existing) = inner.keys.iter().find(|key| key.name == name) {
            return Ok(existing.clone());
        }
        let key = SshKey {
            name: name.to_string(),
            fingerprint: format!("fp-{name}"),
            data: public_key.to_string(),
        };
        inner.keys.push(key.clone());
        Ok(key)
    }
}

pub struct TestEnv {
    pub robot: Arc<FakeRobot>,
    pub ssh: Arc<ScriptedSsh>,
    pub factory: Arc<ScriptedSshFactory>,
    pub handler: HostStateHandler,
}

pub fn create_test_env() -> TestEnv {
    let robot = Arc::new(FakeRobot::default());
    {
        let mut inner = robot.inner.lock().unwrap();
        inner.servers.insert(
            FIXTURE_SERVER_ID,
            Server {
                id: ServerId(FIXTURE_SERVER_ID),
                name: "unclaimed".to_string(),
                ipv4: Some(FIXTURE_IPV4.to_string()),
                ipv6_net: Some("2001:db8:0:4711::".to_string()),
                rescue: true,
            },
        );
        inner.reboot_modes = vec![RebootMode::Software, RebootMode::Hardware];
    }
    let ssh = ScriptedSsh::new();
    let factory = Arc::new(ScriptedSshFactory::new(ssh.clone()));
    let handler = HostStateHandler::new(robot.clone(), factory.clone());
    TestEnv {
        robot,
        ssh,
        factory,
        handler,
    }
}

pub fn rescue_credentials() -> SshCredentials {
    SshCredentials {
        name: "rescue-ssh-key".to_string(),
        public_key: "ssh-ed25519 AAAARESCUE anvil".to_string(),
        private_key: "rescue-private-key".to_string(),
    }
}

pub fn os_credentials() -> SshCredentials {
    SshCredentials {
        name: "os-ssh-key".to_string(),
        public_key: "ssh-ed25519 AAAAOS anvil".to_string(),
        private_key: "os-private-key".to_string(),
    }
}

pub fn test_context(now: DateTime<Utc>) -> HostContext {
    HostContext {
        now,
        hostname: FIXTURE_HOSTNAME.to_string(),
        rescue_credentials: rescue_credentials(),
        os_credentials: os_credentials(),
    }
}

pub fn test_machine() -> BareMetalMachine {
    BareMetalMachine {
        metadata: ObjectMeta::new("default", FIXTURE_HOSTNAME),
        spec: MachineSpec {
            install_image: Some(InstallImage {
                image: Image {
                    path: Some("/root/.oldroot/nfs/images/Ubuntu-2404.tar.gz".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ssh_spec: Some(SshSpec {
                secret_name: "os-ssh-key".to_string(),
                port_after_install_image: 22,
                port_after_cloud_init: 22,
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A host in the given state, claimed by the fixture machine, with the
/// fixture disk as install target and the preparing-phase status already
/// cached.
pub fn test_host(state: ProvisioningState) -> BareMetalHost {
    let machine = test_machine();
    let mut host = BareMetalHost {
        metadata: ObjectMeta::new("default", "host-0"),
        spec: HostSpec {
            server_id: ServerId(FIXTURE_SERVER_ID),
            consumer_ref: Some(ConsumerRef::for_machine(&machine)),
            root_device_hints: Some(RootDeviceHints {
                wwn: Some(FIXTURE_WWN.to_string()),
                ..Default::default()
            }),
            install_image: machine.spec.install_image.clone(),
            user_data: Some("#cloud-config\nhostname: bm-worker-0\n".to_string()),
            ssh_spec: machine.spec.ssh_spec.clone(),
            maintenance_mode: false,
        },
        ..Default::default()
    };
    host.status.provisioning_state = state;
    if state != ProvisioningState::None {
        host.status.ipv4 = Some(FIXTURE_IPV4.to_string());
        host.status.ipv6 = Some("2001:db8:0:4711::".to_string());
        host.status.ssh_status.rescue_key_fingerprint = Some("fp-rescue-ssh-key".to_string());
        host.status.reboot_types = vec![
            anvil_model::state::RebootKind::Software,
            anvil_model::state::RebootKind::Hardware,
        ];
    }
    host
}

/// Hands out deterministic key pairs named after the secret, plus a fixed
/// bootstrap payload.
pub struct FakeCredentials;

#[async_trait::async_trait]
impl crate::state_controller::io::CredentialsSource for FakeCredentials {
    async fn ssh_credentials(
        &self,
        secret_name: &str,
    ) -> Result<SshCredentials, crate::state_controller::io::StoreError> {
        Ok(SshCredentials {
            name: secret_name.to_string(),
            public_key: format!("ssh-ed25519 AAAA{secret_name} anvil"),
            private_key: format!("{secret_name}-private"),
        })
    }

    async fn bootstrap_user_data(
        &self,
        _consumer: &ConsumerRef,
    ) -> Result<Option<String>, crate::state_controller::io::StoreError> {
        Ok(Some("#cloud-config\nhostname: bm-worker-0\n".to_string()))
    }
}

/// Scripts the full hardware inspection answer set on the scripted ssh.
pub fn script_inspection(ssh: &ScriptedSsh) {
    ssh.script_stdout("hardware_ram", "131764884\n");
    ssh.script_stdout("hardware_nics", NIC_LINES);
    ssh.script_stdout("hardware_storage", LSBLK_LINES);
    ssh.script_stdout("cpu_arch", "x86_64\n");
    ssh.script_stdout("cpu_model", "AMD EPYC 7502P 32-Core Processor\n");
    ssh.script_stdout("cpu_clock_ghz", "2.5");
    ssh.script_stdout("cpu_threads", "64\n");
    ssh.script_stdout("cpu_flags", "fpu vme de pse tsc msr pae\n");
}

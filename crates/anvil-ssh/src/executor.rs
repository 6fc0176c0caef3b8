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

use std::sync::Arc;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};

use crate::{Output, SshClient, SshClientFactory, SshError, SshResult, SshTarget};

/// Path of the installer tarball shipped with the rescue system.
const INSTALLIMAGE_TGZ: &str = "/root/.oldroot/nfs/install/installimage.tgz";
/// Where the autosetup description is expected by the installer.
const AUTOSETUP_PATH: &str = "/autosetup";
const POST_INSTALL_SCRIPT_PATH: &str = "/root/post-install.sh";
const NOCLOUD_DIR: &str = "/var/lib/cloud/seed/nocloud-net";

/// Executes the command vocabulary over a fresh ssh session per call.
///
/// Sessions are not reused: between most calls the host reboots anyway,
/// and a stale session is harder to diagnose than a reconnect.
pub struct RemoteExecutor {
    target: SshTarget,
    command_timeout: Duration,
}

impl RemoteExecutor {
    pub fn new(target: SshTarget, command_timeout: Duration) -> Self {
        RemoteExecutor {
            target,
            command_timeout,
        }
    }

    async fn run(&self, command: &str) -> SshResult {
        let auth = AuthMethod::with_key(&self.target.credentials.private_key, None);
        let connect = Client::connect(
            (self.target.ip.as_str(), self.target.port),
            "root",
            auth,
            ServerCheckMethod::NoCheck,
        );
        let client = tokio::time::timeout(self.command_timeout, connect)
            .await
            .map_err(|_| SshError::Timeout)?
            .map_err(classify)?;

        let result = tokio::time::timeout(self.command_timeout, client.execute(command))
            .await
            .map_err(|_| SshError::Timeout)?
            .map_err(classify)?;

        tracing::trace!(
            ip = %self.target.ip,
            port = self.target.port,
            exit_status = result.exit_status,
            "executed remote command"
        );
        Ok(Output {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_status: result.exit_status,
        })
    }
}

fn classify(err: async_ssh2_tokio::Error) -> SshError {
    if let Some(io_err) = find_io_error(&err) {
        match io_err.kind() {
            std::io::ErrorKind::ConnectionRefused => return SshError::ConnectionRefused,
            std::io::ErrorKind::TimedOut => return SshError::Timeout,
            _ => {}
        }
    }
    let text = err.to_string();
    if text.to_lowercase().contains("auth") {
        return SshError::AuthenticationFailed(text);
    }
    SshError::Connection(text)
}

fn find_io_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a std::io::Error> {
    let mut source = err.source();
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<std::io::Error>() {
            return Some(io_err);
        }
        source = current.source();
    }
    None
}

/// Wraps arbitrary file content into a quoted heredoc write.
fn write_file(path: &str, content: &str) -> String {
    format!("cat << 'ANVIL_EOF' > {path}\n{content}\nANVIL_EOF")
}

#[async_trait::async_trait]
impl SshClient for RemoteExecutor {
    async fn get_hostname(&self) -> SshResult {
        self.run("hostname").await
    }

    async fn reboot(&self) -> SshResult {
        // The session usually dies mid-command once the reboot is
        // underway; callers only care that the command was delivered.
        self.run("reboot").await
    }

    async fn create_autosetup(&self, content: &str) -> SshResult {
        self.run(&write_file(AUTOSETUP_PATH, content)).await
    }

    async fn create_post_install_script(&self, content: &str) -> SshResult {
        self.run(&format!(
            "{}\nchmod +x {POST_INSTALL_SCRIPT_PATH}",
            write_file(POST_INSTALL_SCRIPT_PATH, content)
        ))
        .await
    }

    async fn untar_tgz(&self) -> SshResult {
        self.run(&format!("tar -zxf {INSTALLIMAGE_TGZ} -C /root/"))
            .await
    }

    async fn execute_install_image(&self, has_post_install_script: bool) -> SshResult {
        let post = if has_post_install_script {
            format!(" -x {POST_INSTALL_SCRIPT_PATH}")
        } else {
            String::new()
        };
        self.run(&format!(
            "export TERM=xterm; /root/installimage -a -c {AUTOSETUP_PATH}{post}"
        ))
        .await
    }

    async fn download_image(&self, path: &str, url: &str) -> SshResult {
        self.run(&format!("curl --fail -sL -o {path} {url}")).await
    }

    async fn detect_linux_on_another_disk(&self, expected_wwns: &[String]) -> SshResult {
        let expected = expected_wwns.join("|");
        // Walk every disk whose WWN is not among the install targets and
        // fail if any of them carries a Linux filesystem partition.
        self.run(&format!(
            r#"for dev in $(lsblk -rno NAME,TYPE,WWN | awk '$2 == "disk"' | grep -vE '{expected}' | awk '{{print $1}}'); do
  if lsblk -rno PARTTYPENAME /dev/$dev | grep -qi 'linux'; then
    echo "found linux on /dev/$dev"
    exit 1
  fi
done"#
        ))
        .await
    }

    async fn get_running_install_image_processes(&self) -> SshResult {
        self.run("ps -e -o command= | grep installimage | grep -v grep || true")
            .await
    }

    async fn ensure_cloud_init(&self) -> SshResult {
        self.run("command -v cloud-init").await
    }

    async fn create_nocloud_directory(&self) -> SshResult {
        self.run(&format!("mkdir -p {NOCLOUD_DIR}")).await
    }

    async fn create_meta_data(&self, hostname: &str) -> SshResult {
        self.run(&format!(
            "echo 'local-hostname: {hostname}' > {NOCLOUD_DIR}/meta-data"
        ))
        .await
    }

    async fn create_user_data(&self, content: &str) -> SshResult {
        self.run(&write_file(&format!("{NOCLOUD_DIR}/user-data"), content))
            .await
    }

    async fn cloud_init_status(&self) -> SshResult {
        self.run("cloud-init status").await
    }

    async fn check_cloud_init_logs_for_sigterm(&self) -> SshResult {
        self.run("grep -R 'SIGTERM' /var/log/cloud-init.log 2>/dev/null || true")
            .await
    }

    async fn clean_cloud_init_logs(&self) -> SshResult {
        self.run("rm -rf /var/log/cloud-init*").await
    }

    async fn clean_cloud_init_instances(&self) -> SshResult {
        self.run("rm -rf /var/lib/cloud/instances").await
    }

    async fn reset_kubeadm(&self) -> SshResult {
        self.run(
            "kubeadm reset -f && rm -rf /etc/kubernetes /var/lib/kubelet /var/lib/etcd",
        )
        .await
    }

    async fn hardware_ram(&self) -> SshResult {
        self.run("grep MemTotal /proc/meminfo | awk '{print $2}'")
            .await
    }

    async fn hardware_nics(&self) -> SshResult {
        self.run(
            r#"for ifname in $(ls /sys/class/net | grep -v lo); do
  mac=$(cat /sys/class/net/$ifname/address)
  speed=$(cat /sys/class/net/$ifname/speed 2>/dev/null || echo 0)
  model=$(lspci -s "$(basename "$(readlink -f /sys/class/net/$ifname/device)")" 2>/dev/null | cut -d: -f3- | xargs)
  ip=$(ip -4 -o addr show dev $ifname | awk '{print $4}' | head -1)
  echo "{\"name\":\"$ifname\",\"model\":\"$model\",\"mac\":\"$mac\",\"ip\":\"$ip\",\"speedMbps\":\"$speed\"}"
done"#,
        )
        .await
    }

    async fn hardware_storage(&self) -> SshResult {
        self.run("lsblk -b -P -o NAME,TYPE,SIZE,VENDOR,MODEL,SERIAL,WWN,HCTL,ROTA")
            .await
    }

    async fn cpu_arch(&self) -> SshResult {
        self.run("lscpu | grep 'Architecture:' | awk '{print $2}'")
            .await
    }

    async fn cpu_model(&self) -> SshResult {
        self.run("lscpu | grep 'Model name:' | cut -d: -f2- | xargs")
            .await
    }

    async fn cpu_clock_ghz(&self) -> SshResult {
        self.run("lscpu | grep 'CPU max MHz' | awk '{printf \"%.1f\", $4/1000}'")
            .await
    }

    async fn cpu_threads(&self) -> SshResult {
        self.run("nproc").await
    }

    async fn cpu_flags(&self) -> SshResult {
        self.run("lscpu | grep 'Flags:' | cut -d: -f2- | xargs")
            .await
    }
}

/// Hands out a [`RemoteExecutor`] per target.
pub struct RemoteExecutorFactory {
    pub command_timeout: Duration,
}

impl Default for RemoteExecutorFactory {
    fn default() -> Self {
        RemoteExecutorFactory {
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl SshClientFactory for RemoteExecutorFactory {
    fn client(&self, target: SshTarget) -> Arc<dyn SshClient> {
        Arc::new(RemoteExecutor::new(target, self.command_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heredoc_write_quotes_content_verbatim() {
        let command = write_file("/autosetup", "DRIVE1 /dev/sda\nIMAGE /root/image.tar.gz");
        assert!(command.starts_with("cat << 'ANVIL_EOF' > /autosetup\n"));
        assert!(command.ends_with("\nANVIL_EOF"));
        assert!(command.contains("DRIVE1 /dev/sda"));
    }

    #[test]
    fn io_error_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            match refused.kind() {
                std::io::ErrorKind::ConnectionRefused => SshError::ConnectionRefused,
                _ => SshError::Timeout,
            },
            SshError::ConnectionRefused
        );
    }
}

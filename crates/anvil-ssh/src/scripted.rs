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

//! A deterministic twin of the real transport, in the spirit of the
//! mock appliances this controller is tested against: every vocabulary
//! entry has a queue of canned results, and each invocation is recorded
//! so tests can assert on the exact call sequence.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::{Output, SshClient, SshClientFactory, SshResult, SshTarget};

#[derive(Default)]
pub struct ScriptedSsh {
    responses: Mutex<HashMap<&'static str, VecDeque<SshResult>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSsh {
    pub fn new() -> Arc<Self> {
        Arc::new(ScriptedSsh::default())
    }

    /// Queues the next result for the named vocabulary entry. Entries
    /// without a queued result answer with an empty successful output.
    pub fn script(&self, method: &'static str, result: SshResult) {
        self.responses
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(result);
    }

    /// Shorthand for a successful result with the given stdout.
    pub fn script_stdout(&self, method: &'static str, stdout: &str) {
        self.script(
            method,
            Ok(Output {
                stdout: stdout.to_string(),
                ..Default::default()
            }),
        );
    }

    /// The vocabulary entries invoked so far, in order. Entries with an
    /// argument are recorded as `name(argument)`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.split('(').next() == Some(method))
            .count()
    }

    fn take(&self, method: &'static str, recorded: String) -> SshResult {
        self.calls.lock().unwrap().push(recorded);
        self.responses
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Output::default()))
    }
}

#[async_trait::async_trait]
impl SshClient for ScriptedSsh {
    async fn get_hostname(&self) -> SshResult {
        self.take("get_hostname", "get_hostname".to_string())
    }

    async fn reboot(&self) -> SshResult {
        self.take("reboot", "reboot".to_string())
    }

    async fn untar_tgz(&self) -> SshResult {
        self.take("untar_tgz", "untar_tgz".to_string())
    }

    async fn get_running_install_image_processes(&self) -> SshResult {
        self.take(
            "get_running_install_image_processes",
            "get_running_install_image_processes".to_string(),
        )
    }

    async fn ensure_cloud_init(&self) -> SshResult {
        self.take("ensure_cloud_init", "ensure_cloud_init".to_string())
    }

    async fn create_nocloud_directory(&self) -> SshResult {
        self.take(
            "create_nocloud_directory",
            "create_nocloud_directory".to_string(),
        )
    }

    async fn cloud_init_status(&self) -> SshResult {
        self.take("cloud_init_status", "cloud_init_status".to_string())
    }

    async fn check_cloud_init_logs_for_sigterm(&self) -> SshResult {
        self.take(
            "check_cloud_init_logs_for_sigterm",
            "check_cloud_init_logs_for_sigterm".to_string(),
        )
    }

    async fn clean_cloud_init_logs(&self) -> SshResult {
        self.take("clean_cloud_init_logs", "clean_cloud_init_logs".to_string())
    }

    async fn clean_cloud_init_instances(&self) -> SshResult {
        self.take(
            "clean_cloud_init_instances",
            "clean_cloud_init_instances".to_string(),
        )
    }

    async fn reset_kubeadm(&self) -> SshResult {
        self.take("reset_kubeadm", "reset_kubeadm".to_string())
    }

    async fn hardware_ram(&self) -> SshResult {
        self.take("hardware_ram", "hardware_ram".to_string())
    }

    async fn hardware_nics(&self) -> SshResult {
        self.take("hardware_nics", "hardware_nics".to_string())
    }

    async fn hardware_storage(&self) -> SshResult {
        self.take("hardware_storage", "hardware_storage".to_string())
    }

    async fn cpu_arch(&self) -> SshResult {
        self.take("cpu_arch", "cpu_arch".to_string())
    }

    async fn cpu_model(&self) -> SshResult {
        self.take("cpu_model", "cpu_model".to_string())
    }

    async fn cpu_clock_ghz(&self) -> SshResult {
        self.take("cpu_clock_ghz", "cpu_clock_ghz".to_string())
    }

    async fn cpu_threads(&self) -> SshResult {
        self.take("cpu_threads", "cpu_threads".to_string())
    }

    async fn cpu_flags(&self) -> SshResult {
        self.take("cpu_flags", "cpu_flags".to_string())
    }

    async fn create_autosetup(&self, content: &str) -> SshResult {
        self.take("create_autosetup", format!("create_autosetup({content})"))
    }

    async fn create_post_install_script(&self, content: &str) -> SshResult {
        self.take(
            "create_post_install_script",
            format!("create_post_install_script({content})"),
        )
    }

    async fn execute_install_image(&self, has_post_install_script: bool) -> SshResult {
        self.take(
            "execute_install_image",
            format!("execute_install_image({has_post_install_script})"),
        )
    }

    async fn download_image(&self, path: &str, url: &str) -> SshResult {
        self.take("download_image", format!("download_image({path}, {url})"))
    }

    async fn detect_linux_on_another_disk(&self, expected_wwns: &[String]) -> SshResult {
        self.take(
            "detect_linux_on_another_disk",
            format!("detect_linux_on_another_disk({})", expected_wwns.join(",")),
        )
    }

    async fn create_meta_data(&self, hostname: &str) -> SshResult {
        self.take("create_meta_data", format!("create_meta_data({hostname})"))
    }

    async fn create_user_data(&self, content: &str) -> SshResult {
        self.take("create_user_data", format!("create_user_data({content})"))
    }
}

/// Hands the same scripted client to every caller while recording which
/// targets were requested.
pub struct ScriptedSshFactory {
    pub client: Arc<ScriptedSsh>,
    targets: Mutex<Vec<SshTarget>>,
}

impl ScriptedSshFactory {
    pub fn new(client: Arc<ScriptedSsh>) -> Self {
        ScriptedSshFactory {
            client,
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn targets(&self) -> Vec<SshTarget> {
        self.targets.lock().unwrap().clone()
    }
}

impl SshClientFactory for ScriptedSshFactory {
    fn client(&self, target: SshTarget) -> Arc<dyn SshClient> {
        self.targets.lock().unwrap().push(target);
        self.client.clone()
    }
}

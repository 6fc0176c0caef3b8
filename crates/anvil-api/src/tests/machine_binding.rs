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

use std::sync::{Arc, Mutex};

use anvil_model::hardware::{HardwareDetails, Nic};
use anvil_model::host::BareMetalHost;
use anvil_model::machine::{
    BareMetalMachine, CLUSTER_NAME_LABEL, ConditionType, FAILURE_REASON_MAINTENANCE_MODE,
    MachineAddressType,
};
use anvil_model::state::{ErrorType, ProvisioningState};

use crate::state_controller::machine::{
    BindOutcome, LoadBalancerApi, MachineBinder, MachineContext,
};
use crate::tests::common::{FIXTURE_HOSTNAME, at, test_host, test_machine};

fn bind_context() -> MachineContext {
    MachineContext {
        now: at(0),
        bootstrap_user_data: Some("#cloud-config\nhostname: bm-worker-0\n".to_string()),
    }
}

/// An unclaimed host in the pool.
fn available_host() -> BareMetalHost {
    let mut host = test_host(ProvisioningState::None);
    host.spec.consumer_ref = None;
    host.spec.install_image = None;
    host.spec.user_data = None;
    host.spec.ssh_spec = None;
    host
}

fn clustered_machine() -> BareMetalMachine {
    let mut machine = test_machine();
    machine
        .metadata
        .labels
        .insert(CLUSTER_NAME_LABEL.to_string(), "test-cluster".to_string());
    machine
}

#[derive(Default)]
struct RecordingLoadBalancer {
    removed: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl LoadBalancerApi for RecordingLoadBalancer {
    async fn remove_targets(
        &self,
        _machine: &BareMetalMachine,
        ips: &[String],
    ) -> Result<(), String> {
        self.removed.lock().unwrap().extend(ips.iter().cloned());
        Ok(())
    }
}

#[tokio::test]
async fn waits_until_bootstrap_data_exists() {
    let binder = MachineBinder::default();
    let mut machine = test_machine();
    let mut hosts = vec![available_host()];
    let ctx = MachineContext {
        now: at(0),
        bootstrap_user_data: None,
    };

    let outcome = binder.reconcile(&mut machine, &mut hosts, &ctx).await.unwrap();

    assert!(matches!(outcome, BindOutcome::Waiting { .. }));
    let condition = machine
        .status
        .condition(ConditionType::BootstrapReady)
        .unwrap();
    assert!(!condition.status);
    assert!(hosts[0].spec.consumer_ref.is_none());
}

#[tokio::test]
async fn claims_a_host_and_copies_the_provisioning_inputs() {
    let binder = MachineBinder::default();
    let mut machine = clustered_machine();
    let mut hosts = vec![available_host()];

    let outcome = binder
        .reconcile(&mut machine, &mut hosts, &bind_context())
        .await
        .unwrap();

    assert_eq!(outcome, BindOutcome::Progressed);
    assert_eq!(machine.host_annotation(), Some("default/host-0"));

    let host = &hosts[0];
    assert!(host.consumer_is(&machine));
    assert_eq!(host.spec.install_image, machine.spec.install_image);
    assert_eq!(host.spec.ssh_spec, machine.spec.ssh_spec);
    assert!(host.spec.user_data.as_deref().unwrap().starts_with("#cloud-config"));
    assert_eq!(
        host.metadata.labels.get(CLUSTER_NAME_LABEL).map(String::as_str),
        Some("test-cluster")
    );
    assert_eq!(host.metadata.owner_references.len(), 1);
    assert!(
        machine
            .status
            .condition(ConditionType::HostAssociated)
            .unwrap()
            .status
    );
}

#[tokio::test]
async fn no_available_host_surfaces_the_diagnostic() {
    let binder = MachineBinder::default();
    let mut machine = test_machine();
    let mut hosts = Vec::new();

    let outcome = binder
        .reconcile(&mut machine, &mut hosts, &bind_context())
        .await
        .unwrap();

    match outcome {
        BindOutcome::Waiting { reason } => {
            assert!(reason.starts_with("No available host of 0 found"))
        }
        other => panic!("expected waiting, got {other:?}"),
    }
    let condition = machine
        .status
        .condition(ConditionType::HostAssociated)
        .unwrap();
    assert!(!condition.status);
    assert_eq!(condition.reason, "NoAvailableHost");
}

/// A provisioned host makes the machine ready: provider ID in the
/// bare-metal shape plus one internal IP per NIC, hostname and internal
/// DNS.
#[tokio::test]
async fn provisioned_host_makes_the_machine_ready() {
    let binder = MachineBinder::default();
    let mut machine = test_machine();
    machine.set_host_annotation("default/host-0");
    let mut host = test_host(ProvisioningState::Provisioned);
    host.status.hardware_details = Some(HardwareDetails {
        nics: vec![
            Nic {
                name: "eth0".to_string(),
                ip: "192.0.2.10/26".to_string(),
                ..Default::default()
            },
            Nic {
                name: "eth1".to_string(),
                ..Default::default()
            },
        ],
        ..Default::default()
    });
    let mut hosts = vec![host];

    let outcome = binder
        .reconcile(&mut machine, &mut hosts, &bind_context())
        .await
        .unwrap();

    assert_eq!(outcome, BindOutcome::Ready);
    assert!(machine.status.ready);
    assert_eq!(machine.spec.provider_id.as_deref(), Some("hcloud://bm-321"));

    let rendered: Vec<(MachineAddressType, &str)> = machine
        .status
        .addresses
        .iter()
        .map(|address| (address.address_type, address.address.as_str()))
        .collect();
    assert_eq!(
        rendered,
        vec![
            (MachineAddressType::InternalIp, "192.0.2.10"),
            (MachineAddressType::Hostname, FIXTURE_HOSTNAME),
            (MachineAddressType::InternalDns, FIXTURE_HOSTNAME),
        ]
    );
}

#[tokio::test]
async fn maintenance_mode_is_a_fatal_machine_failure() {
    let binder = MachineBinder::default();
    let mut machine = test_machine();
    machine.set_host_annotation("default/host-0");
    let mut host = test_host(ProvisioningState::Provisioning);
    host.spec.maintenance_mode = true;
    let mut hosts = vec![host];

    let outcome = binder
        .reconcile(&mut machine, &mut hosts, &bind_context())
        .await
        .unwrap();

    assert_eq!(outcome, BindOutcome::Failed);
    assert_eq!(
        machine.status.failure_reason.as_deref(),
        Some(FAILURE_REASON_MAINTENANCE_MODE)
    );
    assert!(!machine.status.ready);
}

#[tokio::test]
async fn host_fatal_error_propagates_its_message() {
    let binder = MachineBinder::default();
    let mut machine = test_machine();
    machine.set_host_annotation("default/host-0");
    let mut host = test_host(ProvisioningState::Provisioning);
    host.set_error(at(0), ErrorType::FatalError, "mainboard gave up");
    let mut hosts = vec![host];

    let outcome = binder
        .reconcile(&mut machine, &mut hosts, &bind_context())
        .await
        .unwrap();

    assert_eq!(outcome, BindOutcome::Failed);
    assert_eq!(
        machine.status.failure_message.as_deref(),
        Some("mainboard gave up")
    );
}

#[tokio::test]
async fn deletion_releases_the_host_and_the_load_balancer_targets() {
    let load_balancer = Arc::new(RecordingLoadBalancer::default());
    let binder = MachineBinder::new(Some(load_balancer.clone()));
    let mut machine = test_machine();
    machine.set_host_annotation("default/host-0");
    machine.metadata.deletion_timestamp = Some(at(0));
    machine.status.ready = true;
    machine.status.addresses = vec![
        anvil_model::machine::MachineAddress {
            address_type: MachineAddressType::InternalIp,
            address: "192.0.2.10".to_string(),
        },
        anvil_model::machine::MachineAddress {
            address_type: MachineAddressType::Hostname,
            address: FIXTURE_HOSTNAME.to_string(),
        },
    ];
    let mut host = test_host(ProvisioningState::Provisioned);
    host.metadata.labels.insert(
        CLUSTER_NAME_LABEL.to_string(),
        "test-cluster".to_string(),
    );
    let mut hosts = vec![host];

    let outcome = binder
        .reconcile(&mut machine, &mut hosts, &bind_context())
        .await
        .unwrap();

    assert_eq!(outcome, BindOutcome::Released);
    assert_eq!(
        *load_balancer.removed.lock().unwrap(),
        vec!["192.0.2.10".to_string()]
    );

    let host = &hosts[0];
    assert!(host.spec.consumer_ref.is_none());
    assert!(host.spec.install_image.is_none());
    assert!(host.spec.user_data.is_none());
    assert!(host.spec.ssh_spec.is_none());
    assert!(host.metadata.labels.get(CLUSTER_NAME_LABEL).is_none());
    assert!(host.metadata.owner_references.is_empty());
    assert_eq!(machine.host_annotation(), None);
    assert!(!machine.status.ready);
}

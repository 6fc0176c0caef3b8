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

//! Binds logical machines to physical hosts and reflects host status back
//! onto the machine: association via the host annotation, failure
//! propagation, provider ID and addresses on readiness, and the release
//! handshake on deletion.

use std::sync::Arc;

use anvil_model::host::{BareMetalHost, ConsumerRef, MACHINE_API_GROUP, MACHINE_KIND};
use anvil_model::machine::{
    BareMetalMachine, CLUSTER_NAME_LABEL, ConditionType, FAILURE_REASON_MAINTENANCE_MODE,
    HOST_ANNOTATION, MachineAddress, MachineAddressType,
};
use anvil_model::metadata::OwnerReference;
use anvil_model::provider_id::provider_id_from_server_id;
use anvil_model::state::{ErrorType, ProvisioningState};
use chrono::{DateTime, Utc};

use crate::inventory::{self, ChoiceOutcome, SelectionError};

#[derive(thiserror::Error, Debug)]
pub enum BindError {
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("load balancer update failed: {0}")]
    LoadBalancer(String),
    #[error("chosen host {0} disappeared from the inventory")]
    HostMissing(String),
}

/// Removes a deleted machine's addresses from the control-plane load
/// balancer before its host is released. Only control-plane machines have
/// one; worker reconciliation runs without.
#[async_trait::async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn remove_targets(
        &self,
        machine: &BareMetalMachine,
        ips: &[String],
    ) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// Blocked on something external; the condition on the machine says
    /// what.
    Waiting { reason: String },
    /// Some state moved; reconcile again soon.
    Progressed,
    /// The machine is bound, provisioned and addressable.
    Ready,
    /// A fatal condition was propagated onto the machine.
    Failed,
    /// Deletion finished; the host (if any) was released.
    Released,
}

#[derive(Debug, Clone)]
pub struct MachineContext {
    pub now: DateTime<Utc>,
    /// Cloud-init user data from the bootstrap provider, once available.
    pub bootstrap_user_data: Option<String>,
}

#[derive(Default)]
pub struct MachineBinder {
    load_balancer: Option<Arc<dyn LoadBalancerApi>>,
}

impl MachineBinder {
    pub fn new(load_balancer: Option<Arc<dyn LoadBalancerApi>>) -> Self {
        MachineBinder { load_balancer }
    }

    pub async fn reconcile(
        &self,
        machine: &mut BareMetalMachine,
        hosts: &mut [BareMetalHost],
        ctx: &MachineContext,
    ) -> Result<BindOutcome, BindError> {
        if machine.metadata.is_marked_for_deletion() {
            return self.reconcile_deletion(machine, hosts).await;
        }

        let Some(user_data) = ctx.bootstrap_user_data.clone() else {
            machine.status.set_condition(
                ctx.now,
                ConditionType::BootstrapReady,
                false,
                "WaitingForBootstrapData",
                "bootstrap provider has not produced user data yet",
            );
            return Ok(BindOutcome::Waiting {
                reason: "bootstrap data not available".to_string(),
            });
        };
        machine.status.set_condition(
            ctx.now,
            ConditionType::BootstrapReady,
            true,
            "BootstrapDataAvailable",
            "",
        );

        if machine.host_annotation().is_none() {
            let chosen = match inventory::choose_host(machine, hosts)? {
                ChoiceOutcome::NoneAvailable { reason } => {
                    tracing::info!(
                        machine = %machine.metadata.name,
                        %reason,
                        "no host available for machine"
                    );
                    machine.status.set_condition(
                        ctx.now,
                        ConditionType::HostAssociated,
                        false,
                        "NoAvailableHost",
                        &reason,
                    );
                    return Ok(BindOutcome::Waiting { reason });
                }
                ChoiceOutcome::Host(host) => host.metadata.namespaced_name(),
            };
            let host = hosts
                .iter_mut()
                .find(|host| host.metadata.namespaced_name() == chosen)
                .ok_or_else(|| BindError::HostMissing(chosen.clone()))?;
            tracing::info!(
                machine = %machine.metadata.name,
                host = %chosen,
                "claiming host"
            );
            claim(machine, host, &user_data, ctx.now);
            machine.set_host_annotation(chosen);
            machine.status.set_condition(
                ctx.now,
                ConditionType::HostAssociated,
                true,
                "HostAssociated",
                "",
            );
            return Ok(BindOutcome::Progressed);
        }

        let annotation = match machine.host_annotation() {
            Some(annotation) => annotation.to_string(),
            // The claim branch above always returns; an absent annotation
            // here means another reconciliation is mid-claim.
            None => return Ok(BindOutcome::Progressed),
        };
        let Some(host) = hosts
            .iter_mut()
            .find(|host| host.metadata.namespaced_name() == annotation)
        else {
            machine.set_failure(
                "HostNotFound",
                format!("bound host {annotation} is gone from the inventory"),
            );
            return Ok(BindOutcome::Failed);
        };

        // A crash between claiming and annotating (or vice versa) heals
        // here: the claim is re-applied idempotently.
        if host.spec.consumer_ref.is_none() {
            claim(machine, host, &user_data, ctx.now);
        }

        if host.spec.maintenance_mode {
            machine.set_failure(
                FAILURE_REASON_MAINTENANCE_MODE,
                "host was moved into maintenance mode",
            );
            return Ok(BindOutcome::Failed);
        }
        if host.status.error_type == Some(ErrorType::FatalError) {
            machine.set_failure("FatalError", host.status.error_message.clone());
            return Ok(BindOutcome::Failed);
        }

        if host.status.provisioning_state == ProvisioningState::Provisioned {
            machine.spec.provider_id = Some(provider_id_from_server_id(host.server_id()));
            machine.status.addresses = node_addresses(machine, host);
            machine.status.ready = true;
            machine.status.last_updated = Some(ctx.now);
            return Ok(BindOutcome::Ready);
        }

        Ok(BindOutcome::Progressed)
    }

    async fn reconcile_deletion(
        &self,
        machine: &mut BareMetalMachine,
        hosts: &mut [BareMetalHost],
    ) -> Result<BindOutcome, BindError> {
        let Some(annotation) = machine.host_annotation().map(str::to_string) else {
            return Ok(BindOutcome::Released);
        };

        // The node's IPs must leave the control-plane load balancer before
        // the host is handed back, or traffic keeps hitting a dead member.
        if let Some(load_balancer) = &self.load_balancer {
            let ips: Vec<String> = machine
                .status
                .addresses
                .iter()
                .filter(|address| address.address_type == MachineAddressType::InternalIp)
                .map(|address| address.address.clone())
                .collect();
            if !ips.is_empty() {
                load_balancer
                    .remove_targets(machine, &ips)
                    .await
                    .map_err(BindError::LoadBalancer)?;
            }
        }

        if let Some(host) = hosts
            .iter_mut()
            .find(|host| host.metadata.namespaced_name() == annotation)
        {
            tracing::info!(
                machine = %machine.metadata.name,
                host = %annotation,
                "releasing host"
            );
            release(machine, host);
        }
        machine.metadata.annotations.remove(HOST_ANNOTATION);
        machine.status.ready = false;
        Ok(BindOutcome::Released)
    }
}

/// Copies the provisioning inputs onto the host and records the machine as
/// its single consumer.
fn claim(
    machine: &BareMetalMachine,
    host: &mut BareMetalHost,
    user_data: &str,
    now: DateTime<Utc>,
) {
    host.spec.consumer_ref = Some(ConsumerRef::for_machine(machine));
    host.spec.install_image = machine.spec.install_image.clone();
    host.spec.ssh_spec = machine.spec.ssh_spec.clone();
    host.spec.user_data = Some(user_data.to_string());
    if let Some(cluster) = machine.cluster_name() {
        host.metadata
            .labels
            .insert(CLUSTER_NAME_LABEL.to_string(), cluster.to_string());
    }
    host.metadata.add_owner(owner_reference(machine));
    host.mark_updated(now);
}

/// Undoes [`claim`]: the host keeps nothing of the machine that used it.
fn release(machine: &BareMetalMachine, host: &mut BareMetalHost) {
    host.spec.consumer_ref = None;
    host.spec.install_image = None;
    host.spec.user_data = None;
    host.spec.ssh_spec = None;
    host.status.ssh_status = Default::default();
    host.metadata.remove_owner(&owner_reference(machine));
    host.metadata.labels.remove(CLUSTER_NAME_LABEL);
}

fn owner_reference(machine: &BareMetalMachine) -> OwnerReference {
    OwnerReference {
        api_group: MACHINE_API_GROUP.to_string(),
        kind: MACHINE_KIND.to_string(),
        name: machine.metadata.name.clone(),
    }
}

/// The node addresses reported for a provisioned machine: one internal IP
/// per NIC, the hostname, and the hostname again as internal DNS.
fn node_addresses(machine: &BareMetalMachine, host: &BareMetalHost) -> Vec<MachineAddress> {
    let mut addresses = Vec::new();
    if let Some(details) = &host.status.hardware_details {
        for nic in &details.nics {
            if nic.ip.is_empty() {
                continue;
            }
            // NIC probes report CIDR notation; the node address is bare.
            let ip = nic.ip.split('/').next().unwrap_or(&nic.ip);
            addresses.push(MachineAddress {
                address_type: MachineAddressType::InternalIp,
                address: ip.to_string(),
            });
        }
    }
    addresses.push(MachineAddress {
        address_type: MachineAddressType::Hostname,
        address: machine.metadata.name.clone(),
    });
    addresses.push(MachineAddress {
        address_type: MachineAddressType::InternalDns,
        address: machine.metadata.name.clone(),
    });
    addresses
}

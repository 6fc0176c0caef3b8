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

//! Host selection: which physical server a pending machine may claim.
//!
//! Hosts are filtered through an ordered predicate chain; among the
//! survivors a host that already consumes the machine wins (re-selection
//! after a crash is idempotent), otherwise one is picked uniformly at
//! random from a cryptographically strong source.

use std::fmt;

use anvil_model::host::BareMetalHost;
use anvil_model::machine::BareMetalMachine;
use anvil_model::selector::SelectorError;
use anvil_model::state::ProvisioningState;
use rand::TryRngCore;
use rand::rngs::OsRng;

#[derive(thiserror::Error, Debug)]
pub enum SelectionError {
    #[error("host selector is invalid: {0}")]
    Selector(#[from] SelectorError),
    #[error("no entropy available for host selection: {0}")]
    Entropy(String),
}

#[derive(Debug, PartialEq)]
pub enum ChoiceOutcome<'a> {
    Host(&'a BareMetalHost),
    /// No host survived the filters; `reason` names the first failing
    /// predicate and how many hosts it rejected, for the diagnostic the
    /// caller surfaces.
    NoneAvailable { reason: String },
}

/// The filter predicates, in evaluation order. The `Display` strings end
/// up verbatim in the user-facing diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectReason {
    OtherNamespace,
    AlreadyConsumed,
    MaintenanceMode,
    MarkedForDeletion,
    ErrorMessageSet,
    NotAvailable,
    SelectorMismatch,
    NotEnoughRaidWwns,
    NoSingleWwn,
}

const PREDICATE_ORDER: [RejectReason; 9] = [
    RejectReason::OtherNamespace,
    RejectReason::AlreadyConsumed,
    RejectReason::MaintenanceMode,
    RejectReason::MarkedForDeletion,
    RejectReason::ErrorMessageSet,
    RejectReason::NotAvailable,
    RejectReason::SelectorMismatch,
    RejectReason::NotEnoughRaidWwns,
    RejectReason::NoSingleWwn,
];

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RejectReason::OtherNamespace => "host-in-other-namespace",
            RejectReason::AlreadyConsumed => "host-already-consumed",
            RejectReason::MaintenanceMode => "maintenance-mode-set",
            RejectReason::MarkedForDeletion => "host-marked-for-deletion",
            RejectReason::ErrorMessageSet => "error-message-set",
            RejectReason::NotAvailable => "host-not-available",
            RejectReason::SelectorMismatch => "label-selector-does-not-match",
            RejectReason::NotEnoughRaidWwns => {
                "machine-should-use-swraid-but-not-enough-RAID-WWNs-in-hbmh"
            }
            RejectReason::NoSingleWwn => {
                "machine-should-not-use-swraid-but-no-single-WWN-in-hbmh"
            }
        };
        f.write_str(label)
    }
}

/// Picks a host for the machine, or explains why none qualified.
pub fn choose_host<'a>(
    machine: &BareMetalMachine,
    hosts: &'a [BareMetalHost],
) -> Result<ChoiceOutcome<'a>, SelectionError> {
    let mut rejections: Vec<(RejectReason, usize)> =
        PREDICATE_ORDER.iter().map(|reason| (*reason, 0)).collect();
    let mut survivors: Vec<&BareMetalHost> = Vec::new();

    for host in hosts {
        match first_rejection(machine, host)? {
            Some(reason) => {
                let slot = rejections
                    .iter_mut()
                    .find(|(candidate, _)| *candidate == reason)
                    .expect("every reason is in the predicate order");
                slot.1 += 1;
            }
            None => survivors.push(host),
        }
    }

    // A host that already consumes this machine wins outright, so that a
    // crashed reconciliation re-selects the same host.
    if let Some(host) = survivors.iter().find(|host| host.consumer_is(machine)) {
        return Ok(ChoiceOutcome::Host(host));
    }

    if survivors.is_empty() {
        let (reason, count) = rejections
            .into_iter()
            .find(|(_, count)| *count > 0)
            .map(|(reason, count)| (reason.to_string(), count))
            .unwrap_or_else(|| ("no-hosts-in-inventory".to_string(), 0));
        return Ok(ChoiceOutcome::NoneAvailable {
            reason: format!("No available host of {} found: {reason}: {count}", hosts.len()),
        });
    }

    let index = random_index(survivors.len())?;
    Ok(ChoiceOutcome::Host(survivors[index]))
}

fn first_rejection(
    machine: &BareMetalMachine,
    host: &BareMetalHost,
) -> Result<Option<RejectReason>, SelectorError> {
    if host.metadata.namespace != machine.metadata.namespace {
        return Ok(Some(RejectReason::OtherNamespace));
    }
    if let Some(consumer) = &host.spec.consumer_ref
        && !consumer.references(machine)
    {
        return Ok(Some(RejectReason::AlreadyConsumed));
    }
    if host.spec.maintenance_mode {
        return Ok(Some(RejectReason::MaintenanceMode));
    }
    if host.metadata.is_marked_for_deletion() {
        return Ok(Some(RejectReason::MarkedForDeletion));
    }
    if !host.status.error_message.is_empty() {
        return Ok(Some(RejectReason::ErrorMessageSet));
    }
    if host.status.provisioning_state != ProvisioningState::None {
        return Ok(Some(RejectReason::NotAvailable));
    }
    if !machine.spec.host_selector.matches(&host.metadata.labels)? {
        return Ok(Some(RejectReason::SelectorMismatch));
    }
    let swraid = machine.wants_swraid();
    let supports = host
        .spec
        .root_device_hints
        .as_ref()
        .is_some_and(|hints| hints.supports_swraid(swraid));
    if !supports {
        return Ok(Some(if swraid {
            RejectReason::NotEnoughRaidWwns
        } else {
            RejectReason::NoSingleWwn
        }));
    }
    Ok(None)
}

fn random_index(len: usize) -> Result<usize, SelectionError> {
    let value = OsRng
        .try_next_u64()
        .map_err(|err| SelectionError::Entropy(err.to_string()))?;
    Ok((value % len as u64) as usize)
}

#[cfg(test)]
mod tests {
    use anvil_model::host::{
        ConsumerRef, HostSpec, InstallImage, RaidHints, RootDeviceHints,
    };
    use anvil_model::metadata::ObjectMeta;
    use anvil_model::selector::{HostSelector, SelectorRequirement};

    use super::*;

    fn available_host(name: &str) -> BareMetalHost {
        BareMetalHost {
            metadata: ObjectMeta::new("default", name),
            spec: HostSpec {
                root_device_hints: Some(RootDeviceHints {
                    wwn: Some("0xw1".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn machine() -> BareMetalMachine {
        BareMetalMachine {
            metadata: ObjectMeta::new("default", "machine-0"),
            ..Default::default()
        }
    }

    /// The healthy host wins over one in maintenance and one with an
    /// error message.
    #[test]
    fn selects_the_available_host() {
        let a = available_host("host-a");
        let mut b = available_host("host-b");
        b.spec.maintenance_mode = true;
        let mut c = available_host("host-c");
        c.status.error_message = "foo".to_string();

        let hosts = vec![a, b, c];
        match choose_host(&machine(), &hosts).unwrap() {
            ChoiceOutcome::Host(host) => assert_eq!(host.metadata.name, "host-a"),
            other => panic!("expected host-a, got {other:?}"),
        }
    }

    /// A machine requesting software raid cannot claim a host hinted for a
    /// plain single-disk install.
    #[test]
    fn raid_mismatch_yields_the_spelled_out_reason() {
        let host = available_host("host-a");
        let mut machine = machine();
        machine.spec.install_image = Some(InstallImage {
            swraid: true,
            ..Default::default()
        });

        let hosts = vec![host];
        match choose_host(&machine, &hosts).unwrap() {
            ChoiceOutcome::NoneAvailable { reason } => assert_eq!(
                reason,
                "No available host of 1 found: \
                 machine-should-use-swraid-but-not-enough-RAID-WWNs-in-hbmh: 1"
            ),
            other => panic!("expected no host, got {other:?}"),
        }
    }

    #[test]
    fn raid_machine_takes_raid_capable_host() {
        let mut host = available_host("host-a");
        host.spec.root_device_hints = Some(RootDeviceHints {
            wwn: None,
            raid: RaidHints {
                active: true,
                wwns: vec!["0xw1".to_string(), "0xw2".to_string()],
            },
        });
        let mut machine = machine();
        machine.spec.install_image = Some(InstallImage {
            swraid: true,
            ..Default::default()
        });

        let hosts = vec![host];
        assert!(matches!(
            choose_host(&machine, &hosts).unwrap(),
            ChoiceOutcome::Host(_)
        ));
    }

    /// Re-selection with unchanged inputs returns the host that already
    /// consumes the machine, every time.
    #[test]
    fn reselection_is_idempotent() {
        let machine = machine();
        let mut consumed = available_host("host-consumed");
        consumed.spec.consumer_ref = Some(ConsumerRef::for_machine(&machine));
        let hosts = vec![
            available_host("host-a"),
            consumed,
            available_host("host-b"),
        ];

        for _ in 0..16 {
            match choose_host(&machine, &hosts).unwrap() {
                ChoiceOutcome::Host(host) => {
                    assert_eq!(host.metadata.name, "host-consumed")
                }
                other => panic!("expected host-consumed, got {other:?}"),
            }
        }
    }

    #[test]
    fn hosts_outside_the_namespace_are_rejected() {
        let mut host = available_host("host-a");
        host.metadata.namespace = "other".to_string();

        let hosts = vec![host];
        match choose_host(&machine(), &hosts).unwrap() {
            ChoiceOutcome::NoneAvailable { reason } => assert_eq!(
                reason,
                "No available host of 1 found: host-in-other-namespace: 1"
            ),
            other => panic!("expected no host, got {other:?}"),
        }
    }

    #[test]
    fn label_selector_narrows_the_pool() {
        let mut labeled = available_host("host-gpu");
        labeled
            .metadata
            .labels
            .insert("gpu".to_string(), "a100".to_string());
        let plain = available_host("host-plain");

        let mut machine = machine();
        machine.spec.host_selector = HostSelector {
            match_expressions: vec![SelectorRequirement {
                key: "gpu".to_string(),
                operator: "exists".to_string(),
                values: vec![],
            }],
            ..Default::default()
        };

        let hosts = vec![plain, labeled];
        match choose_host(&machine, &hosts).unwrap() {
            ChoiceOutcome::Host(host) => assert_eq!(host.metadata.name, "host-gpu"),
            other => panic!("expected host-gpu, got {other:?}"),
        }
    }

    #[test]
    fn busy_hosts_are_rejected() {
        let mut host = available_host("host-a");
        host.status.provisioning_state = ProvisioningState::Provisioned;

        let hosts = vec![host];
        match choose_host(&machine(), &hosts).unwrap() {
            ChoiceOutcome::NoneAvailable { reason } => {
                assert_eq!(reason, "No available host of 1 found: host-not-available: 1")
            }
            other => panic!("expected no host, got {other:?}"),
        }
    }
}

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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object identity and bookkeeping shared by hosts and machines.
///
/// This mirrors the subset of the surrounding orchestration framework's
/// object metadata that the provisioning core acts upon. The framework
/// owns persistence of these fields; the core only reads and mutates its
/// local copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// Set once deletion of the object has been requested. Objects with a
    /// deletion timestamp are never selected for new work.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectMeta {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// `namespace/name`, the form stored in cross-object annotations.
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A reference from an owned object back to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

impl ObjectMeta {
    pub fn has_owner(&self, reference: &OwnerReference) -> bool {
        self.owner_references.iter().any(|r| r == reference)
    }

    /// Adds the owner reference unless an identical one is present.
    pub fn add_owner(&mut self, reference: OwnerReference) {
        if !self.has_owner(&reference) {
            self.owner_references.push(reference);
        }
    }

    pub fn remove_owner(&mut self, reference: &OwnerReference) {
        self.owner_references.retain(|r| r != reference);
    }
}

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

use serde::{Deserialize, Serialize};

/// Label requirements a machine places on the hosts it may claim.
///
/// Equality terms and set-valued expressions are both supported; a host
/// matches when every term holds against its labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRequirement {
    pub key: String,
    /// Stored as written by the operator; compared case-insensitively.
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SelectorError {
    #[error("unknown selector operator {0:?}")]
    UnknownOperator(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    In,
    NotIn,
    Exists,
}

impl Operator {
    /// Operators are lowercased before comparison so that `In`, `in` and
    /// `IN` all select the same behavior.
    fn parse(operator: &str) -> Result<Operator, SelectorError> {
        match operator.to_lowercase().as_str() {
            "in" => Ok(Operator::In),
            "notin" => Ok(Operator::NotIn),
            "exists" => Ok(Operator::Exists),
            other => Err(SelectorError::UnknownOperator(other.to_string())),
        }
    }
}

impl HostSelector {
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Whether the given label set satisfies every term of the selector.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, SelectorError> {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
        for requirement in &self.match_expressions {
            if !requirement.matches(labels)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl SelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, SelectorError> {
        let value = labels.get(&self.key);
        Ok(match Operator::parse(&self.operator)? {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => !value.is_some_and(|v| self.values.contains(v)),
            Operator::Exists => value.is_some(),
        })
    }
}

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

use std::time::Duration;

use anvil_model::state::ErrorType;
use anvil_robot::RobotError;
use anvil_ssh::SshError;

use crate::inspect::InspectError;

/// What one state-machine action decided.
///
/// Actions never block on long sleeps; anything that has to wait returns
/// `Continue` and lets the reconciler own the requeue. Transient failures
/// travel as `Err(ActionError)` instead and are retried with backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The work of the current provisioning state is done; advance.
    Complete,
    /// Check again after the given delay.
    Continue { after: Duration },
    /// Permanent failure. Recorded on the host status; the state machine
    /// stops until an operator intervenes.
    Failed {
        error_type: ErrorType,
        reason: String,
    },
}

impl ActionOutcome {
    pub fn wait(after: Duration) -> Self {
        ActionOutcome::Continue { after }
    }

    pub fn wait_secs(secs: u64) -> Self {
        ActionOutcome::Continue {
            after: Duration::from_secs(secs),
        }
    }

    pub fn failed(error_type: ErrorType, reason: impl Into<String>) -> Self {
        ActionOutcome::Failed {
            error_type,
            reason: reason.into(),
        }
    }
}

/// A transient failure inside an action. The reconciler entry point
/// records it on the host and requeues with backoff; rate-limit errors
/// additionally trigger a global backoff.
#[derive(thiserror::Error, Debug)]
pub enum ActionError {
    #[error("robot API call failed: {0}")]
    Robot(#[from] RobotError),
    #[error("ssh call failed: {0}")]
    Ssh(#[from] SshError),
    #[error("hardware inspection failed: {0}")]
    Inspection(#[from] InspectError),
    #[error("{0}")]
    Provisioning(String),
}

impl ActionError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ActionError::Robot(err) if err.is_rate_limit())
    }
}

pub type ActionResult = Result<ActionOutcome, ActionError>;

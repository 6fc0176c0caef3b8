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

//! The vendor's out-of-band management API ("Robot"): server inventory,
//! reboots, ssh key registration and rescue-boot activation. The state
//! controller only ever talks to the [`RobotApi`] trait so tests can
//! substitute a fake; [`client::RobotClient`] is the production
//! implementation against the HTTP webservice.

mod api;
pub mod client;
mod error;
mod models;

pub use api::RobotApi;
pub use error::RobotError;
pub use models::{RebootMode, Rescue, Server, SshKey};

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

//! The anvil provisioning core: the per-host state machine that takes an
//! unprovisioned vendor-hosted server through rescue boot, hardware
//! inspection, image install and cloud-init personalization, plus the
//! inventory selection and machine binding around it.

pub mod config;
pub mod inspect;
pub mod inventory;
pub mod logging;
pub mod secrets;
pub mod state_controller;

#[cfg(test)]
mod tests;

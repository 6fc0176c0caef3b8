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

use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Quiets dependencies that log aggressively at their default levels.
pub fn dep_log_filter(env_filter: EnvFilter) -> EnvFilter {
    ["hyper=error", "rustls=warn", "reqwest=warn", "russh=warn"]
        .iter()
        .fold(env_filter, |filter, directive| {
            filter.add_directive(
                directive
                    .parse()
                    .unwrap_or_else(|err| panic!("{directive} must parse; error: {err}")),
            )
        })
}

/// Initializes the process-wide subscriber. `debug` counts `-d` flags:
/// 0 = info, 1 = debug, 2+ = trace. `RUST_LOG` overrides everything.
pub fn setup_logging(debug: u8) -> eyre::Result<()> {
    let level = match debug {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(dep_log_filter(env_filter))
        .try_init()
        .map_err(|err| eyre::eyre!("failed to initialize logging: {err}"))?;
    Ok(())
}

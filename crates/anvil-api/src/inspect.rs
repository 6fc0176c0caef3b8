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

//! Hardware inspection over the rescue-system ssh channel.
//!
//! Every probe is validated strictly: any output on stderr fails the
//! inspection, numeric fields arrive as strings and must parse, and the
//! `rota` flag must be exactly `"0"` or `"1"`. Device names are parsed but
//! never persisted; [`current_storage`] re-resolves them fresh for the
//! installer.

use anvil_model::hardware::{Cpu, HardwareDetails, Nic, StorageDevice};
use anvil_ssh::{Output, SshClient, SshError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum InspectError {
    #[error("ssh probe failed: {0}")]
    Ssh(#[from] SshError),
    #[error("probe {command} wrote to stderr: {stderr}")]
    Stderr {
        command: &'static str,
        stderr: String,
    },
    #[error("probe {command} returned empty output")]
    Empty { command: &'static str },
    #[error("failed to parse {what}: {detail}")]
    Parse {
        what: &'static str,
        detail: String,
    },
}

/// A storage device together with its current (unstable) kernel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedStorageDevice {
    pub name: String,
    pub device: StorageDevice,
}

/// Runs the full probe set and assembles the persistent hardware record.
pub async fn inspect_hardware(client: &dyn SshClient) -> Result<HardwareDetails, InspectError> {
    let ram_mib = parse_ram(&checked("ram", client.hardware_ram().await?)?)?;
    let nics = parse_nics(&checked("nics", client.hardware_nics().await?)?)?;
    let storage = current_storage(client)
        .await?
        .into_iter()
        .map(|named| named.device)
        .collect();
    let cpu = inspect_cpu(client).await?;

    Ok(HardwareDetails {
        ram_mib,
        nics,
        storage,
        cpu,
    })
}

/// Lists the block devices as the kernel sees them right now. Callers that
/// feed the installer use the names; everyone else drops them.
pub async fn current_storage(
    client: &dyn SshClient,
) -> Result<Vec<NamedStorageDevice>, InspectError> {
    parse_storage(&checked("storage", client.hardware_storage().await?)?)
}

async fn inspect_cpu(client: &dyn SshClient) -> Result<Cpu, InspectError> {
    let arch = non_empty("cpu_arch", checked("cpu_arch", client.cpu_arch().await?)?)?;
    let model = non_empty("cpu_model", checked("cpu_model", client.cpu_model().await?)?)?;
    let clock_text = non_empty(
        "cpu_clock_ghz",
        checked("cpu_clock_ghz", client.cpu_clock_ghz().await?)?,
    )?;
    let clock_ghz = clock_text.parse::<f64>().map_err(|err| InspectError::Parse {
        what: "cpu clock",
        detail: format!("{clock_text:?}: {err}"),
    })?;
    let threads_text = non_empty(
        "cpu_threads",
        checked("cpu_threads", client.cpu_threads().await?)?,
    )?;
    let threads = threads_text
        .parse::<u32>()
        .map_err(|err| InspectError::Parse {
            what: "cpu threads",
            detail: format!("{threads_text:?}: {err}"),
        })?;
    let flags_text = non_empty("cpu_flags", checked("cpu_flags", client.cpu_flags().await?)?)?;
    let flags = flags_text.split_whitespace().map(str::to_string).collect();

    Ok(Cpu {
        arch,
        model,
        clock_ghz,
        threads,
        flags,
    })
}

/// Any stderr output fails the sub-call.
fn checked(command: &'static str, output: Output) -> Result<String, InspectError> {
    if !output.stderr.trim().is_empty() {
        return Err(InspectError::Stderr {
            command,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

fn non_empty(command: &'static str, stdout: String) -> Result<String, InspectError> {
    let trimmed = stdout.trim().to_string();
    if trimmed.is_empty() {
        return Err(InspectError::Empty { command });
    }
    Ok(trimmed)
}

fn parse_ram(stdout: &str) -> Result<u64, InspectError> {
    let kib = stdout
        .trim()
        .parse::<u64>()
        .map_err(|err| InspectError::Parse {
            what: "ram",
            detail: format!("{:?}: {err}", stdout.trim()),
        })?;
    Ok(kib / 1024)
}

#[derive(Debug, Deserialize)]
struct NicLine {
    name: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    mac: String,
    #[serde(default)]
    ip: String,
    #[serde(rename = "speedMbps", default)]
    speed_mbps: String,
}

fn parse_nics(stdout: &str) -> Result<Vec<Nic>, InspectError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let parsed: NicLine =
                serde_json::from_str(line).map_err(|err| InspectError::Parse {
                    what: "nic",
                    detail: format!("{line:?}: {err}"),
                })?;
            // An unplugged interface reports a negative speed; clamp
            // instead of failing the whole inspection.
            let speed_mbps = parsed
                .speed_mbps
                .parse::<i64>()
                .map_err(|err| InspectError::Parse {
                    what: "nic speed",
                    detail: format!("{:?}: {err}", parsed.speed_mbps),
                })?
                .max(0) as u32;
            Ok(Nic {
                name: parsed.name,
                model: parsed.model,
                mac: parsed.mac,
                ip: parsed.ip,
                speed_mbps,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct StorageLine {
    name: String,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    wwn: String,
    #[serde(default)]
    vendor: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    serial: String,
    #[serde(default)]
    hctl: String,
    #[serde(default)]
    rota: String,
}

fn parse_storage(stdout: &str) -> Result<Vec<NamedStorageDevice>, InspectError> {
    let mut devices = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let value = pairs_to_json(line);
        let parsed: StorageLine =
            serde_json::from_value(value).map_err(|err| InspectError::Parse {
                what: "storage",
                detail: format!("{line:?}: {err}"),
            })?;
        if parsed.device_type != "disk" {
            continue;
        }
        let rotational = match parsed.rota.as_str() {
            "0" => false,
            "1" => true,
            other => {
                return Err(InspectError::Parse {
                    what: "storage rota",
                    detail: format!("expected \"0\" or \"1\", got {other:?}"),
                });
            }
        };
        let size_bytes = parsed.size.parse::<u64>().map_err(|err| InspectError::Parse {
            what: "storage size",
            detail: format!("{:?}: {err}", parsed.size),
        })?;
        devices.push(NamedStorageDevice {
            name: parsed.name,
            device: StorageDevice {
                wwn: parsed.wwn,
                size_bytes,
                size_gb: size_bytes / 1_000_000_000,
                rotational,
                vendor: parsed.vendor.trim().to_string(),
                model: parsed.model.trim().to_string(),
                serial: parsed.serial,
                hctl: parsed.hctl,
            },
        });
    }
    Ok(devices)
}

lazy_static! {
    static ref PAIR_RE: Regex = Regex::new(r#"(\w+)="([^"]*)""#).unwrap();
}

/// Converts one `KEY="VALUE"` pair line (as `lsblk -P` emits) into a JSON
/// object with lowercased keys and string values.
fn pairs_to_json(line: &str) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = PAIR_RE
        .captures_iter(line)
        .map(|captures| {
            (
                captures[1].to_lowercase(),
                serde_json::Value::String(captures[2].to_string()),
            )
        })
        .collect();
    serde_json::Value::Object(map)
}

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

use anvil_model::host::InstallImage;

/// Renders the autosetup description the vendor's installer consumes.
///
/// `device_names` must be freshly resolved from the running rescue system;
/// names from an earlier boot may point at different disks.
pub fn render(
    hostname: &str,
    device_names: &[String],
    image_path: &str,
    install_image: &InstallImage,
) -> String {
    let mut lines = Vec::new();
    for (index, device) in device_names.iter().enumerate() {
        lines.push(format!("DRIVE{} /dev/{device}", index + 1));
    }
    if install_image.swraid {
        lines.push("SWRAID 1".to_string());
        lines.push(format!(
            "SWRAIDLEVEL {}",
            install_image.swraid_level.unwrap_or(1)
        ));
    } else {
        lines.push("SWRAID 0".to_string());
    }
    lines.push(format!("HOSTNAME {hostname}"));
    if install_image.partitions.is_empty() {
        lines.push("PART / ext4 all".to_string());
    }
    for partition in &install_image.partitions {
        lines.push(format!(
            "PART {} {} {}",
            partition.mount, partition.file_system, partition.size
        ));
    }
    for volume in &install_image.logical_volumes {
        lines.push(format!(
            "LV {} {} {} {} {}",
            volume.vg, volume.name, volume.mount, volume.file_system, volume.size
        ));
    }
    lines.push(format!("IMAGE {image_path}"));
    lines.join("\n")
}

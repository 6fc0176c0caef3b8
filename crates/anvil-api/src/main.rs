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

use std::path::PathBuf;
use std::sync::Arc;

use anvil::config::Settings;
use anvil::logging;
use anvil::secrets::FileCredentialsSource;
use anvil::state_controller::controller::{HostReconciler, IterationConfig, MachineReconciler};
use anvil::state_controller::host::HostStateHandler;
use anvil::state_controller::io::InMemoryStore;
use anvil::state_controller::machine::MachineBinder;
use anvil_ssh::executor::RemoteExecutorFactory;
use clap::Parser;
use eyre::WrapErr;
use anvil_robot::client::RobotClient;

#[derive(Parser, Debug)]
#[command(name = "anvil-api", about = "Bare-metal provisioning controller")]
struct Args {
    /// Path to the TOML configuration and inventory file.
    #[arg(long, env = "ANVIL_CONFIG", default_value = "anvil.toml")]
    config: PathBuf,

    /// Increase log verbosity (-d: debug, -dd: trace).
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count)]
    debug: u8,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    logging::setup_logging(args.debug)?;

    let settings = Settings::load(&args.config)
        .wrap_err_with(|| format!("loading configuration from {}", args.config.display()))?;
    let iteration: IterationConfig = (&settings.controller).into();

    let robot = Arc::new(
        RobotClient::new(
            &settings.robot.base_url,
            &settings.robot.username,
            &settings.robot.password,
        )
        .wrap_err("building robot client")?,
    );
    let ssh = Arc::new(RemoteExecutorFactory::default());
    let credentials = Arc::new(FileCredentialsSource::new(&settings.secrets_dir));

    let host_store: Arc<InMemoryStore<anvil_model::host::BareMetalHost>> =
        Arc::new(InMemoryStore::new());
    for seed in settings.hosts {
        let host = seed.into_host();
        tracing::info!(
            host = %host.metadata.name,
            server_id = %host.spec.server_id,
            "loaded host into inventory"
        );
        host_store.insert(host.metadata.namespaced_name(), host);
    }
    let machine_store: Arc<InMemoryStore<anvil_model::machine::BareMetalMachine>> =
        Arc::new(InMemoryStore::new());
    for seed in settings.machines {
        let machine = seed.into_machine();
        tracing::info!(machine = %machine.metadata.name, "loaded machine");
        machine_store.insert(machine.metadata.namespaced_name(), machine);
    }

    let host_reconciler = HostReconciler::new(
        HostStateHandler::new(robot, ssh),
        host_store.clone(),
        credentials.clone(),
        settings.rescue_key_secret,
        iteration,
    );
    let machine_reconciler = MachineReconciler::new(
        MachineBinder::new(None),
        machine_store,
        host_store,
        credentials,
        iteration,
    );

    tracing::info!("anvil-api starting reconciliation loops");
    tokio::try_join!(host_reconciler.run(), machine_reconciler.run())?;
    Ok(())
}

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

//! The reconciler entry points: load an object copy, run its handler,
//! persist once at the end. A version conflict turns into an immediate
//! requeue; rate limits back off globally; every other transient error is
//! recorded on the object and retried with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use anvil_model::credentials::SshCredentials;
use anvil_model::host::{BareMetalHost, ConsumerRef};
use anvil_model::state::ErrorType;
use chrono::Utc;

use crate::state_controller::host::{HostContext, HostStateHandler};
use crate::state_controller::io::{
    CredentialsSource, HostStore, MachineStore, StoreError, Versioned,
};
use crate::state_controller::machine::{BindOutcome, MachineBinder, MachineContext};
use crate::state_controller::outcome::ActionOutcome;

/// General settings for controller iterations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IterationConfig {
    /// Pause between full passes over the inventory. Lower values react
    /// faster to state changes but increase vendor API load.
    pub iteration_time: Duration,

    /// Upper bound for the per-object error backoff, also used as the
    /// global backoff when the vendor rate-limits us.
    pub error_requeue_max: Duration,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            iteration_time: Duration::from_secs(30),
            error_requeue_max: Duration::from_secs(5 * 60),
        }
    }
}

/// Exponential backoff from the object's consecutive error count.
pub fn error_backoff(error_count: u32, max: Duration) -> Duration {
    let doublings = error_count.saturating_sub(1).min(6);
    Duration::from_secs(5u64 << doublings).min(max)
}

pub struct HostReconciler {
    handler: HostStateHandler,
    store: Arc<dyn HostStore>,
    credentials: Arc<dyn CredentialsSource>,
    /// Name of the secret holding the process-wide rescue key pair.
    rescue_secret: String,
    config: IterationConfig,
}

impl HostReconciler {
    pub fn new(
        handler: HostStateHandler,
        store: Arc<dyn HostStore>,
        credentials: Arc<dyn CredentialsSource>,
        rescue_secret: impl Into<String>,
        config: IterationConfig,
    ) -> Self {
        HostReconciler {
            handler,
            store,
            credentials,
            rescue_secret: rescue_secret.into(),
            config,
        }
    }

    /// One reconciliation tick for one host. Returns the suggested
    /// requeue delay.
    pub async fn reconcile_one(&self, key: &str) -> Result<Duration, StoreError> {
        let mut copy = self.store.load(key).await?;
        let ctx = self.resolve_context(&copy.object).await?;
        let requeue = self.run_handler(&mut copy.object, &ctx).await;

        match self.store.persist(key, copy).await {
            Ok(()) => Ok(requeue),
            Err(StoreError::Conflict(key)) => {
                tracing::debug!(%key, "conflict on persist, requeueing immediately");
                Ok(Duration::ZERO)
            }
            Err(err) => Err(err),
        }
    }

    async fn resolve_context(&self, host: &BareMetalHost) -> Result<HostContext, StoreError> {
        let hostname = host
            .spec
            .consumer_ref
            .as_ref()
            .map(|consumer| consumer.name.clone())
            .unwrap_or_else(|| host.metadata.name.clone());
        let rescue_credentials = self
            .credentials
            .ssh_credentials(&self.rescue_secret)
            .await?;
        let os_credentials = match host.spec.ssh_spec.as_ref() {
            Some(spec) => self.credentials.ssh_credentials(&spec.secret_name).await?,
            None => SshCredentials::default(),
        };
        Ok(HostContext {
            now: Utc::now(),
            hostname,
            rescue_credentials,
            os_credentials,
        })
    }

    async fn run_handler(&self, host: &mut BareMetalHost, ctx: &HostContext) -> Duration {
        match self.handler.handle(host, ctx).await {
            Ok(ActionOutcome::Complete) => Duration::ZERO,
            Ok(ActionOutcome::Continue { after }) => after,
            Ok(ActionOutcome::Failed { .. }) => self.config.iteration_time,
            Err(err) if err.is_rate_limit() => {
                tracing::warn!(
                    host = %host.metadata.name,
                    error = %err,
                    "vendor is rate limiting, backing off"
                );
                host.set_error(ctx.now, ErrorType::Provisioning, err.to_string());
                self.config.error_requeue_max
            }
            Err(err) => {
                tracing::warn!(
                    host = %host.metadata.name,
                    error = %err,
                    "transient reconciliation error"
                );
                host.set_error(ctx.now, ErrorType::Provisioning, err.to_string());
                error_backoff(host.status.error_count, self.config.error_requeue_max)
            }
        }
    }

    /// Sequentially sweeps the inventory forever. The surrounding
    /// framework normally provides a per-object work queue; this loop is
    /// the standalone equivalent.
    pub async fn run(&self) -> Result<(), StoreError> {
        loop {
            for key in self.store.list().await? {
                if let Err(err) = self.reconcile_one(&key).await {
                    tracing::error!(%key, error = %err, "host reconciliation failed");
                }
            }
            tokio::time::sleep(self.config.iteration_time).await;
        }
    }
}

pub struct MachineReconciler {
    binder: MachineBinder,
    machines: Arc<dyn MachineStore>,
    hosts: Arc<dyn HostStore>,
    credentials: Arc<dyn CredentialsSource>,
    config: IterationConfig,
}

impl MachineReconciler {
    pub fn new(
        binder: MachineBinder,
        machines: Arc<dyn MachineStore>,
        hosts: Arc<dyn HostStore>,
        credentials: Arc<dyn CredentialsSource>,
        config: IterationConfig,
    ) -> Self {
        MachineReconciler {
            binder,
            machines,
            hosts,
            credentials,
            config,
        }
    }

    pub async fn reconcile_one(&self, key: &str) -> Result<Duration, StoreError> {
        let mut machine_copy = self.machines.load(key).await?;
        let machine = &mut machine_copy.object;

        let mut host_copies: Vec<(String, Versioned<BareMetalHost>)> = Vec::new();
        for host_key in self.hosts.list().await? {
            host_copies.push((host_key.clone(), self.hosts.load(&host_key).await?));
        }
        let originals: Vec<BareMetalHost> = host_copies
            .iter()
            .map(|(_, copy)| copy.object.clone())
            .collect();
        let mut host_objects: Vec<BareMetalHost> = originals.clone();

        let bootstrap_user_data = self
            .credentials
            .bootstrap_user_data(&ConsumerRef::for_machine(machine))
            .await?;
        let ctx = MachineContext {
            now: Utc::now(),
            bootstrap_user_data,
        };

        let requeue = match self.binder.reconcile(machine, &mut host_objects, &ctx).await {
            Ok(BindOutcome::Progressed) => Duration::ZERO,
            Ok(BindOutcome::Waiting { .. }) => self.config.iteration_time,
            Ok(BindOutcome::Ready | BindOutcome::Failed | BindOutcome::Released) => {
                self.config.iteration_time
            }
            Err(err) => {
                tracing::warn!(
                    machine = %machine.metadata.name,
                    error = %err,
                    "machine reconciliation error"
                );
                self.config.iteration_time
            }
        };

        // Write back every host the binder touched.
        for (index, (host_key, mut copy)) in host_copies.into_iter().enumerate() {
            if host_objects[index] == originals[index] {
                continue;
            }
            copy.object = host_objects[index].clone();
            match self.hosts.persist(&host_key, copy).await {
                Ok(()) | Err(StoreError::Conflict(_)) => {}
                Err(err) => return Err(err),
            }
        }
        match self.machines.persist(key, machine_copy).await {
            Ok(()) => Ok(requeue),
            Err(StoreError::Conflict(_)) => Ok(Duration::ZERO),
            Err(err) => Err(err),
        }
    }

    pub async fn run(&self) -> Result<(), StoreError> {
        loop {
            for key in self.machines.list().await? {
                if let Err(err) = self.reconcile_one(&key).await {
                    tracing::error!(%key, error = %err, "machine reconciliation failed");
                }
            }
            tokio::time::sleep(self.config.iteration_time).await;
        }
    }
}

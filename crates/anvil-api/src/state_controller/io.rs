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

//! How the state controller loads and persists its objects.
//!
//! The surrounding orchestration framework owns durable storage, watches
//! and the per-object work queue; the controller only sees these traits.
//! Mutations follow copy-on-read / patch-on-write: the reconciler loads a
//! versioned copy, mutates it locally and persists once at the end. A
//! version conflict is not fatal, it converts into an immediate requeue so
//! the next tick observes the authoritative state.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anvil_model::credentials::SshCredentials;
use anvil_model::host::{BareMetalHost, ConsumerRef};
use anvil_model::machine::BareMetalMachine;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The object changed underneath us; retry with a fresh copy.
    #[error("version conflict persisting {0}")]
    Conflict(String),
    #[error("object {0} not found")]
    NotFound(String),
    #[error("store failure: {0}")]
    Internal(String),
}

/// An object together with the version its copy was read at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: u64,
    pub object: T,
}

#[async_trait::async_trait]
pub trait HostStore: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    async fn load(&self, key: &str) -> Result<Versioned<BareMetalHost>, StoreError>;

    /// Persists the mutated copy. Fails with [`StoreError::Conflict`] when
    /// the stored version moved past the copy's.
    async fn persist(&self, key: &str, host: Versioned<BareMetalHost>) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait MachineStore: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    async fn load(&self, key: &str) -> Result<Versioned<BareMetalMachine>, StoreError>;

    async fn persist(
        &self,
        key: &str,
        machine: Versioned<BareMetalMachine>,
    ) -> Result<(), StoreError>;
}

/// Resolves the opaque secrets the provisioning actions need.
#[async_trait::async_trait]
pub trait CredentialsSource: Send + Sync {
    async fn ssh_credentials(&self, secret_name: &str) -> Result<SshCredentials, StoreError>;

    /// The cloud-init user data produced for the given machine, if the
    /// bootstrap provider finished already.
    async fn bootstrap_user_data(
        &self,
        consumer: &ConsumerRef,
    ) -> Result<Option<String>, StoreError>;
}

/// A process-local store, used by the tests and the standalone binary.
#[derive(Default)]
pub struct InMemoryStore<T> {
    objects: Mutex<BTreeMap<String, Versioned<T>>>,
}

impl<T: Clone> InMemoryStore<T> {
    pub fn new() -> Self {
        InMemoryStore {
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, key: impl Into<String>, object: T) {
        self.objects.lock().unwrap().insert(
            key.into(),
            Versioned { version: 1, object },
        );
    }

    fn list_keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn load_copy(&self, key: &str) -> Result<Versioned<T>, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn persist_copy(&self, key: &str, copy: Versioned<T>) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.version != copy.version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        stored.version += 1;
        stored.object = copy.object;
        Ok(())
    }
}

#[async_trait::async_trait]
impl HostStore for InMemoryStore<BareMetalHost> {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.list_keys())
    }

    async fn load(&self, key: &str) -> Result<Versioned<BareMetalHost>, StoreError> {
        self.load_copy(key)
    }

    async fn persist(&self, key: &str, host: Versioned<BareMetalHost>) -> Result<(), StoreError> {
        self.persist_copy(key, host)
    }
}

#[async_trait::async_trait]
impl MachineStore for InMemoryStore<BareMetalMachine> {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.list_keys())
    }

    async fn load(&self, key: &str) -> Result<Versioned<BareMetalMachine>, StoreError> {
        self.load_copy(key)
    }

    async fn persist(
        &self,
        key: &str,
        machine: Versioned<BareMetalMachine>,
    ) -> Result<(), StoreError> {
        self.persist_copy(key, machine)
    }
}

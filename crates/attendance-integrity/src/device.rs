//! Device trust store: one durable device per account.
//!
//! Binding is first-use-wins: once an account has a trusted device, only
//! an administrative [`DeviceTrustStore::reset`] clears it. The store only
//! classifies presented devices; deciding what a mismatch means (reject,
//! alert) belongs to the caller.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::ids::{AccountId, DeviceId};

/// Classification of a presented device against an account's binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCheck {
    /// The presented device is the trusted one.
    Match,
    /// A different device is bound to the account.
    Mismatch { bound: DeviceId },
    /// No device is bound yet.
    Unbound,
}

/// Thread-safe store of account → trusted device bindings.
#[derive(Debug, Default)]
pub struct DeviceTrustStore {
    bindings: RwLock<HashMap<AccountId, DeviceId>>,
}

impl DeviceTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted bindings.
    pub fn from_bindings(bindings: impl IntoIterator<Item = (AccountId, DeviceId)>) -> Self {
        Self {
            bindings: RwLock::new(bindings.into_iter().collect()),
        }
    }

    /// Bind `device` to `account` if the account has no binding yet.
    ///
    /// Returns `true` when this call created the binding and `false` when
    /// one already existed (the existing binding is left untouched).
    pub fn bind(&self, account: &AccountId, device: &DeviceId) -> bool {
        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        match bindings.entry(account.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(device.clone());
                log::info!("bound device {device} to account {account}");
                true
            }
        }
    }

    /// Classify `device` against the binding held for `account`.
    pub fn verify(&self, account: &AccountId, device: &DeviceId) -> DeviceCheck {
        let bindings = self.bindings.read().unwrap_or_else(|e| e.into_inner());
        match bindings.get(account) {
            None => DeviceCheck::Unbound,
            Some(bound) if bound == device => DeviceCheck::Match,
            Some(bound) => DeviceCheck::Mismatch {
                bound: bound.clone(),
            },
        }
    }

    /// Clear the binding for `account`, returning the device that was bound.
    pub fn reset(&self, account: &AccountId) -> Option<DeviceId> {
        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        let previous = bindings.remove(account);
        if let Some(device) = &previous {
            log::info!("reset device binding {device} for account {account}");
        }
        previous
    }

    /// The device currently bound to `account`, if any.
    pub fn binding(&self, account: &AccountId) -> Option<DeviceId> {
        let bindings = self.bindings.read().unwrap_or_else(|e| e.into_inner());
        bindings.get(account).cloned()
    }

    /// Snapshot of all bindings, sorted by account.
    pub fn bindings(&self) -> Vec<(AccountId, DeviceId)> {
        let bindings = self.bindings.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = bindings
            .iter()
            .map(|(a, d)| (a.clone(), d.clone()))
            .collect();
        all.sort();
        all
    }
}

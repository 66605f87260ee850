use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use super::Address;

/// Signer addresses allowed to call private methods.
#[derive(Debug, Default)]
pub struct AuthorizedSet {
    addresses: RwLock<HashSet<Address>>,
}

impl AuthorizedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addresses<I: IntoIterator<Item = Address>>(addresses: I) -> Self {
        Self {
            addresses: RwLock::new(addresses.into_iter().collect()),
        }
    }

    /// Returns false if the address was already present.
    pub fn add(&self, address: Address) -> bool {
        self.addresses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address)
    }

    /// Returns false if the address was not present.
    pub fn remove(&self, address: &Address) -> bool {
        self.addresses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Address> {
        let mut list: Vec<Address> = self
            .addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        list.sort();
        list
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{AccountAddress, AccountId};

/// append-only interning table from account addresses to dense ids
///
/// operations and inceptions store the small id; the read model resolves it
/// back. purely a storage-compaction layer, semantically a lookup table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressBook {
    ids: HashMap<AccountAddress, AccountId>,
    addresses: Vec<AccountAddress>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// intern an address, returning its id; existing addresses keep theirs
    pub fn intern(&mut self, address: &AccountAddress) -> AccountId {
        if let Some(&id) = self.ids.get(address) {
            return id;
        }
        let id = self.addresses.len() as AccountId;
        self.addresses.push(address.clone());
        self.ids.insert(address.clone(), id);
        id
    }

    /// resolve an id back to its address
    pub fn resolve(&self, id: AccountId) -> Option<&AccountAddress> {
        self.addresses.get(id as usize)
    }

    /// look up an already-interned address
    pub fn lookup(&self, address: &AccountAddress) -> Option<AccountId> {
        self.ids.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut book = AddressBook::new();
        let alice = AccountAddress::new("alice");
        let bob = AccountAddress::new("bob");

        let a1 = book.intern(&alice);
        let b = book.intern(&bob);
        let a2 = book.intern(&alice);

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_resolve_round_trip() {
        let mut book = AddressBook::new();
        let addr = AccountAddress::new("0xfeed");

        let id = book.intern(&addr);

        assert_eq!(book.resolve(id), Some(&addr));
        assert_eq!(book.lookup(&addr), Some(id));
        assert_eq!(book.resolve(id + 1), None);
    }
}

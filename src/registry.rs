//! Per-cycle registry snapshot.
//!
//! Taken fresh at the start of every poll cycle so add/remove operations in
//! the backing store take effect on the very next cycle. Addresses are
//! parsed into `alloy_primitives::Address`, which makes membership tests
//! exact byte comparisons regardless of the casing the store holds.

use crate::db::{self, DbPool};
use crate::error::{WatchError, WatchResult};
use alloy_primitives::Address;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

/// A user watching an address, with their chosen display label.
/// Ordered so fan-out is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Owner {
    pub user_id: i64,
    pub label: String,
}

/// Read-only mapping from watched address to its owners, valid for one
/// cycle or one on-demand request.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    watched: HashMap<Address, BTreeSet<Owner>>,
}

impl RegistrySnapshot {
    /// Build a snapshot from the backing store. Rows with unparseable
    /// addresses are skipped and logged; they cannot match anything
    /// on-chain anyway.
    pub async fn load(pool: &DbPool) -> WatchResult<Self> {
        let rows = db::list_all_watched(pool).await?;
        let mut watched: HashMap<Address, BTreeSet<Owner>> = HashMap::new();

        for (address, user_id, label) in rows {
            match Address::from_str(&address) {
                Ok(addr) => {
                    watched
                        .entry(addr)
                        .or_default()
                        .insert(Owner { user_id, label });
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Skipping unparseable stored address");
                }
            }
        }

        Ok(Self { watched })
    }

    /// Build a snapshot directly from entries (tests, fixtures).
    pub fn from_entries(entries: impl IntoIterator<Item = (Address, Owner)>) -> Self {
        let mut watched: HashMap<Address, BTreeSet<Owner>> = HashMap::new();
        for (addr, owner) in entries {
            watched.entry(addr).or_default().insert(owner);
        }
        Self { watched }
    }

    pub fn is_watched(&self, addr: &Address) -> bool {
        self.watched.contains_key(addr)
    }

    pub fn owners_of(&self, addr: &Address) -> Option<&BTreeSet<Owner>> {
        self.watched.get(addr)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.watched.keys()
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }
}

/// Parse and normalize a caller-supplied address string.
/// Rejects anything that is not a well-formed 20-byte hex address.
pub fn parse_address(input: &str) -> WatchResult<Address> {
    Address::from_str(input.trim())
        .map_err(|_| WatchError::Config(format!("invalid address: {input}")))
}

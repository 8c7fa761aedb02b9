//! Contract materialization — a contract plus its resolved clauses
//!
//! Loading resolves every clause reference of the contract. A reference
//! that does not resolve is a hard error; the engine never walks a
//! partially loaded graph.

use std::collections::BTreeMap;

use tracing::debug;

use crate::ledger::{asset_type, AssetKey, Ledger};
use crate::{Clause, Contract, Result};

/// In-memory view of a contract and the clauses it references
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedContract {
    pub contract: Contract,
    clauses: BTreeMap<String, Clause>,
}

impl LoadedContract {
    pub fn load(ledger: &dyn Ledger, key: &AssetKey) -> Result<Self> {
        let contract_key = AssetKey::new(asset_type::CONTRACT, key.key.clone());
        let record = ledger
            .get(&contract_key)
            .map_err(|e| e.context(format!("Failed to load contract '{}'", key)))?;
        let contract = Contract::from_record(record)?;

        let mut clauses = BTreeMap::new();
        for reference in &contract.clauses {
            let record = ledger.get(reference).map_err(|e| {
                e.context(format!(
                    "Failed to load clause '{}' of contract '{}'",
                    reference, contract.key
                ))
            })?;
            let clause = Clause::from_record(record)?;
            clauses.insert(clause.key.clone(), clause);
        }
        debug!(contract = %contract.key, clauses = clauses.len(), "contract loaded");

        Ok(LoadedContract { contract, clauses })
    }

    /// Clause of this contract by key; `None` when it does not belong here
    pub fn get_clause(&self, key: &AssetKey) -> Option<&Clause> {
        self.clauses.get(&key.key)
    }

    pub(crate) fn get_clause_mut(&mut self, key: &AssetKey) -> Option<&mut Clause> {
        self.clauses.get_mut(&key.key)
    }

    /// Clauses in contract order
    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.contract
            .clauses
            .iter()
            .filter_map(|reference| self.clauses.get(&reference.key))
    }

    /// At least one clause can still run
    pub fn has_executable_clauses(&self) -> bool {
        self.clauses.values().any(Clause::is_runnable)
    }
}

//! Clausia Core - clause execution engine for auto-executable contracts
//!
//! A contract is an ordered list of clauses plus a shared data bag. Each
//! clause performs one action (date check, fine, credit, payment,
//! finalization) and may depend on other clauses of the same contract.
//!
//! # Architecture
//!
//! ```text
//! Ledger records → LoadedContract (materialization)
//!                        ↓
//!                  Engine (depth-first walk, staged writes)
//!                        ↓
//!                  actions::get(ActionType) → handler.execute(view, data)
//!                        ↓
//!                  merge patch → persist assets → update clause → commit
//! ```
//!
//! # Guarantees
//!
//! - **Terminal finalization**: a finalized clause is never executed again
//! - **All-or-nothing**: one invocation commits every write or none
//! - **Retry-safe**: re-running after a conflict skips completed work
//! - **Closed dispatch**: the action set is a fixed enum, not a plugin table

pub mod actions;
pub mod contract;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod merge;
pub mod schema;
pub mod template;
pub mod transactions;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use actions::{Action, ActionOutcome, ActionResult, ActionType};
pub use contract::LoadedContract;
pub use engine::{ClauseExecution, Engine, ExecutionReport};
pub use error::{Error, Result};
pub use ledger::{AssetKey, Ledger, MemoryLedger, Record, Selector, StagedLedger};
pub use template::{Template, TemplateClause};

/// String-keyed, dynamically typed values (contract data, parameters, inputs)
pub type DataBag = serde_json::Map<String, Value>;

// ── Clause ────────────────────────────────────────────────

/// Outcome written onto a clause after it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseResult {
    pub success: bool,
    pub feedback: String,
}

/// Lifecycle position of a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClauseState {
    Pending,
    Finalized,
    NonExecutable,
}

fn clause_asset_type() -> String {
    ledger::asset_type::CLAUSE.to_string()
}

fn default_true() -> bool {
    true
}

/// A condition/action unit of a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    #[serde(rename = "@assetType", default = "clause_asset_type")]
    pub asset_type: String,
    #[serde(rename = "@key")]
    pub key: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default = "default_true")]
    pub executable: bool,
    #[serde(default)]
    pub finalized: bool,
    pub action_type: ActionType,
    /// Policy set at creation
    #[serde(default)]
    pub parameters: DataBag,
    /// Values supplied before execution
    #[serde(default)]
    pub input: DataBag,
    #[serde(default)]
    pub dependencies: Vec<AssetKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ClauseResult>,
}

impl Clause {
    pub fn from_record(record: Record) -> Result<Self> {
        let key = record
            .get("@key")
            .and_then(Value::as_str)
            .unwrap_or("<unkeyed>")
            .to_string();
        serde_json::from_value(Value::Object(record))
            .map_err(|e| Error::BadRequest(format!("Malformed clause '{}': {}", key, e)))
    }

    pub fn to_record(&self) -> Result<Record> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::InvalidData("Clause did not serialize to an object".into())),
        }
    }

    pub fn asset_key(&self) -> AssetKey {
        AssetKey::new(self.asset_type.clone(), self.key.clone())
    }

    pub fn state(&self) -> ClauseState {
        if !self.executable {
            ClauseState::NonExecutable
        } else if self.finalized {
            ClauseState::Finalized
        } else {
            ClauseState::Pending
        }
    }

    /// Executable and not yet finalized
    pub fn is_runnable(&self) -> bool {
        self.state() == ClauseState::Pending
    }
}

// ── Contract ──────────────────────────────────────────────

fn contract_asset_type() -> String {
    ledger::asset_type::CONTRACT.to_string()
}

/// Auto-executable contract as stored on the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    #[serde(rename = "@assetType", default = "contract_asset_type")]
    pub asset_type: String,
    #[serde(rename = "@key")]
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_date: Option<String>,
    pub owner: AssetKey,
    #[serde(default)]
    pub participants: Vec<AssetKey>,
    #[serde(default)]
    pub clauses: Vec<AssetKey>,
    /// Shared data bag accumulated across clause executions
    #[serde(default)]
    pub data: DataBag,
    /// Dates harvested from clause configuration
    #[serde(default)]
    pub dates: DataBag,
}

impl Contract {
    pub fn from_record(record: Record) -> Result<Self> {
        let key = record
            .get("@key")
            .and_then(Value::as_str)
            .unwrap_or("<unkeyed>")
            .to_string();
        serde_json::from_value(Value::Object(record))
            .map_err(|e| Error::BadRequest(format!("Malformed contract '{}': {}", key, e)))
    }

    pub fn to_record(&self) -> Result<Record> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::InvalidData("Contract did not serialize to an object".into())),
        }
    }

    pub fn asset_key(&self) -> AssetKey {
        AssetKey::new(self.asset_type.clone(), self.key.clone())
    }

    pub fn has_clause(&self, key: &AssetKey) -> bool {
        self.clauses.iter().any(|c| c.key == key.key)
    }
}

// ── Tests ─────────────────────────────────────────────────

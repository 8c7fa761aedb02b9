//! Action registry — one handler per clause action type
//!
//! The action set is closed: [`ActionType`] enumerates every kind of clause
//! and [`get`] maps each executable kind to a static handler implementing
//! [`Action`]. `NonExecutable` clauses have no handler.
//!
//! # Handler contract
//!
//! - Missing inputs are *not ready*: `success = false`, no finalize, no error.
//! - Errors are reserved for malformed or invalid data.
//! - Handlers never mutate contract data; they return a patch that the
//!   engine merges (patch keys win).

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::ledger::Record;
use crate::schema::{self, Shape};
use crate::{DataBag, Error, Result};

pub mod credit;
pub mod date_interval;
pub mod finalize;
pub mod fine;
pub mod payment;

pub use credit::CreditCalculation;
pub use date_interval::DateIntervalCheck;
pub use finalize::ContractFinalization;
pub use fine::FineCalculation;
pub use payment::PaymentProcessing;

// ── Action Type ───────────────────────────────────────────

/// Kind of computation a clause performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionType {
    DateIntervalCheck,
    FineCalculation,
    CreditCalculation,
    PaymentProcessing,
    ContractFinalization,
    NonExecutable,
}

/// Accepted names (canonical first, then legacy aliases) and ledger codes
const ACTION_TYPE_CHOICES: &[(&str, i64)] = &[
    ("dateIntervalCheck", 0),
    ("fineCalculation", 1),
    ("creditCalculation", 2),
    ("paymentProcessing", 3),
    ("contractFinalization", 4),
    ("nonExecutable", -1),
    ("checkDateInterval", 0),
    ("getDeduction", 1),
    ("getCredit", 2),
    ("payment", 3),
    ("finishContract", 4),
];

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::DateIntervalCheck,
        ActionType::FineCalculation,
        ActionType::CreditCalculation,
        ActionType::PaymentProcessing,
        ActionType::ContractFinalization,
        ActionType::NonExecutable,
    ];

    /// Numeric code stored on the ledger
    pub fn code(self) -> i64 {
        match self {
            ActionType::DateIntervalCheck => 0,
            ActionType::FineCalculation => 1,
            ActionType::CreditCalculation => 2,
            ActionType::PaymentProcessing => 3,
            ActionType::ContractFinalization => 4,
            ActionType::NonExecutable => -1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ActionType::DateIntervalCheck => "dateIntervalCheck",
            ActionType::FineCalculation => "fineCalculation",
            ActionType::CreditCalculation => "creditCalculation",
            ActionType::PaymentProcessing => "paymentProcessing",
            ActionType::ContractFinalization => "contractFinalization",
            ActionType::NonExecutable => "nonExecutable",
        }
    }

    /// Parse from a name, legacy alias, or numeric code
    pub fn parse(value: &Value) -> Result<Self> {
        let name = schema::choice_name(value, ACTION_TYPE_CHOICES)?;
        ACTION_TYPE_CHOICES
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, code)| Self::from_code(*code))
            .ok_or_else(|| Error::BadRequest(format!("Unknown action type {}", value)))
    }

    pub fn is_executable(self) -> bool {
        self != ActionType::NonExecutable
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ActionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for ActionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ActionType::parse(&value).map_err(serde::de::Error::custom)
    }
}

// ── Results ───────────────────────────────────────────────

/// What a handler produced for one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub feedback: String,
    /// Patch merged into the contract data bag
    pub data: DataBag,
    /// New ledger assets to persist (back references added by the engine)
    pub assets: Vec<Record>,
}

impl ActionResult {
    pub fn new(success: bool, feedback: impl Into<String>) -> Self {
        ActionResult {
            success,
            feedback: feedback.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: DataBag) -> Self {
        self.data = data;
        self
    }

    pub fn with_asset(mut self, asset: Record) -> Self {
        self.assets.push(asset);
        self
    }
}

/// Handler result plus the finalization decision
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub result: ActionResult,
    pub finalize: bool,
}

impl ActionOutcome {
    /// Inputs missing: leave the clause pending without touching data
    pub fn not_ready(feedback: impl Into<String>) -> Self {
        ActionOutcome {
            result: ActionResult::new(false, feedback),
            finalize: false,
        }
    }

    pub fn finalized(result: ActionResult) -> Self {
        ActionOutcome {
            result,
            finalize: true,
        }
    }

    pub fn pending(result: ActionResult) -> Self {
        ActionOutcome {
            result,
            finalize: false,
        }
    }
}

// ── Action Trait ──────────────────────────────────────────

/// Uniform contract every clause handler implements
pub trait Action: Sync {
    /// The action type this handler serves
    fn action_type(&self) -> ActionType;

    /// Fields accepted in the clause's `parameters`
    fn parameter_shape(&self) -> Shape;

    /// Fields accepted in the clause's `input`
    fn input_shape(&self) -> Shape;

    /// Run the clause against the merged view and current contract data
    fn execute(&self, inputs: &DataBag, contract_data: &DataBag) -> Result<ActionOutcome>;
}

static DATE_INTERVAL_CHECK: DateIntervalCheck = DateIntervalCheck;
static FINE_CALCULATION: FineCalculation = FineCalculation;
static CREDIT_CALCULATION: CreditCalculation = CreditCalculation;
static PAYMENT_PROCESSING: PaymentProcessing = PaymentProcessing;
static CONTRACT_FINALIZATION: ContractFinalization = ContractFinalization;

/// Handler for an action type; `None` means the clause cannot run
pub fn get(action_type: ActionType) -> Option<&'static dyn Action> {
    match action_type {
        ActionType::DateIntervalCheck => Some(&DATE_INTERVAL_CHECK),
        ActionType::FineCalculation => Some(&FINE_CALCULATION),
        ActionType::CreditCalculation => Some(&CREDIT_CALCULATION),
        ActionType::PaymentProcessing => Some(&PAYMENT_PROCESSING),
        ActionType::ContractFinalization => Some(&CONTRACT_FINALIZATION),
        ActionType::NonExecutable => None,
    }
}

// ── Shared helpers ────────────────────────────────────────

/// Decode a merged view into a handler's typed view
pub(crate) fn decode<T: DeserializeOwned>(view: &DataBag, what: &str) -> Result<T> {
    serde_json::from_value(Value::Object(view.clone()))
        .map_err(|e| Error::InvalidData(format!("Failed to read {}: {}", what, e)))
}

/// Numeric value of a data-bag key, 0 when absent or not a number
pub(crate) fn amount(data: &DataBag, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Add to a running total and append an entry to a list, returning the patch
pub(crate) fn accumulate(
    data: &DataBag,
    total_key: &str,
    list_key: &str,
    value: f64,
    entry: Value,
) -> DataBag {
    let mut patch = DataBag::new();
    patch.insert(total_key.to_string(), number(amount(data, total_key) + value));

    let mut list = match data.get(list_key) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    list.push(entry);
    patch.insert(list_key.to_string(), Value::Array(list));
    patch
}

/// JSON number from an f64 (non-finite values become 0)
pub(crate) fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(0))
}

/// Non-empty trimmed string
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ── Tests ─────────────────────────────────────────────────

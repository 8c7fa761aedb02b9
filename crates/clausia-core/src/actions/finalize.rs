//! ContractFinalization — condition-driven finalization and cancellation
//!
//! A condition names a contract-data key, a reference value, the declared
//! kind of both, and a comparator. Evaluation is strictly typed: a runtime
//! value whose kind differs from the declared one is a
//! [`Error::TypeMismatch`], never a silent `false`.
//!
//! Order of evaluation:
//!
//! 1. `forceCancellation` cancels unconditionally.
//! 2. `requestedCancellation` with a configured cancellation condition
//!    cancels when it holds and fails the execution otherwise.
//! 3. A configured auto-finalization condition finalizes when it holds.
//! 4. Anything else leaves the clause pending.

use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{decode, Action, ActionOutcome, ActionResult, ActionType};
use crate::schema::{kind_name, parse_date, FieldKind, FieldSpec, Shape};
use crate::{DataBag, Error, Result};

/// Contract-data key written when the contract closes
pub const STATUS_KEY: &str = "contractStatus";

const PARAMETERS: Shape = &[
    FieldSpec::new("autoFinalizationValue", "Auto-finalization condition", FieldKind::Object),
    FieldSpec::new("cancellationCheckValue", "Cancellation condition", FieldKind::Object),
    FieldSpec::new("forceCancellation", "Force cancellation", FieldKind::Boolean),
    FieldSpec::new("requestedCancellation", "Requested cancellation", FieldKind::Boolean),
];

const INPUTS: Shape = &[];

// ── Conditions ────────────────────────────────────────────

/// Declared kind of a condition's operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Int,
    Float,
    Bool,
    Date,
    String,
}

impl DataKind {
    fn name(self) -> &'static str {
        match self {
            DataKind::Int => "int",
            DataKind::Float => "float",
            DataKind::Bool => "bool",
            DataKind::Date => "date",
            DataKind::String => "string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparator {
    Equal,
    NotEqual,
    Greater,
    Smaller,
}

impl Comparator {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparator::Equal => ordering == Ordering::Equal,
            Comparator::NotEqual => ordering != Ordering::Equal,
            Comparator::Greater => ordering == Ordering::Greater,
            Comparator::Smaller => ordering == Ordering::Less,
        }
    }

    fn is_ordering(self) -> bool {
        matches!(self, Comparator::Greater | Comparator::Smaller)
    }
}

/// A typed comparison against one contract-data value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub tag: String,
    pub reference_value: Value,
    pub data_type: DataKind,
    pub conditional_check: Comparator,
}

/// How a condition fared against the contract data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Met,
    NotMet,
    /// The tagged value is not in the contract data yet
    Absent,
}

impl Condition {
    /// `None` for an unset condition (`null` or `{}`)
    fn from_param(value: &Option<Value>, what: &str) -> Result<Option<Self>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) if map.is_empty() => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::BadRequest(format!("Invalid {}: {}", what, e))),
        }
    }

    pub fn evaluate(&self, contract_data: &DataBag) -> Result<Evaluation> {
        let value = match contract_data.get(&self.tag) {
            None | Some(Value::Null) => return Ok(Evaluation::Absent),
            Some(value) => value,
        };

        let actual = self.operand(value)?;
        let reference = self.operand(&self.reference_value)?;

        if self.conditional_check.is_ordering()
            && matches!(self.data_type, DataKind::Bool | DataKind::String)
        {
            return Err(Error::BadRequest(format!(
                "Comparator {:?} is not defined for {} values",
                self.conditional_check,
                self.data_type.name()
            )));
        }

        let ordering = actual.compare(&reference);
        Ok(if self.conditional_check.holds(ordering) {
            Evaluation::Met
        } else {
            Evaluation::NotMet
        })
    }

    fn operand(&self, value: &Value) -> Result<Operand> {
        let mismatch = || Error::TypeMismatch {
            expected: self.data_type.name().to_string(),
            found: kind_name(value).to_string(),
        };
        match self.data_type {
            DataKind::Int => integral(value).map(Operand::Int).ok_or_else(mismatch),
            DataKind::Float => value.as_f64().map(Operand::Float).ok_or_else(mismatch),
            DataKind::Bool => value.as_bool().map(Operand::Bool).ok_or_else(mismatch),
            DataKind::String => value
                .as_str()
                .map(|s| Operand::Text(s.to_string()))
                .ok_or_else(mismatch),
            DataKind::Date => {
                let raw = value.as_str().ok_or_else(mismatch)?;
                parse_date(raw).map(Operand::Date).map_err(|_| Error::TypeMismatch {
                    expected: "date".into(),
                    found: format!("string '{}'", raw),
                })
            }
        }
    }
}

/// Integral JSON number, including floats with no fractional part
fn integral(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(i) = number.as_i64() {
        return Some(i);
    }
    number
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}

enum Operand {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Date(chrono::DateTime<chrono::Utc>),
}

impl Operand {
    fn compare(&self, other: &Operand) -> Ordering {
        match (self, other) {
            (Operand::Int(a), Operand::Int(b)) => a.cmp(b),
            (Operand::Float(a), Operand::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Less),
            (Operand::Bool(a), Operand::Bool(b)) => a.cmp(b),
            (Operand::Text(a), Operand::Text(b)) => a.cmp(b),
            (Operand::Date(a), Operand::Date(b)) => a.cmp(b),
            // Both operands come from the same declared kind
            _ => Ordering::Less,
        }
    }
}

// ── Handler ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct View {
    auto_finalization_value: Option<Value>,
    cancellation_check_value: Option<Value>,
    force_cancellation: bool,
    requested_cancellation: bool,
}

/// Closes the contract by cancellation or when its finalization condition holds
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractFinalization;

impl ContractFinalization {
    fn closed(status: &str, feedback: &str) -> ActionOutcome {
        let mut data = DataBag::new();
        data.insert(STATUS_KEY.into(), json!(status));
        ActionOutcome::finalized(ActionResult::new(true, feedback).with_data(data))
    }
}

impl Action for ContractFinalization {
    fn action_type(&self) -> ActionType {
        ActionType::ContractFinalization
    }

    fn parameter_shape(&self) -> Shape {
        PARAMETERS
    }

    fn input_shape(&self) -> Shape {
        INPUTS
    }

    fn execute(&self, inputs: &DataBag, contract_data: &DataBag) -> Result<ActionOutcome> {
        let view: View = decode(inputs, "finalization arguments")?;

        if view.force_cancellation {
            return Ok(Self::closed(
                "cancelled",
                "Contract cancelled upon force cancellation.",
            ));
        }

        let cancellation =
            Condition::from_param(&view.cancellation_check_value, "cancellation condition")?;
        if let (Some(condition), true) = (&cancellation, view.requested_cancellation) {
            return match condition.evaluate(contract_data)? {
                Evaluation::Met => Ok(Self::closed(
                    "cancelled",
                    "Contract cancelled upon request based on defined conditions.",
                )),
                Evaluation::NotMet => Err(Error::ConditionNotMet(format!(
                    "Contract cancellation condition on '{}' is not met",
                    condition.tag
                ))),
                Evaluation::Absent => Err(Error::BadRequest(format!(
                    "Value '{}' not found in contract data",
                    condition.tag
                ))),
            };
        }

        let auto = Condition::from_param(&view.auto_finalization_value, "finalization condition")?;
        if let Some(condition) = auto {
            return Ok(match condition.evaluate(contract_data)? {
                Evaluation::Met => Self::closed(
                    "finalized",
                    "Contract automatically finalized based on defined conditions.",
                ),
                Evaluation::NotMet | Evaluation::Absent => ActionOutcome::pending(
                    ActionResult::new(false, "Contract remains active; finalization condition not met."),
                ),
            });
        }

        Ok(ActionOutcome::pending(ActionResult::new(
            false,
            "Contract remains active; no conditions for finalization were met.",
        )))
    }
}

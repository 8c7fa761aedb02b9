//! FineCalculation — daily percentage fine with an optional cap

use serde::Deserialize;
use serde_json::{json, Value};

use super::{accumulate, decode, Action, ActionOutcome, ActionResult, ActionType};
use crate::schema::{FieldKind, FieldSpec, Shape};
use crate::{DataBag, Error, Result};

pub const DEFAULT_LABEL: &str = "calculateFine";

const PARAMETERS: Shape = &[
    FieldSpec::new("fineName", "Fine label", FieldKind::Label),
    FieldSpec::new("maxPercentage", "Maximum percentage", FieldKind::Number),
    FieldSpec::new("maxReferenceValue", "Maximum reference value", FieldKind::Number),
];

const INPUTS: Shape = &[
    FieldSpec::new("referenceValue", "Reference value", FieldKind::Number),
    FieldSpec::new("dailyPercentage", "Daily percentage", FieldKind::Number),
    FieldSpec::new("days", "Days", FieldKind::Number),
    FieldSpec::new("referenceClauseDays", "Use days from a date check", FieldKind::Boolean),
    FieldSpec::new("referenceClauseName", "Date check label", FieldKind::Label),
];

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct View {
    fine_name: String,
    max_percentage: f64,
    max_reference_value: f64,
    reference_value: f64,
    daily_percentage: f64,
    days: f64,
    reference_clause_days: bool,
    reference_clause_name: String,
}

/// `fine = referenceValue × dailyPercentage / 100 × days`, capped at
/// `maxPercentage / 100 × maxReferenceValue × days` when both caps are set
pub fn compute_fine(
    reference_value: f64,
    daily_percentage: f64,
    days: f64,
    cap: Option<(f64, f64)>,
) -> f64 {
    let fine = reference_value * daily_percentage / 100.0 * days;
    match cap {
        Some((max_percentage, max_reference)) if max_percentage > 0.0 && max_reference > 0.0 => {
            fine.min(max_percentage / 100.0 * max_reference * days)
        }
        _ => fine,
    }
}

/// Late-delivery style fine accumulated into `fine` / `listOfFines`
#[derive(Debug, Clone, Copy, Default)]
pub struct FineCalculation;

impl FineCalculation {
    /// Days late taken from a date check's published result: the
    /// distance when it was late, zero when it was on time.
    fn days_from_clause(name: &str, contract_data: &DataBag) -> Result<Option<f64>> {
        let Some(entry) = contract_data.get(name) else {
            return Ok(None);
        };
        let entry = entry.as_object().ok_or_else(|| {
            Error::InvalidData(format!("Date check result '{}' is not an object", name))
        })?;
        if entry.get("withinDeadline").and_then(Value::as_bool) == Some(true) {
            return Ok(Some(0.0));
        }
        entry
            .get("daysFromDeadline")
            .and_then(Value::as_f64)
            .map(|d| Some(d.abs()))
            .ok_or_else(|| {
                Error::InvalidData(format!(
                    "Date check result '{}' has no 'daysFromDeadline'",
                    name
                ))
            })
    }
}

impl Action for FineCalculation {
    fn action_type(&self) -> ActionType {
        ActionType::FineCalculation
    }

    fn parameter_shape(&self) -> Shape {
        PARAMETERS
    }

    fn input_shape(&self) -> Shape {
        INPUTS
    }

    fn execute(&self, inputs: &DataBag, contract_data: &DataBag) -> Result<ActionOutcome> {
        let view: View = decode(inputs, "fine arguments")?;

        if view.reference_value <= 0.0 || view.daily_percentage <= 0.0 {
            return Ok(ActionOutcome::not_ready(
                "Waiting for input values to be set to execute the clause.",
            ));
        }

        let days = if view.reference_clause_days {
            match Self::days_from_clause(&view.reference_clause_name, contract_data)? {
                Some(days) => days,
                None => {
                    return Ok(ActionOutcome::not_ready(format!(
                        "Waiting for the {} clause to be executed.",
                        view.reference_clause_name
                    )))
                }
            }
        } else {
            view.days
        };
        if days < 0.0 {
            return Err(Error::InvalidData(format!(
                "Fine days must not be negative, got {}",
                days
            )));
        }

        let fine = compute_fine(
            view.reference_value,
            view.daily_percentage,
            days,
            Some((view.max_percentage, view.max_reference_value)),
        );

        let name = if view.fine_name.is_empty() {
            DEFAULT_LABEL.to_string()
        } else {
            view.fine_name
        };
        let feedback = format!("Fine calculated successfully. The applied fine is {:.2}", fine);

        let data = accumulate(
            contract_data,
            "fine",
            "listOfFines",
            fine,
            json!({
                "name": name,
                "fine": fine,
                "days": days,
                "feedback": "Fine calculated successfully.",
                "success": true,
            }),
        );

        Ok(ActionOutcome::finalized(
            ActionResult::new(true, feedback).with_data(data),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(value: Value) -> DataBag {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_compute_fine_uncapped() {
        assert_eq!(compute_fine(1000.0, 1.0, 5.0, None), 50.0);
    }

    #[test]
    fn test_compute_fine_capped() {
        assert_eq!(compute_fine(1000.0, 1.0, 5.0, Some((2.0, 100.0))), 10.0);
        // cap ignored unless both sides are positive
        assert_eq!(compute_fine(1000.0, 1.0, 5.0, Some((2.0, 0.0))), 50.0);
    }

    #[test]
    fn test_execute_accumulates() {
        let data = bag(json!({"fine": 5.0, "listOfFines": [{"name": "earlier", "fine": 5.0}]}));
        let view = bag(json!({
            "fineName": "lateDelivery",
            "referenceValue": 1000,
            "dailyPercentage": 1,
            "days": 5,
        }));
        let outcome = FineCalculation.execute(&view, &data).unwrap();
        assert!(outcome.finalize);
        assert!(outcome.result.success);
        assert_eq!(
            outcome.result.feedback,
            "Fine calculated successfully. The applied fine is 50.00"
        );
        assert_eq!(outcome.result.data["fine"], json!(55.0));
        let list = outcome.result.data["listOfFines"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1]["name"], json!("lateDelivery"));
        assert_eq!(list[1]["fine"], json!(50.0));
    }

    #[test]
    fn test_execute_with_cap() {
        let view = bag(json!({
            "maxPercentage": 2,
            "maxReferenceValue": 100,
            "referenceValue": 1000,
            "dailyPercentage": 1,
            "days": 5,
        }));
        let outcome = FineCalculation.execute(&view, &DataBag::new()).unwrap();
        assert_eq!(outcome.result.data["fine"], json!(10.0));
        assert_eq!(
            outcome.result.data["listOfFines"][0]["name"],
            json!(DEFAULT_LABEL)
        );
    }

    #[test]
    fn test_not_ready_without_values() {
        let view = bag(json!({"referenceValue": 1000}));
        let outcome = FineCalculation.execute(&view, &DataBag::new()).unwrap();
        assert!(!outcome.finalize);
        assert!(!outcome.result.success);
        assert!(outcome.result.data.is_empty());
    }

    #[test]
    fn test_days_from_late_date_check() {
        let data = bag(json!({"delivery": {"daysFromDeadline": 3, "withinDeadline": false}}));
        let view = bag(json!({
            "referenceValue": 200,
            "dailyPercentage": 10,
            "referenceClauseDays": true,
            "referenceClauseName": "delivery",
        }));
        let outcome = FineCalculation.execute(&view, &data).unwrap();
        assert_eq!(outcome.result.data["fine"], json!(60.0));
    }

    #[test]
    fn test_days_from_on_time_date_check_is_zero() {
        let data = bag(json!({"delivery": {"daysFromDeadline": 4, "withinDeadline": true}}));
        let view = bag(json!({
            "referenceValue": 200,
            "dailyPercentage": 10,
            "referenceClauseDays": true,
            "referenceClauseName": "delivery",
        }));
        let outcome = FineCalculation.execute(&view, &data).unwrap();
        assert!(outcome.finalize);
        assert_eq!(outcome.result.data["fine"], json!(0.0));
    }

    #[test]
    fn test_waits_for_date_check() {
        let view = bag(json!({
            "referenceValue": 200,
            "dailyPercentage": 10,
            "referenceClauseDays": true,
            "referenceClauseName": "delivery",
        }));
        let outcome = FineCalculation.execute(&view, &DataBag::new()).unwrap();
        assert!(!outcome.finalize);
        assert_eq!(
            outcome.result.feedback,
            "Waiting for the delivery clause to be executed."
        );
    }

    #[test]
    fn test_malformed_input_is_error() {
        let view = bag(json!({"referenceValue": "lots", "dailyPercentage": 1}));
        assert!(matches!(
            FineCalculation.execute(&view, &DataBag::new()),
            Err(Error::InvalidData(_))
        ));
    }
}

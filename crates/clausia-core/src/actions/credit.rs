//! CreditCalculation — bonus imposed outright or earned by a good review

use serde::Deserialize;
use serde_json::json;

use super::{accumulate, decode, Action, ActionOutcome, ActionResult, ActionType};
use crate::schema::{FieldKind, FieldSpec, Shape};
use crate::{DataBag, Error, Result};

pub const DEFAULT_LABEL: &str = "calculateCredit";

/// Lowest review rating that earns a conditional credit
pub const MIN_REVIEW_RATING: f64 = 3.0;

const PARAMETERS: Shape = &[
    FieldSpec::new("imposeCredit", "Impose credit", FieldKind::Boolean),
    FieldSpec::new("reviewCondition", "Depends on review", FieldKind::Boolean),
    FieldSpec::new("percentage", "Percentage", FieldKind::Number),
    FieldSpec::new("predefinedValue", "Predefined value", FieldKind::Number),
    FieldSpec::new("creditName", "Credit label", FieldKind::Label),
];

const INPUTS: Shape = &[
    FieldSpec::new("storedValue", "Stored value", FieldKind::Number),
    FieldSpec::new("review", "Review", FieldKind::Object),
];

/// Review attached to a contract
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Review {
    pub rating: f64,
    pub comments: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct View {
    impose_credit: bool,
    review_condition: bool,
    percentage: f64,
    predefined_value: f64,
    credit_name: String,
    stored_value: f64,
    review: Option<Review>,
}

impl View {
    fn amount(&self) -> f64 {
        if self.percentage > 0.0 && self.stored_value > 0.0 {
            self.percentage / 100.0 * self.stored_value
        } else {
            self.predefined_value
        }
    }
}

/// Credit accumulated into `bonus` / `listOfBonus`
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditCalculation;

impl CreditCalculation {
    fn apply(view: View, contract_data: &DataBag, feedback: &str) -> Result<ActionOutcome> {
        let credit = view.amount();
        if credit <= 0.0 {
            return Err(Error::InvalidData(format!(
                "Invalid credit amount calculated: {}",
                credit
            )));
        }
        let name = if view.credit_name.is_empty() {
            DEFAULT_LABEL.to_string()
        } else {
            view.credit_name
        };
        let data = accumulate(
            contract_data,
            "bonus",
            "listOfBonus",
            credit,
            json!({
                "name": name,
                "bonus": credit,
                "feedback": feedback,
                "success": true,
            }),
        );
        Ok(ActionOutcome::finalized(
            ActionResult::new(true, feedback).with_data(data),
        ))
    }
}

impl Action for CreditCalculation {
    fn action_type(&self) -> ActionType {
        ActionType::CreditCalculation
    }

    fn parameter_shape(&self) -> Shape {
        PARAMETERS
    }

    fn input_shape(&self) -> Shape {
        INPUTS
    }

    fn execute(&self, inputs: &DataBag, contract_data: &DataBag) -> Result<ActionOutcome> {
        let view: View = decode(inputs, "credit arguments")?;

        if view.impose_credit {
            return Self::apply(view, contract_data, "Credit calculated successfully.");
        }

        if view.review_condition {
            let rating = match &view.review {
                None => {
                    return Ok(ActionOutcome::not_ready(
                        "Waiting for a review to be added to the contract.",
                    ))
                }
                Some(review) => review.rating,
            };
            if rating >= MIN_REVIEW_RATING {
                return Self::apply(view, contract_data, "Credit calculated based on review rating.");
            }
            // One review per contract, so a low rating is final
            return Ok(ActionOutcome::finalized(ActionResult::new(
                false,
                format!("Review rating {} is below {}; no credit applied.", rating, MIN_REVIEW_RATING),
            )));
        }

        Ok(ActionOutcome::pending(ActionResult::new(
            false,
            "Conditions for credit are not met.",
        )))
    }
}

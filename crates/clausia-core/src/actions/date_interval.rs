//! DateIntervalCheck — is an evaluated date within a deadline?
//!
//! `deadline = referenceDate ± deadlineInterval × unit` and the clause is on
//! time iff `evaluatedDate <= deadline`. The absolute whole-day distance to
//! the deadline is published under the clause label so later clauses (fines)
//! can consume it.

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use super::{decode, present, Action, ActionOutcome, ActionResult, ActionType};
use crate::schema::{choice_name, format_date, parse_date, FieldKind, FieldSpec, Shape};
use crate::{DataBag, Error, Result};

pub const DEFAULT_LABEL: &str = "dateIntervalCheck";

pub const INTERVAL_UNITS: &[(&str, i64)] =
    &[("days", 1), ("weeks", 2), ("months", 3), ("years", 4)];

pub const DIRECTIONS: &[(&str, i64)] = &[("before", -1), ("after", 1)];

const PARAMETERS: Shape = &[
    FieldSpec::new("name", "Label", FieldKind::Label),
    FieldSpec::new("intervalType", "Interval unit", FieldKind::Choice(INTERVAL_UNITS)),
    FieldSpec::new("deadlineInterval", "Deadline offset", FieldKind::Number),
    FieldSpec::new("direction", "Direction", FieldKind::Choice(DIRECTIONS)),
    FieldSpec::new("referenceDate", "Reference date", FieldKind::Date),
];

const INPUTS: Shape = &[
    FieldSpec::new("referenceDate", "Reference date", FieldKind::Date),
    FieldSpec::new("evaluatedDate", "Evaluated date", FieldKind::Date),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum IntervalUnit {
    #[default]
    Days,
    Weeks,
    Months,
    Years,
}

impl IntervalUnit {
    fn days(self) -> i64 {
        match self {
            IntervalUnit::Days => 1,
            IntervalUnit::Weeks => 7,
            IntervalUnit::Months => 30,
            IntervalUnit::Years => 365,
        }
    }
}

impl<'de> Deserialize<'de> for IntervalUnit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match choice_name(&value, INTERVAL_UNITS).map_err(serde::de::Error::custom)? {
            "weeks" => Ok(IntervalUnit::Weeks),
            "months" => Ok(IntervalUnit::Months),
            "years" => Ok(IntervalUnit::Years),
            _ => Ok(IntervalUnit::Days),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Before,
    After,
}

impl Direction {
    fn sign(self) -> i64 {
        match self {
            Direction::Before => -1,
            Direction::After => 1,
        }
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match choice_name(&value, DIRECTIONS).map_err(serde::de::Error::custom)? {
            "before" => Ok(Direction::Before),
            _ => Ok(Direction::After),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct View {
    name: String,
    interval_type: IntervalUnit,
    deadline_interval: f64,
    direction: Option<Direction>,
    reference_date: Option<String>,
    evaluated_date: Option<String>,
}

/// Deadline check between a reference date and an evaluated date
#[derive(Debug, Clone, Copy, Default)]
pub struct DateIntervalCheck;

impl Action for DateIntervalCheck {
    fn action_type(&self) -> ActionType {
        ActionType::DateIntervalCheck
    }

    fn parameter_shape(&self) -> Shape {
        PARAMETERS
    }

    fn input_shape(&self) -> Shape {
        INPUTS
    }

    fn execute(&self, inputs: &DataBag, _contract_data: &DataBag) -> Result<ActionOutcome> {
        let view: View = decode(inputs, "date interval arguments")?;

        let Some(reference) = present(&view.reference_date) else {
            return Ok(ActionOutcome::not_ready("Reference date is not provided"));
        };
        let Some(evaluated) = present(&view.evaluated_date) else {
            return Ok(ActionOutcome::not_ready("Evaluated date is not provided"));
        };

        let reference = parse_date(reference)
            .map_err(|e| Error::InvalidData(format!("Failed to parse reference date: {}", e)))?;
        let evaluated = parse_date(evaluated)
            .map_err(|e| Error::InvalidData(format!("Failed to parse evaluated date: {}", e)))?;

        let direction = view.direction.ok_or_else(|| {
            Error::InvalidData("Invalid direction, it must be 'before' (-1) or 'after' (1)".into())
        })?;

        let offset_days = (view.deadline_interval.round() as i64)
            .checked_mul(view.interval_type.days())
            .and_then(|d| d.checked_mul(direction.sign()));
        let deadline = offset_days
            .and_then(TimeDelta::try_days)
            .and_then(|delta| reference.checked_add_signed(delta))
            .ok_or_else(|| Error::InvalidData("Deadline is out of the supported date range".into()))?;

        let within_deadline = evaluated <= deadline;
        let days_from_deadline = (deadline - evaluated).num_days().abs();

        let label = if view.name.is_empty() {
            DEFAULT_LABEL.to_string()
        } else {
            view.name
        };

        let mut data = DataBag::new();
        data.insert(
            label,
            json!({
                "daysFromDeadline": days_from_deadline,
                "withinDeadline": within_deadline,
                "deadline": format_date(&deadline),
            }),
        );

        let feedback = if within_deadline {
            "Within the deadline."
        } else {
            "Outside the deadline."
        };

        Ok(ActionOutcome::finalized(
            ActionResult::new(within_deadline, feedback).with_data(data),
        ))
    }
}

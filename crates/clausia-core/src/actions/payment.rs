//! PaymentProcessing — full or partial payments adjusted by bonus and fine
//!
//! `totalDue = amount + unpaidBonus × rate/100 − unpaidFine × rate/100`
//! where the unpaid bonus/fine only count when `addBonus` / `addFine` are
//! set. The submitted payment is recorded under the clause label and
//! returned as a `payment` asset for the engine to persist.

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{amount, decode, number, present, Action, ActionOutcome, ActionResult, ActionType};
use crate::ledger::{asset_type, Record};
use crate::schema::{FieldKind, FieldSpec, Shape};
use crate::{DataBag, Error, Result};

pub const DEFAULT_LABEL: &str = "paymentMade";

const PARAMETERS: Shape = &[
    FieldSpec::new("name", "Payment label", FieldKind::Label),
    FieldSpec::new("amount", "Base amount", FieldKind::Number),
    FieldSpec::new("paymentRate", "Payment rate", FieldKind::Number),
    FieldSpec::new("partialPayment", "Partial payment", FieldKind::Boolean),
    FieldSpec::new("addBonus", "Add bonus", FieldKind::Boolean),
    FieldSpec::new("addFine", "Deduct fine", FieldKind::Boolean),
];

const INPUTS: Shape = &[
    FieldSpec::new("date", "Payment date", FieldKind::Date),
    FieldSpec::new("payment", "Payment", FieldKind::Number),
    FieldSpec::new("receiptHash", "Receipt hash", FieldKind::Sha256),
    FieldSpec::new("receiptUrl", "Receipt URL", FieldKind::String),
    FieldSpec::new("finalPayment", "Final payment", FieldKind::Boolean),
    FieldSpec::new("stripeToken", "Stripe token", FieldKind::String),
    FieldSpec::new("payPalTransactionID", "PayPal transaction ID", FieldKind::String),
];

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct View {
    name: String,
    amount: f64,
    payment_rate: f64,
    partial_payment: bool,
    add_bonus: bool,
    add_fine: bool,
    date: Option<String>,
    payment: Option<f64>,
    receipt_hash: Option<String>,
    receipt_url: Option<String>,
    final_payment: bool,
    stripe_token: Option<String>,
    #[serde(rename = "payPalTransactionID")]
    pay_pal_transaction_id: Option<String>,
}

impl View {
    fn label(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_LABEL
        } else {
            &self.name
        }
    }
}

/// Bonus and fine adjustments applied to this payment cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Adjustments {
    pub bonus: f64,
    pub fine: f64,
}

/// Amount due this cycle plus the bonus/fine share it settles
pub fn total_due(
    base_amount: f64,
    payment_rate: f64,
    contract_data: &DataBag,
    add_bonus: bool,
    add_fine: bool,
) -> (f64, Adjustments) {
    let rate = payment_rate / 100.0;
    let mut adjustments = Adjustments::default();
    if add_bonus {
        adjustments.bonus = (amount(contract_data, "bonus") - amount(contract_data, "bonusPaid")) * rate;
    }
    if add_fine {
        adjustments.fine = (amount(contract_data, "fine") - amount(contract_data, "finePaid")) * rate;
    }
    (base_amount + adjustments.bonus - adjustments.fine, adjustments)
}

/// Payment identity: the receipt hash when given, otherwise the SHA-256 of
/// the first provider token present, otherwise of `"<label>-<date>-<payment>"`.
///
/// The date keeps same-amount installments on one clause apart.
pub fn payment_hash(
    label: &str,
    payment: f64,
    date: Option<&str>,
    receipt_hash: Option<&str>,
    stripe_token: Option<&str>,
    pay_pal_transaction_id: Option<&str>,
) -> String {
    if let Some(hash) = receipt_hash {
        return hash.to_string();
    }
    let unique = match (stripe_token, pay_pal_transaction_id) {
        (Some(token), _) => token.to_string(),
        (None, Some(id)) => id.to_string(),
        (None, None) => format!("{}-{}-{:.6}", label, date.unwrap_or(""), payment),
    };
    let digest = Sha256::digest(unique.as_bytes());
    format!("{:x}", digest)
}

/// Records the submitted payment and settles it against the amount due
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentProcessing;

impl PaymentProcessing {
    /// Entry written under the clause label
    fn payment_entry(view: &View, payment: f64) -> DataBag {
        let mut entry = DataBag::new();
        if let Some(date) = present(&view.date) {
            entry.insert("date".into(), Value::String(date.to_string()));
        }
        entry.insert("payment".into(), number(payment));
        for (field, value) in [
            ("receiptHash", &view.receipt_hash),
            ("receiptUrl", &view.receipt_url),
            ("stripeToken", &view.stripe_token),
            ("payPalTransactionID", &view.pay_pal_transaction_id),
        ] {
            if let Some(value) = present(value) {
                entry.insert(field.into(), Value::String(value.to_string()));
            }
        }
        entry
    }

    /// The same payment is already on record under this label
    fn already_recorded(contract_data: &DataBag, label: &str, entry: &DataBag) -> bool {
        match contract_data.get(label) {
            Some(Value::Object(recorded)) => {
                let mut recorded = recorded.clone();
                recorded.remove("totalDue");
                &recorded == entry
            }
            _ => false,
        }
    }

    fn payment_asset(view: &View, label: &str, payment: f64) -> Record {
        let hash = payment_hash(
            label,
            payment,
            present(&view.date),
            present(&view.receipt_hash),
            present(&view.stripe_token),
            present(&view.pay_pal_transaction_id),
        );
        let mut asset = Record::new();
        asset.insert("@assetType".into(), Value::String(asset_type::PAYMENT.into()));
        asset.insert("hash".into(), Value::String(hash));
        asset.insert("name".into(), Value::String(label.to_string()));
        asset.insert("payment".into(), number(payment));
        if let Some(date) = present(&view.date) {
            asset.insert("date".into(), Value::String(date.to_string()));
        }
        for (field, value) in [
            ("receiptUrl", &view.receipt_url),
            ("stripeToken", &view.stripe_token),
            ("payPalTransactionID", &view.pay_pal_transaction_id),
        ] {
            if let Some(value) = present(value) {
                asset.insert(field.into(), Value::String(value.to_string()));
            }
        }
        asset
    }
}

impl Action for PaymentProcessing {
    fn action_type(&self) -> ActionType {
        ActionType::PaymentProcessing
    }

    fn parameter_shape(&self) -> Shape {
        PARAMETERS
    }

    fn input_shape(&self) -> Shape {
        INPUTS
    }

    fn execute(&self, inputs: &DataBag, contract_data: &DataBag) -> Result<ActionOutcome> {
        let view: View = decode(inputs, "payment arguments")?;

        let Some(payment) = view.payment else {
            return Ok(ActionOutcome::not_ready("Waiting for a payment to be submitted."));
        };
        if !payment.is_finite() || payment < 0.0 {
            return Err(Error::InvalidData(format!(
                "Payment must be a non-negative amount, got {}",
                payment
            )));
        }

        let label = view.label().to_string();
        let entry = Self::payment_entry(&view, payment);
        if Self::already_recorded(contract_data, &label, &entry) {
            return Ok(ActionOutcome::not_ready(format!(
                "Payment already recorded under '{}'; submit a new payment.",
                label
            )));
        }

        let (due, adjustments) = total_due(
            view.amount,
            view.payment_rate,
            contract_data,
            view.add_bonus,
            view.add_fine,
        );

        let mut data = DataBag::new();
        let mut recorded = entry;
        recorded.insert("totalDue".into(), number(due));
        data.insert(label.clone(), Value::Object(recorded));
        if view.add_bonus {
            data.insert(
                "bonusPaid".into(),
                number(amount(contract_data, "bonusPaid") + adjustments.bonus),
            );
        }
        if view.add_fine {
            data.insert(
                "finePaid".into(),
                number(amount(contract_data, "finePaid") + adjustments.fine),
            );
        }

        let (success, finalize, feedback) = if view.partial_payment {
            let threshold = due * view.payment_rate / 100.0;
            data.insert(
                "previousPartialPayment".into(),
                number(amount(contract_data, "previousPartialPayment") + payment),
            );
            let success = payment >= threshold;
            let feedback = if success {
                "Partial payment successful."
            } else {
                "Partial payment is less than expected. Payment incomplete."
            };
            (success, success || view.final_payment, feedback)
        } else {
            data.insert("paidAmount".into(), number(due));
            let success = payment >= due;
            let feedback = if success {
                "Full payment successful."
            } else {
                "Payment is less than the required amount. Payment incomplete."
            };
            (success, true, feedback)
        };

        let result = ActionResult::new(success, feedback)
            .with_data(data)
            .with_asset(Self::payment_asset(&view, &label, payment));

        Ok(if finalize {
            ActionOutcome::finalized(result)
        } else {
            ActionOutcome::pending(result)
        })
    }
}

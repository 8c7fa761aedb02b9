//! Ledger transactions — the entry points a dispatcher invokes
//!
//! Each function is one ledger transaction: it runs against a
//! [`StagedLedger`](crate::ledger::StagedLedger) and commits only when it
//! returns `Ok`. Payloads are filtered down to the declared shape of the
//! clause's action before they touch the ledger.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::actions::{self, credit::Review, ActionType};
use crate::contract::LoadedContract;
use crate::engine::{Engine, ExecutionReport};
use crate::ledger::{asset_type, transact, AssetKey, Ledger, Record, Selector};
use crate::merge::{extract_dates, insert_dates_unique, remove_unexisting, sanitize_keys};
use crate::schema::{filter_fields, format_date, parse_date, FieldKind, Shape};
use crate::{Clause, Contract, DataBag, Error, Result};

// ── Users ─────────────────────────────────────────────────

/// Register a user that can own or take part in contracts
pub fn create_user(ledger: &mut dyn Ledger, id: &str, name: &str) -> Result<Record> {
    if id.trim().is_empty() {
        return Err(Error::BadRequest("User id must not be empty".into()));
    }
    transact(ledger, |tx| {
        let mut record = Record::new();
        record.insert("@assetType".into(), json!(asset_type::USER));
        record.insert("id".into(), json!(id.trim()));
        record.insert("name".into(), json!(name));
        tx.put_new(record)
    })
}

pub(crate) fn require_users(ledger: &dyn Ledger, users: &[AssetKey]) -> Result<()> {
    for user in users {
        if user.asset_type != asset_type::USER {
            return Err(Error::BadRequest(format!(
                "Reference '{}' must point to a user",
                user
            )));
        }
        ledger.get(user)?;
    }
    Ok(())
}

// ── Contracts ─────────────────────────────────────────────

/// Payload for [`create_contract`]
#[derive(Debug, Clone, Default)]
pub struct NewContract {
    pub name: String,
    pub signature_date: String,
    pub owner: AssetKey,
    pub participants: Vec<AssetKey>,
    pub data: DataBag,
}

pub fn create_contract(ledger: &mut dyn Ledger, new: NewContract) -> Result<Contract> {
    if new.name.trim().is_empty() {
        return Err(Error::BadRequest("Contract name must not be empty".into()));
    }
    let signature = format_date(&parse_date(&new.signature_date).map_err(|_| {
        Error::BadRequest(format!("Invalid signature date '{}'", new.signature_date))
    })?);

    transact(ledger, |tx| {
        require_users(&*tx, std::slice::from_ref(&new.owner))?;
        require_users(&*tx, &new.participants)?;

        let mut dates = DataBag::new();
        dates.insert("signature".into(), json!(signature));

        let contract = json!({
            "@assetType": asset_type::CONTRACT,
            "name": new.name.trim(),
            "signatureDate": signature,
            "owner": new.owner.to_value(),
            "participants": new.participants.iter().map(AssetKey::to_value).collect::<Vec<_>>(),
            "clauses": [],
            "data": sanitize_keys(&new.data),
            "dates": dates,
        });
        let Value::Object(record) = contract else {
            return Err(Error::InvalidData("Contract record is not an object".into()));
        };
        let stored = tx
            .put_new(record)
            .map_err(|e| e.context("Failed to write contract asset to the ledger"))?;
        info!(contract = ?stored.get("@key"), "contract created");
        Contract::from_record(stored)
    })
}

/// Replace the contract's participant list
pub fn add_participants(
    ledger: &mut dyn Ledger,
    contract: &AssetKey,
    participants: Vec<AssetKey>,
) -> Result<Contract> {
    transact(ledger, |tx| {
        require_users(&*tx, &participants)?;
        let refs: Vec<Value> = participants.iter().map(AssetKey::to_value).collect();
        let mut patch = DataBag::new();
        patch.insert("participants".into(), Value::Array(refs));
        let updated = tx.update(&contract_key(contract), patch)?;
        Contract::from_record(updated)
    })
}

/// Attach the contract's single review to its data bag
pub fn add_review_to_contract(
    ledger: &mut dyn Ledger,
    contract: &AssetKey,
    rating: f64,
    comments: &str,
) -> Result<Contract> {
    if !(0.0..=5.0).contains(&rating) {
        return Err(Error::BadRequest(format!(
            "Review rating must be between 0 and 5, got {}",
            rating
        )));
    }
    let review = Review {
        rating,
        comments: comments.to_string(),
    };

    transact(ledger, |tx| {
        let key = contract_key(contract);
        let current = Contract::from_record(tx.get(&key)?)?;
        if current.data.get("review").is_some_and(Value::is_object) {
            return Err(Error::BadRequest(
                "Contract already contains a review; cannot add a new review".into(),
            ));
        }
        let mut data = current.data;
        data.insert(
            "review".into(),
            json!({"rating": review.rating, "comments": review.comments}),
        );
        let mut patch = DataBag::new();
        patch.insert("data".into(), Value::Object(data));
        Contract::from_record(tx.update(&key, patch)?)
    })
}

fn contract_key(key: &AssetKey) -> AssetKey {
    AssetKey::new(asset_type::CONTRACT, key.key.clone())
}

// ── Clauses ───────────────────────────────────────────────

/// Payload for [`add_clause`]
#[derive(Debug, Clone)]
pub struct NewClause {
    pub id: String,
    pub description: String,
    pub category: String,
    pub action_type: ActionType,
    pub parameters: DataBag,
    pub input: DataBag,
    pub dependencies: Vec<AssetKey>,
}

impl NewClause {
    pub fn new(id: impl Into<String>, action_type: ActionType) -> Self {
        NewClause {
            id: id.into(),
            description: String::new(),
            category: String::new(),
            action_type,
            parameters: DataBag::new(),
            input: DataBag::new(),
            dependencies: Vec::new(),
        }
    }

    /// Decode a `{id, actionType, description?, category?, parameters?,
    /// input?, dependencies?}` object; dependencies are references or keys
    pub fn from_value(value: &Value) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload {
            id: String,
            action_type: ActionType,
            #[serde(default)]
            description: String,
            #[serde(default)]
            category: String,
            #[serde(default)]
            parameters: DataBag,
            #[serde(default)]
            input: DataBag,
            #[serde(default)]
            dependencies: Vec<Value>,
        }

        let payload = Payload::deserialize(value)
            .map_err(|e| Error::BadRequest(format!("Malformed clause payload: {}", e)))?;
        let dependencies = payload
            .dependencies
            .iter()
            .map(AssetKey::from_value)
            .collect::<Result<Vec<_>>>()?;
        Ok(NewClause {
            id: payload.id,
            description: payload.description,
            category: payload.category,
            action_type: payload.action_type,
            parameters: payload.parameters,
            input: payload.input,
            dependencies,
        })
    }
}

pub(crate) fn shapes(action_type: ActionType) -> (Shape, Shape) {
    match actions::get(action_type) {
        Some(handler) => (handler.parameter_shape(), handler.input_shape()),
        None => (&[], &[]),
    }
}

/// Labels become contract data keys and are joined with clause fields
/// before dispatch, so a label may not reuse any field tag.
pub(crate) fn check_labels(parameters: &DataBag, shape: Shape) -> Result<()> {
    for spec in shape.iter().filter(|spec| spec.kind == FieldKind::Label) {
        let Some(label) = parameters.get(spec.tag).and_then(Value::as_str) else {
            continue;
        };
        let taken = ActionType::ALL.into_iter().any(|action_type| {
            let (parameters, inputs) = shapes(action_type);
            parameters.iter().chain(inputs).any(|field| field.tag == label)
        });
        if taken {
            return Err(Error::BadRequest(format!(
                "Label '{}' collides with a clause field",
                label
            )));
        }
    }
    Ok(())
}

/// Create a clause and append it to the contract
pub fn add_clause(
    ledger: &mut dyn Ledger,
    contract: &AssetKey,
    new: NewClause,
) -> Result<(Contract, Clause)> {
    transact(ledger, |tx| add_clause_in(tx, contract, new))
}

/// Append several clauses in order; any rejected clause rolls back the batch
pub fn add_clauses(
    ledger: &mut dyn Ledger,
    contract: &AssetKey,
    clauses: Vec<NewClause>,
) -> Result<Contract> {
    transact(ledger, |tx| {
        let mut current = Contract::from_record(tx.get(&contract_key(contract))?)?;
        for new in clauses {
            let id = new.id.clone();
            let (updated, _) = add_clause_in(tx, contract, new)
                .map_err(|e| e.context(format!("Failed to add clause '{}'", id)))?;
            current = updated;
        }
        Ok(current)
    })
}

fn add_clause_in(
    tx: &mut dyn Ledger,
    contract: &AssetKey,
    new: NewClause,
) -> Result<(Contract, Clause)> {
    if new.id.trim().is_empty() {
        return Err(Error::BadRequest("Clause id must not be empty".into()));
    }
    let (parameter_shape, input_shape) = shapes(new.action_type);
    let parameters = filter_fields(&sanitize_keys(&new.parameters), parameter_shape)?;
    let input = filter_fields(&sanitize_keys(&new.input), input_shape)?;
    check_labels(&parameters, parameter_shape)?;

    let key = contract_key(contract);
    let mut current = Contract::from_record(tx.get(&key)?)?;

    let existing: BTreeSet<String> = current.clauses.iter().map(|c| c.key.clone()).collect();
    let (dependencies, dropped) = remove_unexisting(new.dependencies, &existing);
    for stale in &dropped {
        warn!(contract = %key, dependency = %stale, "dropping dependency outside the contract");
    }

    let clause = Clause {
        asset_type: asset_type::CLAUSE.to_string(),
        key: String::new(),
        id: new.id.trim().to_string(),
        description: new.description,
        category: new.category,
        executable: new.action_type.is_executable(),
        finalized: false,
        action_type: new.action_type,
        parameters: parameters.clone(),
        input: input.clone(),
        dependencies,
        result: None,
    };
    let mut record = clause.to_record()?;
    record.remove("@key");
    let stored = tx
        .put_new(record)
        .map_err(|e| e.context("Failed to save clause asset on ledger"))?;
    let clause = Clause::from_record(stored)?;

    current.clauses.push(clause.asset_key());
    insert_dates_unique(&mut current.dates, extract_dates(&[&parameters, &input]));

    let mut patch = DataBag::new();
    patch.insert(
        "clauses".into(),
        Value::Array(current.clauses.iter().map(AssetKey::to_value).collect()),
    );
    patch.insert("dates".into(), Value::Object(current.dates));
    let updated = tx
        .update(&key, patch)
        .map_err(|e| e.context("Failed to update contract asset with new clause"))?;

    info!(contract = %key, clause = %clause.key, action = %clause.action_type, "clause added");
    Ok((Contract::from_record(updated)?, clause))
}

/// Detach a clause from its contract and delete it
pub fn remove_clause(
    ledger: &mut dyn Ledger,
    contract: &AssetKey,
    clause: &AssetKey,
) -> Result<Contract> {
    transact(ledger, |tx| {
        let key = contract_key(contract);
        let mut current = Contract::from_record(tx.get(&key)?)?;
        tx.get(clause)?;

        let before = current.clauses.len();
        current.clauses.retain(|c| c.key != clause.key);
        if current.clauses.len() == before {
            return Err(Error::BadRequest("Clause does not belong to contract".into()));
        }

        let mut patch = DataBag::new();
        patch.insert(
            "clauses".into(),
            Value::Array(current.clauses.iter().map(AssetKey::to_value).collect()),
        );
        let updated = tx
            .update(&key, patch)
            .map_err(|e| e.context("Failed to update contract asset in ledger"))?;
        tx.delete(clause)
            .map_err(|e| e.context("Failed to delete clause"))?;

        info!(contract = %key, clause = %clause, "clause removed");
        Contract::from_record(updated)
    })
}

/// Replace a clause's dependency list; every dependency must belong to the
/// same contract and the new edges must not close a cycle.
pub fn set_clause_dependencies(
    ledger: &mut dyn Ledger,
    clause: &AssetKey,
    dependencies: Vec<AssetKey>,
) -> Result<Clause> {
    transact(ledger, |tx| {
        let owner = find_contract_for_clause(&*tx, clause)?;
        let loaded = LoadedContract::load(&*tx, &owner.asset_key())?;

        for dependency in &dependencies {
            if loaded.get_clause(dependency).is_none() {
                return Err(Error::BadRequest(format!(
                    "Clause does not belong to contract: '{}'",
                    dependency
                )));
            }
        }

        let mut graph: BTreeMap<String, Vec<String>> = loaded
            .clauses()
            .map(|c| {
                let deps = c.dependencies.iter().map(|d| d.key.clone()).collect();
                (c.key.clone(), deps)
            })
            .collect();
        graph.insert(
            clause.key.clone(),
            dependencies.iter().map(|d| d.key.clone()).collect(),
        );
        if let Some(cycle) = find_cycle(&graph, &clause.key) {
            return Err(Error::DependencyCycle(cycle));
        }

        let mut patch = DataBag::new();
        patch.insert(
            "dependencies".into(),
            Value::Array(dependencies.iter().map(AssetKey::to_value).collect()),
        );
        Clause::from_record(tx.update(clause, patch)?)
    })
}

/// Path from `start` back to itself, if the graph has one
pub(crate) fn find_cycle(graph: &BTreeMap<String, Vec<String>>, start: &str) -> Option<Vec<String>> {
    fn dfs(
        graph: &BTreeMap<String, Vec<String>>,
        node: &str,
        start: &str,
        path: &mut Vec<String>,
        seen: &mut BTreeSet<String>,
    ) -> bool {
        for next in graph.get(node).into_iter().flatten() {
            if next == start {
                path.push(next.clone());
                return true;
            }
            if seen.insert(next.clone()) {
                path.push(next.clone());
                if dfs(graph, next, start, path, seen) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    let mut path = vec![start.to_string()];
    let mut seen = BTreeSet::new();
    dfs(graph, start, start, &mut path, &mut seen).then_some(path)
}

// ── Clause Inputs ─────────────────────────────────────────

/// Merge shape-filtered values into a clause's `input`
pub fn add_inputs_to_clause(
    ledger: &mut dyn Ledger,
    clause: &AssetKey,
    inputs: DataBag,
) -> Result<Clause> {
    transact(ledger, |tx| set_inputs(tx, clause, None, inputs))
}

fn set_inputs(
    tx: &mut dyn Ledger,
    key: &AssetKey,
    expected: Option<ActionType>,
    inputs: DataBag,
) -> Result<Clause> {
    let clause = Clause::from_record(tx.get(key)?)?;
    if let Some(expected) = expected {
        if clause.action_type != expected {
            return Err(Error::BadRequest(format!(
                "Action type is not {} (clause '{}' is {})",
                expected, clause.id, clause.action_type
            )));
        }
    }
    if clause.finalized {
        warn!(clause = %key, "adding inputs to a finalized clause has no effect on execution");
    }

    let (_, input_shape) = shapes(clause.action_type);
    let filtered = filter_fields(&sanitize_keys(&inputs), input_shape)?;
    if filtered.is_empty() {
        return Err(Error::BadRequest(format!(
            "No accepted input fields for a {} clause",
            clause.action_type
        )));
    }

    let mut input = clause.input;
    for (field, value) in filtered {
        input.insert(field, value);
    }
    let mut patch = DataBag::new();
    patch.insert("input".into(), Value::Object(input));
    let updated = tx
        .update(key, patch)
        .map_err(|e| e.context("Failed to update clause"))?;
    Clause::from_record(updated)
}

fn to_bag<T: Serialize>(value: &T) -> Result<DataBag> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidData("Inputs did not serialize to an object".into())),
    }
}

/// Evaluated date of a date-interval check
pub fn add_evaluated_date(ledger: &mut dyn Ledger, clause: &AssetKey, date: &str) -> Result<Clause> {
    let mut inputs = DataBag::new();
    inputs.insert("evaluatedDate".into(), json!(date));
    transact(ledger, |tx| {
        set_inputs(tx, clause, Some(ActionType::DateIntervalCheck), inputs)
    })
}

/// Reference date override of a date-interval check
pub fn add_reference_date(ledger: &mut dyn Ledger, clause: &AssetKey, date: &str) -> Result<Clause> {
    let mut inputs = DataBag::new();
    inputs.insert("referenceDate".into(), json!(date));
    transact(ledger, |tx| {
        set_inputs(tx, clause, Some(ActionType::DateIntervalCheck), inputs)
    })
}

/// Inputs of a fine calculation
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FineInputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_clause_days: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_clause_name: Option<String>,
}

pub fn add_fine_inputs(ledger: &mut dyn Ledger, clause: &AssetKey, inputs: FineInputs) -> Result<Clause> {
    let inputs = to_bag(&inputs)?;
    transact(ledger, |tx| {
        set_inputs(tx, clause, Some(ActionType::FineCalculation), inputs)
    })
}

/// Stored value a credit percentage applies to
pub fn add_stored_value(ledger: &mut dyn Ledger, clause: &AssetKey, value: f64) -> Result<Clause> {
    let mut inputs = DataBag::new();
    inputs.insert("storedValue".into(), json!(value));
    transact(ledger, |tx| {
        set_inputs(tx, clause, Some(ActionType::CreditCalculation), inputs)
    })
}

/// A submitted payment
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInputs {
    pub date: String,
    pub payment: f64,
    pub final_payment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_token: Option<String>,
    #[serde(rename = "payPalTransactionID", skip_serializing_if = "Option::is_none")]
    pub pay_pal_transaction_id: Option<String>,
}

/// Submit a payment and record its date on the owning contract
pub fn add_payment_inputs(
    ledger: &mut dyn Ledger,
    clause: &AssetKey,
    inputs: PaymentInputs,
) -> Result<Clause> {
    let inputs = to_bag(&inputs)?;
    transact(ledger, |tx| {
        let owner = find_contract_for_clause(&*tx, clause)?;
        let updated = set_inputs(tx, clause, Some(ActionType::PaymentProcessing), inputs)?;

        let label = updated
            .parameters
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(actions::payment::DEFAULT_LABEL)
            .to_string();
        let mut dates = owner.dates.clone();
        if let Some(date) = updated.input.get("date") {
            dates.insert(label, date.clone());
        }
        let mut patch = DataBag::new();
        patch.insert("dates".into(), Value::Object(dates));
        tx.update(&owner.asset_key(), patch)
            .map_err(|e| e.context("Failed to update contract asset"))?;
        Ok(updated)
    })
}

// ── Execution ─────────────────────────────────────────────

/// Run the engine over a contract
pub fn execute_contract(ledger: &mut dyn Ledger, contract: &AssetKey) -> Result<ExecutionReport> {
    Engine::new(ledger).execute_contract(&contract_key(contract))
}

/// How a cancellation is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// Cancel unconditionally
    Force,
    /// Cancel when the clause's cancellation condition holds
    Requested,
}

impl Cancellation {
    /// Exactly one of the two flags must be set
    pub fn from_flags(force: bool, requested: bool) -> Result<Self> {
        match (force, requested) {
            (true, false) => Ok(Cancellation::Force),
            (false, true) => Ok(Cancellation::Requested),
            (false, false) => Err(Error::BadRequest(
                "Please provide a condition to cancel the contract".into(),
            )),
            (true, true) => Err(Error::BadRequest(
                "Please provide only one condition to cancel the contract".into(),
            )),
        }
    }

    fn parameter(self) -> &'static str {
        match self {
            Cancellation::Force => "forceCancellation",
            Cancellation::Requested => "requestedCancellation",
        }
    }
}

/// Flag a finalization clause for cancellation and execute it
pub fn cancel_contract(
    ledger: &mut dyn Ledger,
    clause: &AssetKey,
    cancellation: Cancellation,
) -> Result<ExecutionReport> {
    transact(ledger, |tx| {
        let current = Clause::from_record(tx.get(clause)?)?;
        if current.action_type != ActionType::ContractFinalization {
            return Err(Error::BadRequest(
                "Action type must be contractFinalization to cancel a contract".into(),
            ));
        }
        let owner = find_contract_for_clause(&*tx, clause)?;

        let mut parameters = current.parameters;
        parameters.insert(cancellation.parameter().into(), Value::Bool(true));
        let mut patch = DataBag::new();
        patch.insert("parameters".into(), Value::Object(parameters));
        tx.update(clause, patch)
            .map_err(|e| e.context("Failed to update clause asset in ledger"))?;

        info!(contract = %owner.key, clause = %clause, ?cancellation, "cancellation requested");
        Engine::new(tx).execute_clause(&owner.asset_key(), clause)
    })
}

// ── Queries ───────────────────────────────────────────────

/// The contract whose clause list references `clause`
pub fn find_contract_for_clause(ledger: &dyn Ledger, clause: &AssetKey) -> Result<Contract> {
    let selector = Selector::asset_type(asset_type::CONTRACT).with_reference("clauses", clause.clone());
    match ledger.search(&selector)?.into_iter().next() {
        Some(record) => Contract::from_record(record),
        None => Err(Error::BadRequest(format!(
            "Clause '{}' is not associated with any contract",
            clause
        ))),
    }
}

/// Contracts with at least one executable, unfinalized clause
pub fn contracts_with_executable_clauses(ledger: &dyn Ledger) -> Result<Vec<Contract>> {
    let mut found = Vec::new();
    for record in ledger.search(&Selector::asset_type(asset_type::CONTRACT))? {
        let key = AssetKey::of_record(&record)?;
        let loaded = LoadedContract::load(ledger, &key)?;
        if loaded.has_executable_clauses() {
            found.push(loaded.contract);
        }
    }
    Ok(found)
}

// ── Tests ─────────────────────────────────────────────────

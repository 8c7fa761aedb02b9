//! Execution engine — depth-first, dependency-ordered clause execution
//!
//! # Walk
//!
//! For each clause in contract order:
//!
//! 1. Skip it when finalized, non-executable, or already handled this walk.
//! 2. Walk its dependencies first (same procedure, recursively). A
//!    dependency outside the contract is a structural error; a dependency
//!    chain that loops back is a [`Error::DependencyCycle`].
//! 3. Build the handler view with `join_maps(&[data, input, parameters])`.
//! 4. Dispatch through [`actions::get`] and run the handler.
//! 5. Persist generated assets with back references to contract and clause.
//! 6. Merge the handler's patch into the shared data bag.
//! 7. Write the clause's `finalized` and `result` fields.
//!
//! After the walk the data bag is written to the contract once.
//!
//! # Atomicity
//!
//! A walk runs inside [`ledger::transact`]: the first error aborts it and
//! nothing is committed, so a retried invocation starts from the same state.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::actions::{self, ActionType};
use crate::contract::LoadedContract;
use crate::ledger::{self, AssetKey, Ledger};
use crate::merge::{join_maps, merge_into};
use crate::{Clause, ClauseResult, Contract, DataBag, Error, Result};

// ── Execution Report ──────────────────────────────────────

/// One clause execution within a walk
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClauseExecution {
    /// Position in the walk (0-indexed)
    pub sequence: u64,
    pub clause: AssetKey,
    pub id: String,
    pub action_type: String,
    pub success: bool,
    pub finalized: bool,
    pub feedback: String,
    /// Data-bag keys whose value changed
    pub changed_keys: Vec<String>,
    /// Keys of assets generated by the handler
    pub assets: Vec<AssetKey>,
}

/// Result of one engine invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Contract as committed
    pub contract: Contract,
    /// Clause executions in the order they ran
    pub executions: Vec<ClauseExecution>,
}

impl ExecutionReport {
    /// Clauses that reached the terminal state in this walk
    pub fn finalized(&self) -> impl Iterator<Item = &ClauseExecution> {
        self.executions.iter().filter(|e| e.finalized)
    }

    pub fn execution(&self, id: &str) -> Option<&ClauseExecution> {
        self.executions.iter().find(|e| e.id == id)
    }
}

// ── Engine ────────────────────────────────────────────────

/// Runs contracts against a ledger
pub struct Engine<'l> {
    ledger: &'l mut dyn Ledger,
}

impl<'l> Engine<'l> {
    pub fn new(ledger: &'l mut dyn Ledger) -> Self {
        Engine { ledger }
    }

    /// Walk every clause of the contract
    pub fn execute_contract(&mut self, contract: &AssetKey) -> Result<ExecutionReport> {
        ledger::transact(&mut *self.ledger, |tx| {
            let loaded = LoadedContract::load(&*tx, contract)?;
            let roots: Vec<AssetKey> = loaded.contract.clauses.clone();
            Walk::new(tx, loaded).run(&roots)
        })
    }

    /// Walk a single clause of the contract (and its dependencies)
    pub fn execute_clause(
        &mut self,
        contract: &AssetKey,
        clause: &AssetKey,
    ) -> Result<ExecutionReport> {
        ledger::transact(&mut *self.ledger, |tx| {
            let loaded = LoadedContract::load(&*tx, contract)?;
            if loaded.get_clause(clause).is_none() {
                return Err(not_in_contract(clause, &loaded.contract));
            }
            Walk::new(tx, loaded).run(std::slice::from_ref(clause))
        })
    }
}

fn not_in_contract(clause: &AssetKey, contract: &Contract) -> Error {
    Error::BadRequest(format!(
        "Clause does not belong to contract: '{}' is not part of '{}'",
        clause, contract.key
    ))
}

/// State of one walk over a loaded contract
struct Walk<'a> {
    ledger: &'a mut dyn Ledger,
    loaded: LoadedContract,
    data: DataBag,
    done: BTreeSet<String>,
    visiting: Vec<String>,
    executions: Vec<ClauseExecution>,
}

impl<'a> Walk<'a> {
    fn new(ledger: &'a mut dyn Ledger, loaded: LoadedContract) -> Self {
        let data = loaded.contract.data.clone();
        Walk {
            ledger,
            loaded,
            data,
            done: BTreeSet::new(),
            visiting: Vec::new(),
            executions: Vec::new(),
        }
    }

    fn run(mut self, roots: &[AssetKey]) -> Result<ExecutionReport> {
        let contract_key = self.loaded.contract.asset_key();
        info!(contract = %contract_key, roots = roots.len(), "executing contract");

        for root in roots {
            self.visit(root)?;
        }

        let mut patch = DataBag::new();
        patch.insert("data".into(), Value::Object(self.data));
        let record = self
            .ledger
            .update(&contract_key, patch)
            .map_err(|e| e.context(format!("Failed to update contract '{}'", contract_key)))?;

        info!(
            contract = %contract_key,
            executed = self.executions.len(),
            "contract walk complete"
        );

        Ok(ExecutionReport {
            contract: Contract::from_record(record)?,
            executions: self.executions,
        })
    }

    fn visit(&mut self, key: &AssetKey) -> Result<()> {
        if self.done.contains(&key.key) {
            return Ok(());
        }
        if let Some(start) = self.visiting.iter().position(|k| *k == key.key) {
            let mut cycle = self.visiting[start..].to_vec();
            cycle.push(key.key.clone());
            return Err(Error::DependencyCycle(cycle));
        }

        let clause = match self.loaded.get_clause(key) {
            Some(clause) => clause.clone(),
            None => return Err(not_in_contract(key, &self.loaded.contract)),
        };
        if !clause.is_runnable() {
            self.done.insert(key.key.clone());
            return Ok(());
        }

        self.visiting.push(key.key.clone());
        for dependency in &clause.dependencies {
            self.visit(dependency)?;
        }
        self.visiting.pop();

        self.execute(&clause)?;
        self.done.insert(key.key.clone());
        Ok(())
    }

    fn execute(&mut self, clause: &Clause) -> Result<()> {
        let Some(handler) = actions::get(clause.action_type) else {
            warn!(clause = %clause.key, "executable clause has no action; skipped");
            return Ok(());
        };

        let view = join_maps(&[&self.data, &clause.input, &clause.parameters]);
        debug!(
            clause = %clause.key,
            id = %clause.id,
            action = %clause.action_type,
            "dispatching clause"
        );

        let outcome = handler.execute(&view, &self.data).inspect_err(|e| {
            warn!(clause = %clause.key, error = %e, "clause execution failed");
        })?;

        let assets = self.save_assets(clause, outcome.result.assets)?;
        let changed_keys = merge_into(&mut self.data, outcome.result.data);

        let result = ClauseResult {
            success: outcome.result.success,
            feedback: outcome.result.feedback,
        };
        self.update_clause(clause, outcome.finalize, &result)?;

        if !outcome.finalize {
            warn!(clause = %clause.key, feedback = %result.feedback, "clause left pending");
        }

        self.executions.push(ClauseExecution {
            sequence: self.executions.len() as u64,
            clause: clause.asset_key(),
            id: clause.id.clone(),
            action_type: action_name(clause.action_type),
            success: result.success,
            finalized: outcome.finalize,
            feedback: result.feedback,
            changed_keys,
            assets,
        });
        Ok(())
    }

    /// Store generated assets tagged with their originating contract and clause
    fn save_assets(&mut self, clause: &Clause, assets: Vec<ledger::Record>) -> Result<Vec<AssetKey>> {
        let contract_ref = self.loaded.contract.asset_key().to_value();
        let clause_ref = clause.asset_key().to_value();

        let mut keys = Vec::with_capacity(assets.len());
        for mut asset in assets {
            asset.insert(ledger::asset_type::CONTRACT.into(), contract_ref.clone());
            asset.insert(ledger::asset_type::CLAUSE.into(), clause_ref.clone());
            let stored = self.ledger.put_new(asset).map_err(|e| {
                e.context(format!(
                    "Failed to save generated asset for clause '{}'",
                    clause.id
                ))
            })?;
            keys.push(AssetKey::of_record(&stored)?);
        }
        Ok(keys)
    }

    fn update_clause(&mut self, clause: &Clause, finalize: bool, result: &ClauseResult) -> Result<()> {
        let mut patch = DataBag::new();
        patch.insert("finalized".into(), Value::Bool(finalize));
        patch.insert("result".into(), serde_json::to_value(result)?);
        self.ledger
            .update(&clause.asset_key(), patch)
            .map_err(|e| e.context(format!("Failed to update clause '{}'", clause.id)))?;

        if let Some(loaded) = self.loaded.get_clause_mut(&clause.asset_key()) {
            loaded.finalized = finalize;
            loaded.result = Some(result.clone());
        }
        Ok(())
    }
}

fn action_name(action_type: ActionType) -> String {
    action_type.name().to_string()
}

// ── Tests ─────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, Selector};
    use serde_json::json;

    // ── Helpers ───────────────────────────────────────────

    fn clause(
        ledger: &mut MemoryLedger,
        id: &str,
        action: ActionType,
        parameters: Value,
        input: Value,
        dependencies: &[&AssetKey],
    ) -> AssetKey {
        let deps: Vec<Value> = dependencies.iter().map(|d| d.to_value()).collect();
        let record = json!({
            "@assetType": "clause",
            "id": id,
            "actionType": action.code(),
            "executable": action.is_executable(),
            "finalized": false,
            "parameters": parameters,
            "input": input,
            "dependencies": deps,
        });
        let stored = ledger.put_new(record.as_object().cloned().unwrap()).unwrap();
        AssetKey::of_record(&stored).unwrap()
    }

    fn contract(ledger: &mut MemoryLedger, clauses: &[&AssetKey]) -> AssetKey {
        let refs: Vec<Value> = clauses.iter().map(|c| c.to_value()).collect();
        let record = json!({
            "@assetType": "autoExecutableContract",
            "name": "supply",
            "owner": {"@assetType": "user", "@key": "user:owner"},
            "clauses": refs,
            "data": {},
        });
        let stored = ledger.put_new(record.as_object().cloned().unwrap()).unwrap();
        AssetKey::of_record(&stored).unwrap()
    }

    fn date_check(ledger: &mut MemoryLedger, evaluated: Option<&str>) -> AssetKey {
        let input = match evaluated {
            Some(date) => json!({"evaluatedDate": date}),
            None => json!({}),
        };
        clause(
            ledger,
            "delivery-check",
            ActionType::DateIntervalCheck,
            json!({
                "name": "delivery",
                "intervalType": "days",
                "deadlineInterval": 10,
                "direction": "before",
                "referenceDate": "2024-01-01T00:00:00Z",
            }),
            input,
            &[],
        )
    }

    fn late_fine(ledger: &mut MemoryLedger, deps: &[&AssetKey]) -> AssetKey {
        clause(
            ledger,
            "late-fine",
            ActionType::FineCalculation,
            json!({"fineName": "lateDelivery"}),
            json!({
                "referenceValue": 200,
                "dailyPercentage": 10,
                "referenceClauseDays": true,
                "referenceClauseName": "delivery",
            }),
            deps,
        )
    }

    fn stored_clause(ledger: &MemoryLedger, key: &AssetKey) -> Clause {
        Clause::from_record(ledger.get(key).unwrap()).unwrap()
    }

    // ── Ordering ──────────────────────────────────────────

    #[test]
    fn test_dependency_runs_before_dependent() {
        let mut ledger = MemoryLedger::new();
        let check = date_check(&mut ledger, Some("2023-12-25T00:00:00Z"));
        let fine = late_fine(&mut ledger, &[&check]);
        // dependent listed first
        let contract_key = contract(&mut ledger, &[&fine, &check]);

        let report = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();

        let ids: Vec<&str> = report.executions.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["delivery-check", "late-fine"]);
        assert_eq!(report.contract.data["delivery"]["daysFromDeadline"], json!(3));
        assert_eq!(report.contract.data["fine"], json!(60.0));
        assert_eq!(report.finalized().count(), 2);

        let fine_clause = stored_clause(&ledger, &fine);
        assert!(fine_clause.finalized);
        assert!(fine_clause.result.unwrap().success);
    }

    #[test]
    fn test_two_dependencies_reflected_before_payment() {
        let mut ledger = MemoryLedger::new();
        let fine = clause(
            &mut ledger,
            "fine",
            ActionType::FineCalculation,
            json!({}),
            json!({"referenceValue": 1000, "dailyPercentage": 1, "days": 5}),
            &[],
        );
        let credit = clause(
            &mut ledger,
            "credit",
            ActionType::CreditCalculation,
            json!({"imposeCredit": true, "predefinedValue": 30}),
            json!({}),
            &[],
        );
        let payment = clause(
            &mut ledger,
            "payment",
            ActionType::PaymentProcessing,
            json!({
                "name": "rent",
                "amount": 1000,
                "paymentRate": 100,
                "addBonus": true,
                "addFine": true,
            }),
            json!({"payment": 980, "date": "2024-02-01T00:00:00Z"}),
            &[&fine, &credit],
        );
        let contract_key = contract(&mut ledger, &[&payment, &fine, &credit]);

        let report = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();

        let paid = report.execution("payment").unwrap();
        assert!(paid.success);
        assert!(paid.finalized);
        assert_eq!(report.contract.data["paidAmount"], json!(980.0));
        assert_eq!(report.contract.data["bonusPaid"], json!(30.0));
        assert_eq!(report.contract.data["finePaid"], json!(50.0));
        assert_eq!(report.executions.len(), 3);
    }

    #[test]
    fn test_shared_dependency_runs_once() {
        let mut ledger = MemoryLedger::new();
        let check = date_check(&mut ledger, Some("2023-12-25T00:00:00Z"));
        let first = late_fine(&mut ledger, &[&check]);
        let second = clause(
            &mut ledger,
            "second-fine",
            ActionType::FineCalculation,
            json!({"fineName": "again"}),
            json!({
                "referenceValue": 100,
                "dailyPercentage": 10,
                "referenceClauseDays": true,
                "referenceClauseName": "delivery",
            }),
            &[&check],
        );
        let contract_key = contract(&mut ledger, &[&first, &second, &check]);

        let report = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();
        let checks = report
            .executions
            .iter()
            .filter(|e| e.id == "delivery-check")
            .count();
        assert_eq!(checks, 1);
        // 60 + 30
        assert_eq!(report.contract.data["fine"], json!(90.0));
        assert_eq!(
            report.contract.data["listOfFines"].as_array().unwrap().len(),
            2
        );
    }

    // ── Idempotence ───────────────────────────────────────

    #[test]
    fn test_finalized_clause_never_reruns() {
        let mut ledger = MemoryLedger::new();
        let fine = clause(
            &mut ledger,
            "fine",
            ActionType::FineCalculation,
            json!({}),
            json!({"referenceValue": 1000, "dailyPercentage": 1, "days": 5}),
            &[],
        );
        let contract_key = contract(&mut ledger, &[&fine]);

        let first = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();
        assert_eq!(first.contract.data["fine"], json!(50.0));
        let versions = ledger.history(&fine).unwrap().len();
        let before = stored_clause(&ledger, &fine);

        let second = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();
        assert!(second.executions.is_empty());
        assert_eq!(second.contract.data["fine"], json!(50.0));
        assert_eq!(ledger.history(&fine).unwrap().len(), versions);

        // reload from serialized records and walk again
        let mut reloaded: MemoryLedger =
            serde_json::from_str(&serde_json::to_string(&ledger).unwrap()).unwrap();
        Engine::new(&mut reloaded).execute_contract(&contract_key).unwrap();
        let after = stored_clause(&reloaded, &fine);
        assert_eq!(after.finalized, before.finalized);
        assert_eq!(after.result, before.result);
    }

    #[test]
    fn test_not_ready_clause_stays_pending_then_runs() {
        let mut ledger = MemoryLedger::new();
        let check = date_check(&mut ledger, None);
        let contract_key = contract(&mut ledger, &[&check]);

        let report = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();
        let run = report.execution("delivery-check").unwrap();
        assert!(!run.success);
        assert!(!run.finalized);
        assert!(report.contract.data.is_empty());
        let pending = stored_clause(&ledger, &check);
        assert!(!pending.finalized);
        assert_eq!(
            pending.result.unwrap().feedback,
            "Evaluated date is not provided"
        );

        let mut input = DataBag::new();
        input.insert("input".into(), json!({"evaluatedDate": "2023-12-20T00:00:00Z"}));
        ledger.update(&check, input).unwrap();

        let report = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();
        assert!(report.execution("delivery-check").unwrap().finalized);
        assert_eq!(report.contract.data["delivery"]["withinDeadline"], json!(true));
    }

    #[test]
    fn test_non_executable_clause_skipped() {
        let mut ledger = MemoryLedger::new();
        let note = clause(
            &mut ledger,
            "note",
            ActionType::NonExecutable,
            json!({}),
            json!({}),
            &[],
        );
        let contract_key = contract(&mut ledger, &[&note]);
        let report = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();
        assert!(report.executions.is_empty());
        assert!(stored_clause(&ledger, &note).result.is_none());
    }

    // ── Failures ──────────────────────────────────────────

    #[test]
    fn test_removed_dependency_is_structural_error() {
        let mut ledger = MemoryLedger::new();
        let check = date_check(&mut ledger, Some("2023-12-25T00:00:00Z"));
        let fine = late_fine(&mut ledger, &[&check]);
        // dependency exists on the ledger but is not part of the contract
        let contract_key = contract(&mut ledger, &[&fine]);

        let err = Engine::new(&mut ledger)
            .execute_contract(&contract_key)
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert!(err.to_string().contains("Clause does not belong to contract"));
        assert!(!stored_clause(&ledger, &fine).finalized);
    }

    #[test]
    fn test_error_rolls_back_whole_walk() {
        let mut ledger = MemoryLedger::new();
        let good = clause(
            &mut ledger,
            "good",
            ActionType::FineCalculation,
            json!({}),
            json!({"referenceValue": 1000, "dailyPercentage": 1, "days": 5}),
            &[],
        );
        let bad = clause(
            &mut ledger,
            "bad",
            ActionType::FineCalculation,
            json!({}),
            json!({"referenceValue": 1000, "dailyPercentage": 1, "days": -2}),
            &[],
        );
        let contract_key = contract(&mut ledger, &[&good, &bad]);
        let snapshot = ledger.clone();

        let err = Engine::new(&mut ledger)
            .execute_contract(&contract_key)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
        assert_eq!(ledger, snapshot);
    }

    #[test]
    fn test_dependency_cycle_detected() {
        let mut ledger = MemoryLedger::new();
        let a = clause(
            &mut ledger,
            "a",
            ActionType::CreditCalculation,
            json!({"imposeCredit": true, "predefinedValue": 1}),
            json!({}),
            &[],
        );
        let b = clause(
            &mut ledger,
            "b",
            ActionType::CreditCalculation,
            json!({"imposeCredit": true, "predefinedValue": 1}),
            json!({}),
            &[&a],
        );
        let mut deps = DataBag::new();
        deps.insert("dependencies".into(), json!([b.to_value()]));
        ledger.update(&a, deps).unwrap();
        let contract_key = contract(&mut ledger, &[&a, &b]);

        let err = Engine::new(&mut ledger)
            .execute_contract(&contract_key)
            .unwrap_err();
        match err {
            Error::DependencyCycle(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // ── Generated Assets ──────────────────────────────────

    #[test]
    fn test_payment_asset_persisted_with_back_references() {
        let mut ledger = MemoryLedger::new();
        let payment = clause(
            &mut ledger,
            "payment",
            ActionType::PaymentProcessing,
            json!({"name": "rent", "amount": 100, "paymentRate": 100}),
            json!({"payment": 100, "date": "2024-02-01T00:00:00Z"}),
            &[],
        );
        let contract_key = contract(&mut ledger, &[&payment]);

        let report = Engine::new(&mut ledger).execute_contract(&contract_key).unwrap();
        let run = report.execution("payment").unwrap();
        assert_eq!(run.assets.len(), 1);
        assert!(run.changed_keys.contains(&"paidAmount".to_string()));

        let stored = ledger
            .search(&Selector::asset_type(ledger::asset_type::PAYMENT))
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["clause"]["@key"], json!(payment.key));
        assert_eq!(
            stored[0]["autoExecutableContract"]["@key"],
            json!(contract_key.key)
        );
    }

    #[test]
    fn test_execute_single_clause() {
        let mut ledger = MemoryLedger::new();
        let check = date_check(&mut ledger, Some("2023-12-25T00:00:00Z"));
        let fine = late_fine(&mut ledger, &[&check]);
        let other = clause(
            &mut ledger,
            "other",
            ActionType::CreditCalculation,
            json!({"imposeCredit": true, "predefinedValue": 5}),
            json!({}),
            &[],
        );
        let contract_key = contract(&mut ledger, &[&check, &fine, &other]);

        let report = Engine::new(&mut ledger)
            .execute_clause(&contract_key, &fine)
            .unwrap();
        assert_eq!(report.executions.len(), 2);
        assert!(!stored_clause(&ledger, &other).finalized);

        let outsider = AssetKey::new("clause", "clause:outsider");
        assert!(Engine::new(&mut ledger)
            .execute_clause(&contract_key, &outsider)
            .is_err());
    }
}

//! Templates — reusable clause blueprints
//!
//! A template is an ordered list of template clauses owned by a creator.
//! A template clause carries an action type plus default parameters and
//! inputs, filtered to the action's declared shape the same way contract
//! clauses are. Dependencies between template clauses stay inside their
//! template and must not form a cycle.
//!
//! Template clause keys derive from `(template, id)`, so two templates can
//! both hold a clause named `payment`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::actions::ActionType;
use crate::ledger::{asset_type, transact, AssetKey, Ledger, Record};
use crate::merge::sanitize_keys;
use crate::schema::filter_fields;
use crate::transactions::{check_labels, find_cycle, require_users, shapes};
use crate::{DataBag, Error, Result};

// ── Records ───────────────────────────────────────────────

fn template_asset_type() -> String {
    asset_type::TEMPLATE.to_string()
}

fn template_clause_asset_type() -> String {
    asset_type::TEMPLATE_CLAUSE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(rename = "@assetType", default = "template_asset_type")]
    pub asset_type: String,
    #[serde(rename = "@key")]
    pub key: String,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub creator: AssetKey,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub clauses: Vec<AssetKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateClause {
    #[serde(rename = "@assetType", default = "template_clause_asset_type")]
    pub asset_type: String,
    #[serde(rename = "@key")]
    pub key: String,
    pub id: String,
    pub template: AssetKey,
    /// Position within the template
    #[serde(default)]
    pub number: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub dependencies: Vec<AssetKey>,
    #[serde(default)]
    pub default_parameters: DataBag,
    #[serde(default)]
    pub default_inputs: DataBag,
    #[serde(default)]
    pub optional: bool,
}

fn decode<T: for<'de> Deserialize<'de>>(record: Record, what: &str) -> Result<T> {
    let key = record
        .get("@key")
        .and_then(Value::as_str)
        .unwrap_or("<unkeyed>")
        .to_string();
    serde_json::from_value(Value::Object(record))
        .map_err(|e| Error::BadRequest(format!("Malformed {} '{}': {}", what, key, e)))
}

/// Serialized form without `@key`, ready for `put_new`
fn new_record<T: Serialize>(value: &T) -> Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(mut map) => {
            map.remove("@key");
            Ok(map)
        }
        _ => Err(Error::InvalidData("Template did not serialize to an object".into())),
    }
}

impl Template {
    pub fn from_record(record: Record) -> Result<Self> {
        decode(record, "template")
    }

    pub fn asset_key(&self) -> AssetKey {
        AssetKey::new(self.asset_type.clone(), self.key.clone())
    }

    pub fn has_clause(&self, key: &AssetKey) -> bool {
        self.clauses.iter().any(|c| c.key == key.key)
    }
}

impl TemplateClause {
    pub fn from_record(record: Record) -> Result<Self> {
        decode(record, "template clause")
    }

    pub fn asset_key(&self) -> AssetKey {
        AssetKey::new(self.asset_type.clone(), self.key.clone())
    }
}

fn template_key(key: &AssetKey) -> AssetKey {
    AssetKey::new(asset_type::TEMPLATE, key.key.clone())
}

fn template_clause_key(key: &AssetKey) -> AssetKey {
    AssetKey::new(asset_type::TEMPLATE_CLAUSE, key.key.clone())
}

fn refs(keys: &[AssetKey]) -> Value {
    Value::Array(keys.iter().map(AssetKey::to_value).collect())
}

/// Shape-filter defaults for an action type and check its labels
fn filter_defaults(
    action_type: ActionType,
    parameters: &DataBag,
    inputs: &DataBag,
) -> Result<(DataBag, DataBag)> {
    let (parameter_shape, input_shape) = shapes(action_type);
    let parameters = filter_fields(&sanitize_keys(parameters), parameter_shape)?;
    let inputs = filter_fields(&sanitize_keys(inputs), input_shape)?;
    check_labels(&parameters, parameter_shape)?;
    Ok((parameters, inputs))
}

fn require_members(template: &Template, dependencies: &[AssetKey]) -> Result<()> {
    for dependency in dependencies {
        if !template.has_clause(dependency) {
            return Err(Error::BadRequest(format!(
                "Template clause does not belong to the template: '{}'",
                dependency
            )));
        }
    }
    Ok(())
}

// ── Templates ─────────────────────────────────────────────

/// Payload for [`create_template`]
#[derive(Debug, Clone, Default)]
pub struct NewTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub creator: AssetKey,
    pub public: bool,
}

pub fn create_template(ledger: &mut dyn Ledger, new: NewTemplate) -> Result<Template> {
    if new.id.trim().is_empty() || new.name.trim().is_empty() {
        return Err(Error::BadRequest("Template id and name must not be empty".into()));
    }
    transact(ledger, |tx| {
        require_users(&*tx, std::slice::from_ref(&new.creator))?;
        let template = Template {
            asset_type: template_asset_type(),
            key: String::new(),
            id: new.id.trim().to_string(),
            name: new.name.trim().to_string(),
            description: new.description,
            creator: new.creator,
            public: new.public,
            clauses: Vec::new(),
        };
        let stored = tx
            .put_new(new_record(&template)?)
            .map_err(|e| e.context("Failed to write template asset to the ledger"))?;
        let template = Template::from_record(stored)?;
        info!(template = %template.key, "template created");
        Ok(template)
    })
}

/// Optional fields of [`edit_template`]
#[derive(Debug, Clone, Default)]
pub struct TemplateEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub public: Option<bool>,
}

pub fn edit_template(
    ledger: &mut dyn Ledger,
    template: &AssetKey,
    edit: TemplateEdit,
) -> Result<Template> {
    let key = template_key(template);
    transact(ledger, |tx| {
        let current = Template::from_record(tx.get(&key)?)?;
        let mut patch = DataBag::new();
        if let Some(name) = edit.name {
            if name.trim().is_empty() {
                return Err(Error::BadRequest("Template name must not be empty".into()));
            }
            patch.insert("name".into(), Value::String(name.trim().to_string()));
        }
        if let Some(description) = edit.description {
            patch.insert("description".into(), Value::String(description));
        }
        if let Some(public) = edit.public {
            patch.insert("public".into(), Value::Bool(public));
        }
        if patch.is_empty() {
            return Ok(current);
        }
        Template::from_record(tx.update(&key, patch)?)
    })
}

/// Delete a template together with its template clauses
pub fn delete_template(ledger: &mut dyn Ledger, template: &AssetKey) -> Result<Template> {
    let key = template_key(template);
    transact(ledger, |tx| {
        let current = Template::from_record(tx.get(&key)?)?;
        for clause in &current.clauses {
            if tx.exists(clause) {
                tx.delete(clause)
                    .map_err(|e| e.context("Failed to delete template clause"))?;
            }
        }
        tx.delete(&key)
            .map_err(|e| e.context("Failed to delete template"))?;
        info!(template = %key, clauses = current.clauses.len(), "template deleted");
        Ok(current)
    })
}

/// Payload for [`duplicate_template`]
#[derive(Debug, Clone, Default)]
pub struct TemplateCopy {
    pub id: String,
    /// Keeps the original's name when absent
    pub name: Option<String>,
    /// Keeps the original's creator when absent
    pub creator: Option<AssetKey>,
}

/// Copy a template and every template clause under a new id; copied
/// dependencies point at the copies.
pub fn duplicate_template(
    ledger: &mut dyn Ledger,
    original: &AssetKey,
    copy: TemplateCopy,
) -> Result<Template> {
    if copy.id.trim().is_empty() {
        return Err(Error::BadRequest("Template id must not be empty".into()));
    }
    transact(ledger, |tx| {
        let source = Template::from_record(tx.get(&template_key(original))?)?;
        let creator = copy.creator.unwrap_or_else(|| source.creator.clone());
        require_users(&*tx, std::slice::from_ref(&creator))?;

        let template = Template {
            asset_type: template_asset_type(),
            key: String::new(),
            id: copy.id.trim().to_string(),
            name: copy.name.unwrap_or_else(|| source.name.clone()),
            description: source.description.clone(),
            creator,
            public: source.public,
            clauses: Vec::new(),
        };
        let stored = tx
            .put_new(new_record(&template)?)
            .map_err(|e| e.context("Failed to write template asset to the ledger"))?;
        let mut template = Template::from_record(stored)?;

        // dependencies may point forward, so copies are written before wiring
        let mut renamed: BTreeMap<String, AssetKey> = BTreeMap::new();
        let mut wiring = Vec::new();
        for reference in &source.clauses {
            let clause = TemplateClause::from_record(tx.get(reference)?)?;
            let dependencies = clause.dependencies.clone();
            let copied = TemplateClause {
                key: String::new(),
                template: template.asset_key(),
                dependencies: Vec::new(),
                ..clause
            };
            let stored = TemplateClause::from_record(tx.put_new(new_record(&copied)?)?)?;
            renamed.insert(reference.key.clone(), stored.asset_key());
            template.clauses.push(stored.asset_key());
            wiring.push((stored.asset_key(), dependencies));
        }
        for (key, dependencies) in wiring {
            if dependencies.is_empty() {
                continue;
            }
            let mapped: Vec<AssetKey> = dependencies
                .iter()
                .filter_map(|d| renamed.get(&d.key).cloned())
                .collect();
            let mut patch = DataBag::new();
            patch.insert("dependencies".into(), refs(&mapped));
            tx.update(&key, patch)?;
        }

        let mut patch = DataBag::new();
        patch.insert("clauses".into(), refs(&template.clauses));
        let updated = Template::from_record(tx.update(&template.asset_key(), patch)?)?;
        info!(
            original = %source.key,
            template = %updated.key,
            clauses = updated.clauses.len(),
            "template duplicated"
        );
        Ok(updated)
    })
}

// ── Template Clauses ──────────────────────────────────────

/// Payload for [`create_template_clause`]
#[derive(Debug, Clone)]
pub struct NewTemplateClause {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub action_type: ActionType,
    /// Appended after the last clause when absent
    pub number: Option<i64>,
    pub default_parameters: DataBag,
    pub default_inputs: DataBag,
    pub dependencies: Vec<AssetKey>,
    pub optional: bool,
}

impl NewTemplateClause {
    pub fn new(id: impl Into<String>, action_type: ActionType) -> Self {
        NewTemplateClause {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            category: String::new(),
            action_type,
            number: None,
            default_parameters: DataBag::new(),
            default_inputs: DataBag::new(),
            dependencies: Vec::new(),
            optional: false,
        }
    }
}

/// Create a template clause and append it to its template
pub fn create_template_clause(
    ledger: &mut dyn Ledger,
    template: &AssetKey,
    new: NewTemplateClause,
) -> Result<(Template, TemplateClause)> {
    if new.id.trim().is_empty() {
        return Err(Error::BadRequest("Template clause id must not be empty".into()));
    }
    let (default_parameters, default_inputs) =
        filter_defaults(new.action_type, &new.default_parameters, &new.default_inputs)?;

    let key = template_key(template);
    transact(ledger, |tx| {
        let mut current = Template::from_record(tx.get(&key)?)?;
        require_members(&current, &new.dependencies)?;

        let clause = TemplateClause {
            asset_type: template_clause_asset_type(),
            key: String::new(),
            id: new.id.trim().to_string(),
            template: current.asset_key(),
            number: new.number.unwrap_or(current.clauses.len() as i64 + 1),
            name: new.name,
            description: new.description,
            category: new.category,
            action_type: new.action_type,
            dependencies: new.dependencies,
            default_parameters,
            default_inputs,
            optional: new.optional,
        };
        let stored = tx
            .put_new(new_record(&clause)?)
            .map_err(|e| e.context("Failed to save template clause on ledger"))?;
        let clause = TemplateClause::from_record(stored)?;

        current.clauses.push(clause.asset_key());
        let mut patch = DataBag::new();
        patch.insert("clauses".into(), refs(&current.clauses));
        let updated = tx
            .update(&key, patch)
            .map_err(|e| e.context("Failed to update template with new clause"))?;

        info!(
            template = %key,
            clause = %clause.key,
            action = %clause.action_type,
            "template clause added"
        );
        Ok((Template::from_record(updated)?, clause))
    })
}

/// Optional fields of [`edit_template_clause`]
#[derive(Debug, Clone, Default)]
pub struct TemplateClauseEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub number: Option<i64>,
    pub action_type: Option<ActionType>,
    pub default_parameters: Option<DataBag>,
    pub default_inputs: Option<DataBag>,
    pub dependencies: Option<Vec<AssetKey>>,
    pub optional: Option<bool>,
}

/// Edit a template clause. Defaults are re-filtered against the resulting
/// action type, so switching actions drops fields the new one lacks.
pub fn edit_template_clause(
    ledger: &mut dyn Ledger,
    clause: &AssetKey,
    edit: TemplateClauseEdit,
) -> Result<TemplateClause> {
    let key = template_clause_key(clause);
    transact(ledger, |tx| {
        let mut current = TemplateClause::from_record(tx.get(&key)?)?;

        let action_type = edit.action_type.unwrap_or(current.action_type);
        let parameters = edit.default_parameters.unwrap_or(current.default_parameters);
        let inputs = edit.default_inputs.unwrap_or(current.default_inputs);
        let (parameters, inputs) = filter_defaults(action_type, &parameters, &inputs)?;
        current.action_type = action_type;
        current.default_parameters = parameters;
        current.default_inputs = inputs;

        if let Some(dependencies) = edit.dependencies {
            let template = Template::from_record(tx.get(&current.template)?)?;
            require_members(&template, &dependencies)?;

            let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for reference in &template.clauses {
                let sibling = TemplateClause::from_record(tx.get(reference)?)?;
                let deps = sibling.dependencies.iter().map(|d| d.key.clone()).collect();
                graph.insert(sibling.key, deps);
            }
            graph.insert(
                current.key.clone(),
                dependencies.iter().map(|d| d.key.clone()).collect(),
            );
            if let Some(cycle) = find_cycle(&graph, &current.key) {
                return Err(Error::DependencyCycle(cycle));
            }
            current.dependencies = dependencies;
        }

        if let Some(name) = edit.name {
            current.name = name;
        }
        if let Some(description) = edit.description {
            current.description = description;
        }
        if let Some(category) = edit.category {
            current.category = category;
        }
        if let Some(number) = edit.number {
            current.number = number;
        }
        if let Some(optional) = edit.optional {
            current.optional = optional;
        }

        let Value::Object(record) = serde_json::to_value(&current)? else {
            return Err(Error::InvalidData(
                "Template clause did not serialize to an object".into(),
            ));
        };
        let stored = tx
            .put(record)
            .map_err(|e| e.context("Failed to update template clause"))?;
        TemplateClause::from_record(stored)
    })
}

/// Detach a template clause from its template, drop it from sibling
/// dependency lists, and delete it
pub fn delete_template_clause(
    ledger: &mut dyn Ledger,
    template: &AssetKey,
    clause: &AssetKey,
) -> Result<Template> {
    let key = template_key(template);
    let clause = template_clause_key(clause);
    transact(ledger, |tx| {
        let mut current = Template::from_record(tx.get(&key)?)?;
        if !current.has_clause(&clause) {
            return Err(Error::BadRequest(
                "Template clause does not belong to the template".into(),
            ));
        }
        tx.get(&clause)?;
        current.clauses.retain(|c| c.key != clause.key);

        for reference in &current.clauses {
            let sibling = TemplateClause::from_record(tx.get(reference)?)?;
            if !sibling.dependencies.iter().any(|d| d.key == clause.key) {
                continue;
            }
            let kept: Vec<AssetKey> = sibling
                .dependencies
                .into_iter()
                .filter(|d| d.key != clause.key)
                .collect();
            let mut patch = DataBag::new();
            patch.insert("dependencies".into(), refs(&kept));
            tx.update(reference, patch)?;
        }

        let mut patch = DataBag::new();
        patch.insert("clauses".into(), refs(&current.clauses));
        let updated = tx
            .update(&key, patch)
            .map_err(|e| e.context("Failed to update template"))?;
        tx.delete(&clause)
            .map_err(|e| e.context("Failed to delete template clause"))?;

        info!(template = %key, clause = %clause, "template clause removed");
        Template::from_record(updated)
    })
}

// ── Tests ─────────────────────────────────────────────────

//! Ledger access — the storage collaborator the engine runs against
//!
//! Records are string-keyed JSON objects carrying the reserved `@assetType`
//! and `@key` fields. Cross references are stored as `AssetKey` objects
//! (`{"@assetType": .., "@key": ..}`).
//!
//! # Implementations
//!
//! - [`MemoryLedger`] — BTreeMap-backed store with per-key history. The CLI
//!   persists it as a JSON file; tests use it as the ledger double.
//! - [`StagedLedger`] — write buffer over another ledger. One transaction
//!   invocation runs against a staged view and commits only on success, so a
//!   failed or retried transaction leaves nothing behind.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{DataBag, Error, Result};

/// Ledger record — a JSON object with `@assetType` / `@key`
pub type Record = DataBag;

/// Asset type tags used by the engine
pub mod asset_type {
    pub const CONTRACT: &str = "autoExecutableContract";
    pub const CLAUSE: &str = "clause";
    pub const PAYMENT: &str = "payment";
    pub const USER: &str = "user";
    pub const TEMPLATE: &str = "template";
    pub const TEMPLATE_CLAUSE: &str = "templateClause";
}

// ── Asset Key ─────────────────────────────────────────────

/// Reference to a ledger asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    #[serde(rename = "@assetType")]
    pub asset_type: String,
    #[serde(rename = "@key")]
    pub key: String,
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl AssetKey {
    pub fn new(asset_type: impl Into<String>, key: impl Into<String>) -> Self {
        AssetKey {
            asset_type: asset_type.into(),
            key: key.into(),
        }
    }

    /// Parse a reference: either a `{"@assetType", "@key"}` object (extra
    /// fields allowed) or a bare `"<assetType>:<digest>"` string.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let key = map.get("@key").and_then(Value::as_str).ok_or_else(|| {
                    Error::BadRequest("Reference is missing '@key'".into())
                })?;
                let asset_type = match map.get("@assetType").and_then(Value::as_str) {
                    Some(t) => t.to_string(),
                    None => Self::type_prefix(key)?,
                };
                Ok(AssetKey::new(asset_type, key))
            }
            Value::String(key) => Ok(AssetKey::new(Self::type_prefix(key)?, key.clone())),
            other => Err(Error::BadRequest(format!(
                "Reference must be an object or key string, got {}",
                other
            ))),
        }
    }

    /// Parse a reference and require a specific asset type
    pub fn expect(value: &Value, asset_type: &str) -> Result<Self> {
        let key = Self::from_value(value)?;
        if key.asset_type != asset_type {
            return Err(Error::BadRequest(format!(
                "Reference '{}' must point to a {}, not a {}",
                key.key, asset_type, key.asset_type
            )));
        }
        Ok(key)
    }

    /// Key of a stored record
    pub fn of_record(record: &Record) -> Result<Self> {
        Self::from_value(&Value::Object(record.clone()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "@assetType": self.asset_type,
            "@key": self.key,
        })
    }

    fn type_prefix(key: &str) -> Result<String> {
        key.split_once(':')
            .map(|(t, _)| t.to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::BadRequest(format!("Cannot infer asset type of key '{}'", key)))
    }
}

/// Properties that identify an asset of the given type
fn key_props(asset_type: &str) -> &'static [&'static str] {
    match asset_type {
        asset_type::CONTRACT => &["name", "owner"],
        asset_type::CLAUSE => &["id"],
        asset_type::PAYMENT => &["hash", "clause"],
        asset_type::USER => &["id"],
        asset_type::TEMPLATE => &["id"],
        asset_type::TEMPLATE_CLAUSE => &["template", "id"],
        _ => &[],
    }
}

/// Derive the ledger key for a new record: `<assetType>:<sha256 of key props>`.
/// Unknown asset types hash the whole record.
pub fn derive_key(record: &Record) -> Result<AssetKey> {
    let asset_type = record
        .get("@assetType")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::BadRequest("Record is missing '@assetType'".into()))?;

    let props = key_props(asset_type);
    let identity = if props.is_empty() {
        serde_json::to_string(record)?
    } else {
        let mut parts = Vec::with_capacity(props.len());
        for prop in props {
            let value = record.get(*prop).ok_or_else(|| {
                Error::BadRequest(format!(
                    "Missing key property '{}' for asset type '{}'",
                    prop, asset_type
                ))
            })?;
            // References hash by their key only
            let part = match value {
                Value::Object(map) => map
                    .get("@key")
                    .cloned()
                    .unwrap_or_else(|| value.clone()),
                _ => value.clone(),
            };
            parts.push(part);
        }
        serde_json::to_string(&parts)?
    };

    let mut hasher = Sha256::new();
    hasher.update(asset_type.as_bytes());
    hasher.update(identity.as_bytes());
    let digest = hasher.finalize();
    Ok(AssetKey::new(
        asset_type,
        format!("{}:{:x}", asset_type, digest),
    ))
}

// ── Selector ──────────────────────────────────────────────

/// Query selector: asset type, optionally narrowed to records whose array
/// field contains a given reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub asset_type: String,
    pub contains: Option<(String, AssetKey)>,
}

impl Selector {
    pub fn asset_type(asset_type: impl Into<String>) -> Self {
        Selector {
            asset_type: asset_type.into(),
            contains: None,
        }
    }

    pub fn with_reference(mut self, field: impl Into<String>, key: AssetKey) -> Self {
        self.contains = Some((field.into(), key));
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if record.get("@assetType").and_then(Value::as_str) != Some(self.asset_type.as_str()) {
            return false;
        }
        match &self.contains {
            None => true,
            Some((field, key)) => record
                .get(field)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .any(|item| AssetKey::from_value(item).ok().as_ref() == Some(key))
                })
                .unwrap_or(false),
        }
    }
}

// ── Ledger Trait ──────────────────────────────────────────

/// Ledger primitives consumed by the engine and transactions
pub trait Ledger {
    /// Fetch a record; `NotFound` when missing
    fn get(&self, key: &AssetKey) -> Result<Record>;

    /// Insert or replace a record under its `@key`
    fn put(&mut self, record: Record) -> Result<Record>;

    /// Delete a record, returning its last version
    fn delete(&mut self, key: &AssetKey) -> Result<Record>;

    /// All live records matching the selector, in key order
    fn search(&self, selector: &Selector) -> Result<Vec<Record>>;

    /// Every written version of a key, oldest first
    fn history(&self, key: &AssetKey) -> Result<Vec<Record>>;

    fn exists(&self, key: &AssetKey) -> bool {
        self.get(key).is_ok()
    }

    /// Store a new record, deriving `@key` when absent
    fn put_new(&mut self, mut record: Record) -> Result<Record> {
        let key = match record.get("@key") {
            Some(_) => AssetKey::of_record(&record)?,
            None => {
                let key = derive_key(&record)?;
                record.insert("@key".into(), Value::String(key.key.clone()));
                key
            }
        };
        if self.exists(&key) {
            return Err(Error::AlreadyExists {
                asset_type: key.asset_type,
                key: key.key,
            });
        }
        self.put(record)
    }

    /// Shallow-merge `patch` into an existing record
    fn update(&mut self, key: &AssetKey, patch: DataBag) -> Result<Record> {
        let mut record = self.get(key)?;
        for (field, value) in patch {
            if field.starts_with('@') {
                continue;
            }
            record.insert(field, value);
        }
        self.put(record)
    }
}

fn not_found(key: &AssetKey) -> Error {
    Error::NotFound {
        asset_type: key.asset_type.clone(),
        key: key.key.clone(),
    }
}

// ── Memory Ledger ─────────────────────────────────────────

/// In-memory ledger with deterministic ordering and full history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryLedger {
    assets: BTreeMap<String, Record>,
    #[serde(default)]
    history: BTreeMap<String, Vec<Record>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl Ledger for MemoryLedger {
    fn get(&self, key: &AssetKey) -> Result<Record> {
        self.assets
            .get(&key.key)
            .filter(|r| r.get("@assetType").and_then(Value::as_str) == Some(key.asset_type.as_str()))
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    fn put(&mut self, record: Record) -> Result<Record> {
        let key = AssetKey::of_record(&record)?;
        self.history
            .entry(key.key.clone())
            .or_default()
            .push(record.clone());
        self.assets.insert(key.key, record.clone());
        Ok(record)
    }

    fn delete(&mut self, key: &AssetKey) -> Result<Record> {
        let record = self.get(key)?;
        self.assets.remove(&key.key);
        let mut tombstone = record.clone();
        tombstone.insert("@deleted".into(), Value::Bool(true));
        self.history.entry(key.key.clone()).or_default().push(tombstone);
        Ok(record)
    }

    fn search(&self, selector: &Selector) -> Result<Vec<Record>> {
        Ok(self
            .assets
            .values()
            .filter(|r| selector.matches(r))
            .cloned()
            .collect())
    }

    fn history(&self, key: &AssetKey) -> Result<Vec<Record>> {
        self.history
            .get(&key.key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }
}

// ── Staged Ledger ─────────────────────────────────────────

/// Write buffer over a base ledger. Reads see staged writes first.
/// Nothing reaches the base until [`StagedLedger::commit`].
pub struct StagedLedger<'a> {
    base: &'a mut dyn Ledger,
    /// `None` marks a staged delete
    writes: BTreeMap<AssetKey, Option<Record>>,
}

impl<'a> StagedLedger<'a> {
    pub fn new(base: &'a mut dyn Ledger) -> Self {
        StagedLedger {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Number of pending writes
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    /// Flush staged writes to the base ledger in key order
    pub fn commit(self) -> Result<()> {
        let StagedLedger { base, writes } = self;
        for (key, write) in writes {
            match write {
                Some(record) => {
                    base.put(record)
                        .map_err(|e| e.context(format!("Failed to commit '{}'", key)))?;
                }
                None => {
                    if base.exists(&key) {
                        base.delete(&key)
                            .map_err(|e| e.context(format!("Failed to commit delete of '{}'", key)))?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Ledger for StagedLedger<'_> {
    fn get(&self, key: &AssetKey) -> Result<Record> {
        match self.writes.get(key) {
            Some(Some(record)) => Ok(record.clone()),
            Some(None) => Err(not_found(key)),
            None => self.base.get(key),
        }
    }

    fn put(&mut self, record: Record) -> Result<Record> {
        let key = AssetKey::of_record(&record)?;
        self.writes.insert(key, Some(record.clone()));
        Ok(record)
    }

    fn delete(&mut self, key: &AssetKey) -> Result<Record> {
        let record = self.get(key)?;
        self.writes.insert(key.clone(), None);
        Ok(record)
    }

    fn search(&self, selector: &Selector) -> Result<Vec<Record>> {
        let mut found: BTreeMap<String, Record> = BTreeMap::new();
        for record in self.base.search(selector)? {
            let key = AssetKey::of_record(&record)?;
            found.insert(key.key, record);
        }
        for (key, write) in &self.writes {
            match write {
                Some(record) if selector.matches(record) => {
                    found.insert(key.key.clone(), record.clone());
                }
                _ => {
                    found.remove(&key.key);
                }
            }
        }
        Ok(found.into_values().collect())
    }

    fn history(&self, key: &AssetKey) -> Result<Vec<Record>> {
        let mut versions = match self.base.history(key) {
            Ok(versions) => versions,
            Err(Error::NotFound { .. }) if self.writes.contains_key(key) => Vec::new(),
            Err(e) => return Err(e),
        };
        if let Some(Some(record)) = self.writes.get(key) {
            versions.push(record.clone());
        }
        Ok(versions)
    }
}

/// Run `f` as one ledger transaction: commit its writes on success,
/// discard them on error.
pub fn transact<T>(
    ledger: &mut dyn Ledger,
    f: impl FnOnce(&mut StagedLedger<'_>) -> Result<T>,
) -> Result<T> {
    let mut staged = StagedLedger::new(ledger);
    let value = f(&mut staged)?;
    staged.commit()?;
    Ok(value)
}

// ── Tests ─────────────────────────────────────────────────

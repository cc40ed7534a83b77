//! Item State Codec - perk data embedded on the tool itself
//!
//! A tool carries a small attribute map that survives with the item. The codec
//! owns the layout of that map:
//!
//! | key              | value                                   |
//! |------------------|-----------------------------------------|
//! | `host_tool_uuid` | identity stamped by the host (wins)     |
//! | `tool_uuid`      | identity generated by this codec        |
//! | `perk_id`        | assigned perk id                        |
//! | `perk_level`     | assigned level                          |
//! | `boost_<kind>`   | magnitude read by the host at use time  |
//!
//! plus one lore line `Perk | <name> Level <n>` for display.

use parking_lot::Mutex;
use rand::RngCore;
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::{BoostKind, Perk};
use crate::error::{PerkError, PerkResult};
use crate::storage::repository::AssignmentKey;

pub const HOST_IDENTITY_KEY: &str = "host_tool_uuid";
pub const IDENTITY_KEY: &str = "tool_uuid";
pub const PERK_KEY: &str = "perk_id";
pub const LEVEL_KEY: &str = "perk_level";
pub const BOOST_PREFIX: &str = "boost_";
pub const LORE_PREFIX: &str = "Perk | ";

/// Value stored in a tool attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            AttrValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// A host item as seen by the perk system
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolItem {
    pub kind: String,
    pub lore: Vec<String>,
    attributes: BTreeMap<String, AttrValue>,
}

impl ToolItem {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: AttrValue) {
        self.attributes.insert(key.into(), value);
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<AttrValue> {
        self.attributes.remove(key)
    }

    pub fn attribute_keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

/// Tool handle shared between the game loop, the orchestrator and presenters
pub type SharedTool = Arc<Mutex<ToolItem>>;

pub fn shared_tool(tool: ToolItem) -> SharedTool {
    Arc::new(Mutex::new(tool))
}

/// Fresh identity: `tool-` followed by 16 hex digits of a SHA3 digest
pub fn generate_identity(kind: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();

    let mut hasher = Sha3_256::new();
    hasher.update(salt);
    hasher.update(nanos.to_le_bytes());
    hasher.update(kind.as_bytes());
    let digest = hasher.finalize();

    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("tool-{}", hex)
}

/// Reads and writes the embedded perk state of a tool
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemStateCodec;

impl ItemStateCodec {
    pub fn new() -> Self {
        Self
    }

    /// Embedded assignment, if any. Malformed data yields `InvalidPersistedFormat`.
    pub fn read(&self, tool: &ToolItem) -> PerkResult<Option<AssignmentKey>> {
        let perk_id = match tool.attribute(PERK_KEY) {
            None => return Ok(None),
            Some(value) => value
                .as_text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    PerkError::InvalidPersistedFormat(format!("{} is {:?}", PERK_KEY, value))
                })?
                .to_string(),
        };

        let level = match tool.attribute(LEVEL_KEY) {
            Some(AttrValue::Int(l)) if *l >= 1 => u32::try_from(*l).ok(),
            Some(AttrValue::Text(s)) => s.trim().parse::<u32>().ok().filter(|l| *l >= 1),
            _ => None,
        }
        .ok_or_else(|| {
            PerkError::InvalidPersistedFormat(format!(
                "{} for {} is {:?}",
                LEVEL_KEY,
                perk_id,
                tool.attribute(LEVEL_KEY)
            ))
        })?;

        Ok(Some(AssignmentKey::new(perk_id, level)))
    }

    /// Identity without creating one
    pub fn peek_identity(&self, tool: &ToolItem) -> Option<String> {
        [HOST_IDENTITY_KEY, IDENTITY_KEY]
            .iter()
            .filter_map(|key| tool.attribute(key))
            .filter_map(|v| v.as_text())
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Stable identity; generated and embedded on first call when absent
    pub fn identity(&self, tool: &mut ToolItem) -> String {
        if let Some(id) = self.peek_identity(tool) {
            return id;
        }
        let id = generate_identity(&tool.kind);
        tool.set_attribute(IDENTITY_KEY, AttrValue::Text(id.clone()));
        debug!(tool = %id, kind = %tool.kind, "Generated tool identity");
        id
    }

    /// Drop the codec-generated identity; a host identity is left alone
    pub fn clear_identity(&self, tool: &mut ToolItem) -> Option<String> {
        tool.remove_attribute(IDENTITY_KEY)
            .and_then(|v| v.as_text().map(str::to_string))
    }

    /// Write perk, level, boost magnitudes and lore; replaces any previous perk.
    ///
    /// Boost magnitudes are set, not added: every `boost_*` key is cleared
    /// first, so re-applying (a new roll, a restore from the ledger) never
    /// stacks the old perk's boosts on top of the new one.
    pub fn apply(&self, tool: &mut ToolItem, perk: &Perk, level: u32) {
        self.clear_boosts(tool);
        tool.set_attribute(PERK_KEY, AttrValue::Text(perk.id.clone()));
        tool.set_attribute(LEVEL_KEY, AttrValue::Int(i64::from(level)));

        if let Some(perk_level) = perk.level(level) {
            for (kind, amount) in perk_level.boosts() {
                tool.set_attribute(boost_key(kind), AttrValue::Float(amount));
            }
        }

        let line = format!("{}{} Level {}", LORE_PREFIX, perk.display_name, level);
        match tool.lore.iter_mut().find(|l| l.starts_with(LORE_PREFIX)) {
            Some(existing) => *existing = line,
            None => tool.lore.push(line),
        }
    }

    /// Strip every trace of a perk; returns whether one was present
    pub fn remove(&self, tool: &mut ToolItem) -> bool {
        let had_perk = tool.remove_attribute(PERK_KEY).is_some();
        tool.remove_attribute(LEVEL_KEY);
        self.clear_boosts(tool);
        tool.lore.retain(|l| !l.starts_with(LORE_PREFIX));
        had_perk
    }

    /// Magnitude of one boost kind, 0 when absent
    pub fn boost(&self, tool: &ToolItem, kind: &BoostKind) -> f64 {
        tool.attribute(&boost_key(kind))
            .and_then(AttrValue::as_f64)
            .unwrap_or(0.0)
    }

    fn clear_boosts(&self, tool: &mut ToolItem) {
        let stale: Vec<String> = tool
            .attribute_keys()
            .filter(|k| k.starts_with(BOOST_PREFIX))
            .map(str::to_string)
            .collect();
        for key in stale {
            tool.remove_attribute(&key);
        }
    }
}

fn boost_key(kind: &BoostKind) -> String {
    format!("{}{}", BOOST_PREFIX, kind.as_str())
}

//! Trait Catalog - immutable perk/category index with atomic reload
//!
//! The catalog is built from a JSON document into a [`CatalogSnapshot`] and
//! published through [`TraitCatalog`]. Readers clone the current `Arc` and
//! keep using it for as long as they like; a reload builds and validates the
//! whole replacement before swapping the pointer, so no reader ever observes a
//! partially loaded catalog.
//!
//! ## Architecture
//! ```text
//! perks.json ──▶ CatalogDocument ──validate──▶ CatalogSnapshot
//!                                                  │
//!                          TraitCatalog::publish ──┘ (RwLock<Arc<_>> swap)
//!                                  │
//!              ┌───────────────────┼────────────────────┐
//!          Lottery             Reconciler           Orchestrator
//! ```
//!
//! ## Document shape
//! ```json
//! {
//!   "categories": { "morada": { "display_name": "Morada", "color": "#AA00AA" } },
//!   "guaranteed_category": "morada",
//!   "defaults": { "category": "verde", "tool": "hoe", "weight": 1.0 },
//!   "perks": [
//!     { "id": "fertility", "category": "morada", "weight": 2.5,
//!       "levels": { "1": { "boost-type": "crops", "boost-amount": 1.5 } } }
//!   ]
//! }
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::logging::TimingSpan;

/// Tier used by the pity mechanism when the document does not name one
pub const DEFAULT_GUARANTEED_CATEGORY: &str = "morada";
/// Tool family a perk targets when neither the perk nor the defaults say otherwise
pub const DEFAULT_TOOL: &str = "hoe";

/// Error type for catalog load/validation
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed catalog document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Duplicate perk id: {0}")]
    DuplicatePerk(String),
    #[error("Perk {perk} references unknown category {category}")]
    UnknownCategory { perk: String, category: String },
    #[error("Guaranteed category {0} is not defined")]
    UnknownGuaranteedCategory(String),
    #[error("Perk {perk} has invalid weight {weight}")]
    InvalidWeight { perk: String, weight: f64 },
    #[error("Perk {perk} has invalid level key '{level}'")]
    InvalidLevel { perk: String, level: String },
    #[error("Perk {perk} has invalid boost definition: {reason}")]
    InvalidBoost { perk: String, reason: String },
    #[error("Perk entry has an empty id")]
    EmptyPerkId,
}

// ============================================================================
// Boosts
// ============================================================================

/// Closed set of boost kinds understood by the host, with an escape hatch for new ones
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BoostKind {
    Coin,
    Orb,
    Money,
    Pass,
    Level,
    Enchant,
    Crops,
    Other(String),
}

impl BoostKind {
    /// Parse a boost name as written in the catalog (case-insensitive)
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim().to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        let kind = match name.as_str() {
            "coin" | "coins" => BoostKind::Coin,
            "orb" | "orbs" => BoostKind::Orb,
            "money" => BoostKind::Money,
            "pass" => BoostKind::Pass,
            "level" | "levels" => BoostKind::Level,
            "enchant" => BoostKind::Enchant,
            "crops" | "crop" => BoostKind::Crops,
            _ => {
                if !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return None;
                }
                BoostKind::Other(name)
            }
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &str {
        match self {
            BoostKind::Coin => "coin",
            BoostKind::Orb => "orb",
            BoostKind::Money => "money",
            BoostKind::Pass => "pass",
            BoostKind::Level => "level",
            BoostKind::Enchant => "enchant",
            BoostKind::Crops => "crops",
            BoostKind::Other(name) => name,
        }
    }
}

impl fmt::Display for BoostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boost magnitudes granted by one level of a perk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerkLevel {
    boosts: BTreeMap<BoostKind, f64>,
}

impl PerkLevel {
    pub fn new(boosts: BTreeMap<BoostKind, f64>) -> Self {
        Self { boosts }
    }

    pub fn boost(&self, kind: &BoostKind) -> Option<f64> {
        self.boosts.get(kind).copied()
    }

    pub fn boosts(&self) -> impl Iterator<Item = (&BoostKind, f64)> {
        self.boosts.iter().map(|(k, v)| (k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.boosts.is_empty()
    }
}

// ============================================================================
// Perks & categories
// ============================================================================

/// A perk tier (verde, morada, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub display_name: String,
    pub color: String,
}

/// A drawable perk
#[derive(Debug, Clone, PartialEq)]
pub struct Perk {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub tool: String,
    pub draw_weight: f64,
    pub levels: BTreeMap<u32, PerkLevel>,
}

impl Perk {
    pub fn level(&self, level: u32) -> Option<&PerkLevel> {
        self.levels.get(&level)
    }

    /// Defined level numbers, ascending
    pub fn level_numbers(&self) -> Vec<u32> {
        self.levels.keys().copied().collect()
    }
}

// ============================================================================
// Source document
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogDocument {
    pub categories: BTreeMap<String, CategoryDocument>,
    pub guaranteed_category: Option<String>,
    pub defaults: PerkDefaults,
    pub perks: Vec<PerkDocument>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CategoryDocument {
    pub display_name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerkDefaults {
    pub category: String,
    pub tool: String,
    pub weight: f64,
    pub description: String,
}

impl Default for PerkDefaults {
    fn default() -> Self {
        Self {
            category: "verde".to_string(),
            tool: DEFAULT_TOOL.to_string(),
            weight: 1.0,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerkDocument {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default, alias = "chance")]
    pub weight: Option<f64>,
    #[serde(default)]
    pub levels: BTreeMap<String, LevelDocument>,
}

/// One level entry; `boost-type`/`boost-amount` are comma-separated parallel lists
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LevelDocument {
    #[serde(rename = "boost-type")]
    pub boost_type: String,
    #[serde(rename = "boost-amount")]
    pub boost_amount: Option<serde_json::Value>,
}

/// Tiers used when a document carries no `categories` section
pub fn default_categories() -> Vec<Category> {
    [
        ("verde", "Verde", "#55FF55"),
        ("azul-clarito", "Azul Clarito", "#55FFFF"),
        ("azul-oscuro", "Azul Oscuro", "#0000AA"),
        ("roja", "Roja", "#FF5555"),
        ("morada", "Morada", "#AA00AA"),
        ("naranja", "Naranja", "#FFAA00"),
    ]
    .into_iter()
    .map(|(id, name, color)| Category {
        id: id.to_string(),
        display_name: name.to_string(),
        color: color.to_string(),
    })
    .collect()
}

fn parse_level(perk: &str, raw: &str, doc: &LevelDocument) -> Result<(u32, PerkLevel), CatalogError> {
    let level: u32 = raw
        .trim()
        .parse()
        .ok()
        .filter(|l| *l >= 1)
        .ok_or_else(|| CatalogError::InvalidLevel {
            perk: perk.to_string(),
            level: raw.to_string(),
        })?;

    let invalid = |reason: String| CatalogError::InvalidBoost {
        perk: perk.to_string(),
        reason,
    };

    let types: Vec<&str> = doc
        .boost_type
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if types.is_empty() {
        return Ok((level, PerkLevel::default()));
    }

    let amounts: Vec<f64> = match &doc.boost_amount {
        None => return Err(invalid(format!("level {} has boost types but no amount", level))),
        Some(serde_json::Value::Number(n)) => vec![n
            .as_f64()
            .ok_or_else(|| invalid(format!("level {} amount {} is not a real", level, n)))?],
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(|a| {
                a.trim()
                    .parse::<f64>()
                    .map_err(|_| invalid(format!("level {} amount '{}' is not a number", level, a.trim())))
            })
            .collect::<Result<_, _>>()?,
        Some(other) => return Err(invalid(format!("level {} amount {} is not a number", level, other))),
    };

    // A single amount applies to every listed kind
    if amounts.len() != 1 && amounts.len() != types.len() {
        return Err(invalid(format!(
            "level {} lists {} boost types but {} amounts",
            level,
            types.len(),
            amounts.len()
        )));
    }

    let mut boosts = BTreeMap::new();
    for (i, name) in types.iter().enumerate() {
        let kind = BoostKind::parse(name)
            .ok_or_else(|| invalid(format!("level {} has unusable boost type '{}'", level, name)))?;
        let amount = if amounts.len() == 1 { amounts[0] } else { amounts[i] };
        if !amount.is_finite() {
            return Err(invalid(format!("level {} amount is not finite", level)));
        }
        boosts.insert(kind, amount);
    }

    Ok((level, PerkLevel::new(boosts)))
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable, validated catalog contents
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    perks: Vec<Arc<Perk>>,
    by_id: HashMap<String, usize>,
    categories: BTreeMap<String, Category>,
    guaranteed_category: String,
    default_category: String,
}

impl CatalogSnapshot {
    /// A catalog with the default tiers and no perks
    pub fn empty() -> Self {
        Self {
            perks: Vec::new(),
            by_id: HashMap::new(),
            categories: default_categories()
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            guaranteed_category: DEFAULT_GUARANTEED_CATEGORY.to_string(),
            default_category: "verde".to_string(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Validate a document and build the lookup indexes
    pub fn from_document(document: CatalogDocument) -> Result<Self, CatalogError> {
        let categories: BTreeMap<String, Category> = if document.categories.is_empty() {
            default_categories()
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect()
        } else {
            document
                .categories
                .into_iter()
                .map(|(id, doc)| {
                    let category = Category {
                        display_name: doc.display_name.unwrap_or_else(|| id.clone()),
                        color: doc.color.unwrap_or_else(|| "#FFFFFF".to_string()),
                        id: id.clone(),
                    };
                    (id, category)
                })
                .collect()
        };

        let guaranteed_category = document
            .guaranteed_category
            .unwrap_or_else(|| DEFAULT_GUARANTEED_CATEGORY.to_string());
        if !categories.contains_key(&guaranteed_category) {
            return Err(CatalogError::UnknownGuaranteedCategory(guaranteed_category));
        }

        let defaults = document.defaults;
        let mut perks = Vec::with_capacity(document.perks.len());
        let mut by_id = HashMap::with_capacity(document.perks.len());
        let mut seen = HashSet::new();

        for doc in document.perks {
            let id = doc.id.trim().to_string();
            if id.is_empty() {
                return Err(CatalogError::EmptyPerkId);
            }
            if !seen.insert(id.clone()) {
                return Err(CatalogError::DuplicatePerk(id));
            }

            let category = doc.category.unwrap_or_else(|| defaults.category.clone());
            if !categories.contains_key(&category) {
                return Err(CatalogError::UnknownCategory { perk: id, category });
            }

            let weight = doc.weight.unwrap_or(defaults.weight);
            if !weight.is_finite() || weight < 0.0 {
                return Err(CatalogError::InvalidWeight { perk: id, weight });
            }

            let mut levels = BTreeMap::new();
            for (raw, level_doc) in &doc.levels {
                let (number, level) = parse_level(&id, raw, level_doc)?;
                if levels.insert(number, level).is_some() {
                    return Err(CatalogError::InvalidLevel {
                        perk: id,
                        level: raw.clone(),
                    });
                }
            }

            by_id.insert(id.clone(), perks.len());
            perks.push(Arc::new(Perk {
                display_name: doc.display_name.unwrap_or_else(|| id.clone()),
                description: doc.description.unwrap_or_else(|| defaults.description.clone()),
                tool: doc
                    .tool
                    .unwrap_or_else(|| defaults.tool.clone())
                    .to_ascii_lowercase(),
                id,
                category,
                draw_weight: weight,
                levels,
            }));
        }

        let default_category = if categories.contains_key(&defaults.category) {
            defaults.category
        } else {
            guaranteed_category.clone()
        };

        Ok(Self {
            perks,
            by_id,
            categories,
            guaranteed_category,
            default_category,
        })
    }

    /// All perks in document order (the lottery's iteration order)
    pub fn perks(&self) -> &[Arc<Perk>] {
        &self.perks
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Perk>> {
        self.by_id.get(id).map(|&i| &self.perks[i])
    }

    pub fn in_category(&self, category: &str) -> Vec<&Arc<Perk>> {
        self.perks.iter().filter(|p| p.category == category).collect()
    }

    pub fn perks_for_tool(&self, tool: &str) -> Vec<&Arc<Perk>> {
        self.perks
            .iter()
            .filter(|p| p.tool.eq_ignore_ascii_case(tool))
            .collect()
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    /// Category by id, or the default tier for records naming a retired category
    pub fn category_or_default(&self, id: &str) -> &Category {
        self.categories
            .get(id)
            .or_else(|| self.categories.get(&self.default_category))
            .or_else(|| self.categories.values().next())
            .unwrap_or_else(|| fallback_category())
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn guaranteed_category(&self) -> &str {
        &self.guaranteed_category
    }

    pub fn total_weight(&self) -> f64 {
        self.perks.iter().map(|p| p.draw_weight).sum()
    }

    pub fn len(&self) -> usize {
        self.perks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perks.is_empty()
    }
}

// Validation guarantees the guaranteed tier exists, so this is never reached in practice
fn fallback_category() -> &'static Category {
    static FALLBACK: std::sync::OnceLock<Category> = std::sync::OnceLock::new();
    FALLBACK.get_or_init(|| Category {
        id: DEFAULT_GUARANTEED_CATEGORY.to_string(),
        display_name: DEFAULT_GUARANTEED_CATEGORY.to_string(),
        color: "#FFFFFF".to_string(),
    })
}

// ============================================================================
// Published catalog
// ============================================================================

/// Holder of the currently published snapshot
pub struct TraitCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
    generation: AtomicU64,
}

impl TraitCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            generation: AtomicU64::new(1),
        }
    }

    /// Current snapshot; stays valid across later reloads
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.read().clone()
    }

    /// Number of snapshots published so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn publish(&self, snapshot: CatalogSnapshot) {
        let perks = snapshot.len();
        *self.current.write() = Arc::new(snapshot);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(perks, generation, "Perk catalog published");
    }

    /// Parse, validate and publish; the previous snapshot survives any failure
    pub fn reload_from_json(&self, json: &str) -> Result<usize, CatalogError> {
        let _timing = TimingSpan::new("catalog_reload");
        match CatalogSnapshot::from_json(json) {
            Ok(snapshot) => {
                let count = snapshot.len();
                self.publish(snapshot);
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Catalog reload rejected, keeping previous snapshot");
                Err(e)
            }
        }
    }

    pub fn reload_from_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        self.reload_from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "guaranteed_category": "morada",
        "perks": [
            { "id": "fertility", "display_name": "Fertility", "category": "morada", "weight": 2.0,
              "levels": {
                "1": { "boost-type": "crops", "boost-amount": 1.5 },
                "2": { "boost-type": "crops,coins", "boost-amount": "2.0, 0.5" }
              } },
            { "id": "greed", "category": "verde", "chance": 8.0,
              "levels": { "3": { "boost-type": "money", "boost-amount": "4" } } },
            { "id": "plain", "tool": "Pickaxe" }
        ]
    }"#;

    // ========================================================================
    // Loading
    // ========================================================================

    #[test]
    fn test_load_sample_document() {
        let snapshot = CatalogSnapshot::from_json(SAMPLE).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.guaranteed_category(), "morada");

        let ids: Vec<&str> = snapshot.perks().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["fertility", "greed", "plain"], "document order is kept");

        let fertility = snapshot.get("fertility").unwrap();
        assert_eq!(fertility.level_numbers(), vec![1, 2]);
        let level2 = fertility.level(2).unwrap();
        assert_eq!(level2.boost(&BoostKind::Crops), Some(2.0));
        assert_eq!(level2.boost(&BoostKind::Coin), Some(0.5));

        let greed = snapshot.get("greed").unwrap();
        assert_eq!(greed.draw_weight, 8.0, "chance is accepted as weight alias");
        assert_eq!(greed.display_name, "greed");
    }

    #[test]
    fn test_defaults_applied() {
        let snapshot = CatalogSnapshot::from_json(SAMPLE).unwrap();
        let plain = snapshot.get("plain").unwrap();
        assert_eq!(plain.category, "verde");
        assert_eq!(plain.tool, "pickaxe");
        assert_eq!(plain.draw_weight, 1.0);
        assert!(plain.levels.is_empty());
    }

    #[test]
    fn test_default_tiers_when_categories_missing() {
        let snapshot = CatalogSnapshot::from_json(r#"{ "perks": [] }"#).unwrap();
        let ids: Vec<&str> = snapshot.categories().map(|c| c.id.as_str()).collect();
        for tier in ["verde", "azul-clarito", "azul-oscuro", "roja", "morada", "naranja"] {
            assert!(ids.contains(&tier), "missing default tier {}", tier);
        }
        assert_eq!(snapshot.guaranteed_category(), "morada");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_lookup_helpers() {
        let snapshot = CatalogSnapshot::from_json(SAMPLE).unwrap();
        assert_eq!(snapshot.in_category("morada").len(), 1);
        assert_eq!(snapshot.perks_for_tool("HOE").len(), 2);
        assert_eq!(snapshot.perks_for_tool("pickaxe").len(), 1);
        assert_eq!(snapshot.category_or_default("retired").id, "verde");
        assert_eq!(snapshot.category_or_default("morada").id, "morada");
        assert!((snapshot.total_weight() - 11.0).abs() < 1e-9);
    }

    // ========================================================================
    // Validation
    // ========================================================================

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = CatalogSnapshot::from_json(r#"{ "perks": [ {"id": "a"}, {"id": "a"} ] }"#).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicatePerk(id) if id == "a"));
    }

    #[test]
    fn test_rejects_negative_weight() {
        let err = CatalogSnapshot::from_json(r#"{ "perks": [ {"id": "a", "weight": -1} ] }"#).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidWeight { .. }));
    }

    #[test]
    fn test_rejects_unknown_category() {
        let err = CatalogSnapshot::from_json(r#"{ "perks": [ {"id": "a", "category": "gold"} ] }"#).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownCategory { .. }));
    }

    #[test]
    fn test_rejects_level_zero_and_garbage() {
        let zero = r#"{ "perks": [ {"id": "a", "levels": { "0": {} } } ] }"#;
        assert!(matches!(
            CatalogSnapshot::from_json(zero).unwrap_err(),
            CatalogError::InvalidLevel { .. }
        ));
        let garbage = r#"{ "perks": [ {"id": "a", "levels": { "two": {} } } ] }"#;
        assert!(matches!(
            CatalogSnapshot::from_json(garbage).unwrap_err(),
            CatalogError::InvalidLevel { .. }
        ));
    }

    #[test]
    fn test_rejects_mismatched_boost_lists() {
        let doc = r#"{ "perks": [ {"id": "a", "levels": {
            "1": { "boost-type": "coin,orb,money", "boost-amount": "1,2" } } } ] }"#;
        assert!(matches!(
            CatalogSnapshot::from_json(doc).unwrap_err(),
            CatalogError::InvalidBoost { .. }
        ));
    }

    #[test]
    fn test_rejects_missing_guaranteed_tier() {
        let doc = r##"{ "categories": { "gold": { "color": "#FFD700" } }, "perks": [] }"##;
        assert!(matches!(
            CatalogSnapshot::from_json(doc).unwrap_err(),
            CatalogError::UnknownGuaranteedCategory(_)
        ));
    }

    #[test]
    fn test_boost_kind_parse() {
        assert_eq!(BoostKind::parse("Coins"), Some(BoostKind::Coin));
        assert_eq!(BoostKind::parse(" crops "), Some(BoostKind::Crops));
        assert_eq!(BoostKind::parse("xp_multi"), Some(BoostKind::Other("xp_multi".into())));
        assert_eq!(BoostKind::parse(""), None);
        assert_eq!(BoostKind::parse("bad kind"), None);
    }

    // ========================================================================
    // Publication
    // ========================================================================

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let catalog = TraitCatalog::new(CatalogSnapshot::from_json(SAMPLE).unwrap());
        let before = catalog.snapshot();
        assert_eq!(catalog.generation(), 1);

        assert!(catalog.reload_from_json("{ not json").is_err());
        assert_eq!(catalog.snapshot().len(), 3);
        assert_eq!(catalog.generation(), 1);

        let count = catalog.reload_from_json(r#"{ "perks": [ {"id": "solo"} ] }"#).unwrap();
        assert_eq!(count, 1);
        assert_eq!(catalog.generation(), 2);
        assert_eq!(catalog.snapshot().len(), 1);
        assert_eq!(before.len(), 3, "readers keep their own snapshot");
    }
}

//! Host capability surface
//!
//! The perk server never owns tools or money. The embedding game reports which
//! items are managed tools and exposes the currency balance through
//! [`HostIntegration`]. [`LocalHost`] is the in-process implementation used by
//! the demo binary and the test suites.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::item_state::{ToolItem, HOST_IDENTITY_KEY};

/// Stable identity of a player/actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Capabilities provided by the embedding game
#[async_trait]
pub trait HostIntegration: Send + Sync {
    /// Whether the item is a tool the perk system manages
    fn is_managed_tool(&self, tool: &ToolItem) -> bool;

    /// Current in-game money of the actor
    async fn currency_balance(&self, actor: &ActorId) -> f64;

    /// Apply a signed delta to the actor's money; `false` when funds are insufficient
    async fn adjust_currency(&self, actor: &ActorId, delta: f64) -> bool;
}

/// In-process host: managed tools are matched by item kind, balances live in a map
pub struct LocalHost {
    managed_kinds: Vec<String>,
    balances: Mutex<HashMap<ActorId, f64>>,
}

impl LocalHost {
    pub fn new<I, S>(managed_kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            managed_kinds: managed_kinds
                .into_iter()
                .map(|k| k.into().to_ascii_lowercase())
                .collect(),
            balances: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_balance(self, actor: &ActorId, amount: f64) -> Self {
        self.balances.lock().insert(actor.clone(), amount);
        self
    }

    pub fn set_balance(&self, actor: &ActorId, amount: f64) {
        self.balances.lock().insert(actor.clone(), amount);
    }

    pub fn balance(&self, actor: &ActorId) -> f64 {
        self.balances.lock().get(actor).copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl HostIntegration for LocalHost {
    fn is_managed_tool(&self, tool: &ToolItem) -> bool {
        // Tools stamped by the host are managed whatever their kind
        if tool.has_attribute(HOST_IDENTITY_KEY) {
            return true;
        }
        let kind = tool.kind.to_ascii_lowercase();
        self.managed_kinds.iter().any(|k| *k == kind)
    }

    async fn currency_balance(&self, actor: &ActorId) -> f64 {
        self.balance(actor)
    }

    async fn adjust_currency(&self, actor: &ActorId, delta: f64) -> bool {
        if !delta.is_finite() {
            return false;
        }
        let mut balances = self.balances.lock();
        let current = balances.entry(actor.clone()).or_insert(0.0);
        if *current + delta < 0.0 {
            return false;
        }
        *current += delta;
        true
    }
}

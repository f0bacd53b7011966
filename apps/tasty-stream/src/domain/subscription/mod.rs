//! Subscription Registry
//!
//! Domain types for tracking the desired set of (event type, symbol)
//! subscriptions on a market data stream.
//!
//! # Design
//!
//! The registry holds desired state only. It never talks to the wire:
//! callers ask it whether a pair is new, then send the protocol message
//! themselves. Repeat subscribes are no-ops here but are still re-sent on
//! the wire, since the upstream `add` merges duplicates rather than failing.
//!
//! The registry is cleared on disconnect unless the stream is configured to
//! replay subscriptions after reconnecting, in which case
//! [`SubscriptionRegistry::replay_changes`] rebuilds the upstream state.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

// =============================================================================
// Types
// =============================================================================

/// dxFeed event type label (e.g. `Quote`, `Trade`, `Greeks`).
pub type EventType = String;

/// A symbol string (equity ticker, OCC option symbol, or futures symbol).
pub type Symbol = String;

// =============================================================================
// Subscription Changes
// =============================================================================

/// A batch of subscription changes to apply upstream.
///
/// Keys are event types; values are the symbols to add or remove for that
/// event type. Ordered maps keep the wire encoding deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Drop every upstream subscription before applying `add`.
    pub reset: bool,
    /// Symbols to subscribe to, per event type.
    pub add: BTreeMap<EventType, Vec<Symbol>>,
    /// Symbols to unsubscribe from, per event type.
    pub remove: BTreeMap<EventType, Vec<Symbol>>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.reset && self.add.is_empty() && self.remove.is_empty()
    }

    /// A single add.
    #[must_use]
    pub fn add_one(event_type: impl Into<EventType>, symbol: impl Into<Symbol>) -> Self {
        let mut add = BTreeMap::new();
        add.insert(event_type.into(), vec![symbol.into()]);
        Self {
            add,
            ..Self::default()
        }
    }

    /// Replace everything upstream with `symbols` for one event type.
    ///
    /// An empty `symbols` only clears.
    #[must_use]
    pub fn replace_with(event_type: impl Into<EventType>, symbols: &[Symbol]) -> Self {
        let mut add = BTreeMap::new();
        if !symbols.is_empty() {
            let mut symbols = symbols.to_vec();
            symbols.sort();
            symbols.dedup();
            add.insert(event_type.into(), symbols);
        }
        Self {
            reset: true,
            add,
            remove: BTreeMap::new(),
        }
    }

    /// A single remove.
    #[must_use]
    pub fn remove_one(event_type: impl Into<EventType>, symbol: impl Into<Symbol>) -> Self {
        let mut remove = BTreeMap::new();
        remove.insert(event_type.into(), vec![symbol.into()]);
        Self {
            remove,
            ..Self::default()
        }
    }

    /// Total number of (event type, symbol) pairs across add and remove.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.add.values().map(Vec::len).sum::<usize>()
            + self.remove.values().map(Vec::len).sum::<usize>()
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Tracks the desired (event type, symbol) subscriptions for one stream.
///
/// Thread-safe; each stream instance owns its own registry.
///
/// # Example
///
/// ```rust
/// use tasty_stream::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
///
/// assert!(registry.add("Quote", "AAPL"));
/// // Repeat subscribe is a registry no-op
/// assert!(!registry.add("Quote", "AAPL"));
/// assert_eq!(registry.len(), 1);
///
/// assert!(registry.remove("Quote", "AAPL"));
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    desired: RwLock<BTreeMap<EventType, BTreeSet<Symbol>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription.
    ///
    /// Returns `true` if the pair was not already present.
    pub fn add(&self, event_type: &str, symbol: &str) -> bool {
        self.desired
            .write()
            .entry(event_type.to_string())
            .or_default()
            .insert(symbol.to_string())
    }

    /// Drop a subscription.
    ///
    /// Returns `true` if the pair was present.
    pub fn remove(&self, event_type: &str, symbol: &str) -> bool {
        let mut desired = self.desired.write();
        let Some(symbols) = desired.get_mut(event_type) else {
            return false;
        };

        let removed = symbols.remove(symbol);

        // Clean up empty event type entry
        if symbols.is_empty() {
            desired.remove(event_type);
        }

        removed
    }

    /// Check whether a pair is subscribed.
    #[must_use]
    pub fn contains(&self, event_type: &str, symbol: &str) -> bool {
        self.desired
            .read()
            .get(event_type)
            .is_some_and(|s| s.contains(symbol))
    }

    /// Number of logical (event type, symbol) subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.desired.read().values().map(BTreeSet::len).sum()
    }

    /// Check if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.desired.read().is_empty()
    }

    /// Symbols subscribed for an event type, sorted.
    #[must_use]
    pub fn symbols(&self, event_type: &str) -> Vec<Symbol> {
        self.desired
            .read()
            .get(event_type)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Event types with at least one subscription, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<EventType> {
        self.desired.read().keys().cloned().collect()
    }

    /// Build the changes that restore every subscription upstream.
    ///
    /// Returns `None` when the registry is empty.
    #[must_use]
    pub fn replay_changes(&self) -> Option<SubscriptionChanges> {
        let desired = self.desired.read();
        if desired.is_empty() {
            return None;
        }

        let add = desired
            .iter()
            .map(|(event_type, symbols)| (event_type.clone(), symbols.iter().cloned().collect()))
            .collect();

        Some(SubscriptionChanges {
            add,
            ..SubscriptionChanges::default()
        })
    }

    /// Make `symbols` under `event_type` the only desired subscriptions.
    ///
    /// Every other event type is dropped, matching a `reset` upstream.
    pub fn replace(&self, event_type: &str, symbols: &[Symbol]) {
        let mut desired = self.desired.write();
        desired.clear();
        if !symbols.is_empty() {
            desired.insert(event_type.to_string(), symbols.iter().cloned().collect());
        }
    }

    /// Forget every subscription.
    pub fn clear(&self) {
        self.desired.write().clear();
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let desired = self.desired.read();
        SubscriptionStats {
            event_type_count: desired.len(),
            pair_count: desired.values().map(BTreeSet::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of event types with subscriptions.
    pub event_type_count: usize,
    /// Number of (event type, symbol) pairs.
    pub pair_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_new_pair() {
        let registry = SubscriptionRegistry::new();

        assert!(registry.add("Quote", "AAPL"));
        assert!(registry.contains("Quote", "AAPL"));
        assert!(!registry.contains("Trade", "AAPL"));
    }

    #[test]
    fn add_duplicate_is_noop() {
        let registry = SubscriptionRegistry::new();

        registry.add("Quote", "AAPL");
        assert!(!registry.add("Quote", "AAPL"));

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_symbol_different_event_types() {
        let registry = SubscriptionRegistry::new();

        registry.add("Quote", "SPY");
        registry.add("Trade", "SPY");

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.event_types(), vec!["Quote", "Trade"]);
    }

    #[test]
    fn remove_missing_pair() {
        let registry = SubscriptionRegistry::new();

        assert!(!registry.remove("Quote", "AAPL"));

        registry.add("Quote", "MSFT");
        assert!(!registry.remove("Quote", "AAPL"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_last_symbol_drops_event_type() {
        let registry = SubscriptionRegistry::new();

        registry.add("Quote", "AAPL");
        assert!(registry.remove("Quote", "AAPL"));

        assert!(registry.is_empty());
        assert!(registry.event_types().is_empty());
    }

    #[test]
    fn symbols_are_sorted() {
        let registry = SubscriptionRegistry::new();

        registry.add("Quote", "TSLA");
        registry.add("Quote", "AAPL");
        registry.add("Quote", "MSFT");

        assert_eq!(registry.symbols("Quote"), vec!["AAPL", "MSFT", "TSLA"]);
        assert!(registry.symbols("Trade").is_empty());
    }

    #[test]
    fn replay_changes_empty_returns_none() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.replay_changes().is_none());
    }

    #[test]
    fn replay_changes_covers_all_pairs() {
        let registry = SubscriptionRegistry::new();

        registry.add("Quote", "AAPL");
        registry.add("Quote", "TSLA");
        registry.add("Trade", "SPY");

        let changes = registry.replay_changes().unwrap();

        assert_eq!(changes.add.get("Quote").unwrap(), &vec!["AAPL", "TSLA"]);
        assert_eq!(changes.add.get("Trade").unwrap(), &vec!["SPY"]);
        assert!(changes.remove.is_empty());
        assert_eq!(changes.pair_count(), 3);
    }

    #[test]
    fn clear_forgets_everything() {
        let registry = SubscriptionRegistry::new();

        registry.add("Quote", "AAPL");
        registry.add("Trade", "SPY");
        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn stats_counts_pairs_and_types() {
        let registry = SubscriptionRegistry::new();

        registry.add("Quote", "AAPL");
        registry.add("Quote", "MSFT");
        registry.add("Greeks", ".AAPL240315C172.5");

        let stats = registry.stats();
        assert_eq!(stats.event_type_count, 2);
        assert_eq!(stats.pair_count, 3);
    }

    #[test]
    fn changes_helpers() {
        let add = SubscriptionChanges::add_one("Quote", "AAPL");
        assert!(!add.is_empty());
        assert!(add.remove.is_empty());

        let remove = SubscriptionChanges::remove_one("Quote", "AAPL");
        assert!(remove.add.is_empty());
        assert_eq!(remove.pair_count(), 1);

        assert!(SubscriptionChanges::default().is_empty());
        assert!(!add.reset && !remove.reset);
    }

    #[test]
    fn replace_with_sets_reset_and_sorts() {
        let changes = SubscriptionChanges::replace_with(
            "Quote",
            &["TSLA".to_string(), "AAPL".to_string(), "TSLA".to_string()],
        );

        assert!(changes.reset);
        assert_eq!(changes.add.get("Quote").unwrap(), &vec!["AAPL", "TSLA"]);
        assert!(changes.remove.is_empty());
    }

    #[test]
    fn replace_with_nothing_still_clears() {
        let changes = SubscriptionChanges::replace_with("Quote", &[]);

        assert!(changes.reset);
        assert!(changes.add.is_empty());
        assert!(!changes.is_empty());
    }

    #[test]
    fn replace_drops_other_event_types() {
        let registry = SubscriptionRegistry::new();
        registry.add("Quote", "AAPL");
        registry.add("Trade", "SPY");

        registry.replace("Quote", &["MSFT".to_string(), "TSLA".to_string()]);

        assert_eq!(registry.event_types(), vec!["Quote"]);
        assert_eq!(registry.symbols("Quote"), vec!["MSFT", "TSLA"]);

        registry.replace("Quote", &[]);
        assert!(registry.is_empty());
    }
}

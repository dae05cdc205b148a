//! # Tiered Symbol Registry
//!
//! Maps assembly identities to short printable symbols, per namespace.
//!
//! ## Tiers
//!
//! | tier       | code points                         | rule                           |
//! |------------|-------------------------------------|--------------------------------|
//! | `tier0`    | `A1`..`B9` + subscripts             | fixed primitive alphabet       |
//! | `tier1`    | U+1F300 onward                      | frequency >= 1500, 500 slots   |
//! | `tier2`    | U+4E00 onward                       | frequency >= 250, 5000 slots   |
//! | `tier3`    | U+1FA00..=U+1FAFF                   | provisional discoveries        |
//! | `overflow` | U+0100..U+017F then U+0180..U+024F  | everything else, two points    |
//!
//! A full band falls through to the next lower band. Allocation is
//! idempotent: an identity keeps its symbol until it is explicitly promoted
//! or removed.
//!
//! ## Views
//!
//! `snapshot()` and `digest()` are computed from an exported copy and cached
//! until the next mutation or `invalidate()`. Readers holding a snapshot
//! never observe a half-applied change.

use crate::digest;
use crate::error::{Error, Result};
use crate::tier0;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

// =============================================================================
// CODE POINT LAYOUT
// =============================================================================

const TIER1_BASE: u32 = 0x1F300;
const TIER1_SPAN: usize = 0x300;
const TIER2_BASE: u32 = 0x4E00;
const TIER2_SPAN: usize = 0x5200;
const TIER3_BASE: u32 = 0x1FA00;
const TIER3_SPAN: usize = 0x100;
const OVERFLOW_LEAD_BASE: u32 = 0x0100;
const OVERFLOW_LEAD_SPAN: usize = 0x80;
const OVERFLOW_TRAIL_BASE: u32 = 0x0180;
const OVERFLOW_TRAIL_SPAN: usize = 0xD0;
const OVERFLOW_SPAN: usize = OVERFLOW_LEAD_SPAN * OVERFLOW_TRAIL_SPAN;

/// Exported registry state: `namespace -> (identity -> symbol)`.
pub type RegistryState = BTreeMap<String, BTreeMap<String, String>>;

// =============================================================================
// NAMESPACE / TIER / SYMBOL
// =============================================================================

/// Registry namespace. Symbols are unique within one namespace only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Clusters,
    Assemblies,
    Megas,
}

impl Namespace {
    /// Every namespace, in export order.
    pub const ALL: [Self; 3] = [Self::Clusters, Self::Assemblies, Self::Megas];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clusters => "clusters",
            Self::Assemblies => "assemblies",
            Self::Megas => "megas",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| Error::UnknownNamespace(s.to_string()))
    }
}

/// Frequency band a symbol is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tier0,
    Tier1,
    Tier2,
    Tier3,
    Overflow,
}

impl Tier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier0 => "tier0",
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::Overflow => "overflow",
        }
    }

    /// Tier1 and tier2 hold promoted, permanent symbols.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Tier0 | Self::Tier1 | Self::Tier2)
    }

    /// Symbol for slot `index` of this tier, if the range has one.
    fn symbol_at(self, index: usize) -> Option<String> {
        let point = |base: u32, offset: usize| {
            u32::try_from(offset)
                .ok()
                .and_then(|o| base.checked_add(o))
                .and_then(char::from_u32)
        };
        match self {
            Self::Tier0 => None,
            Self::Tier1 if index < TIER1_SPAN => point(TIER1_BASE, index).map(String::from),
            Self::Tier2 if index < TIER2_SPAN => point(TIER2_BASE, index).map(String::from),
            Self::Tier3 if index < TIER3_SPAN => point(TIER3_BASE, index).map(String::from),
            Self::Overflow if index < OVERFLOW_SPAN => {
                let lead = point(OVERFLOW_LEAD_BASE, index / OVERFLOW_TRAIL_SPAN)?;
                let trail = point(OVERFLOW_TRAIL_BASE, index % OVERFLOW_TRAIL_SPAN)?;
                Some([lead, trail].iter().collect())
            }
            _ => None,
        }
    }

    /// Hard upper bound of the code point range.
    fn span(self) -> usize {
        match self {
            Self::Tier0 => tier0::PRIMITIVES.len(),
            Self::Tier1 => TIER1_SPAN,
            Self::Tier2 => TIER2_SPAN,
            Self::Tier3 => TIER3_SPAN,
            Self::Overflow => OVERFLOW_SPAN,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a symbol by its code points. Returns the slot index for
/// allocated ranges. Foreign symbols land in overflow without an index.
#[must_use]
pub fn classify(symbol: &str) -> (Tier, Option<usize>) {
    let points: Vec<u32> = symbol.chars().map(u32::from).collect();
    let offset = |p: u32, base: u32, span: usize| {
        p.checked_sub(base)
            .map(|o| o as usize)
            .filter(|o| *o < span)
    };
    match points.as_slice() {
        [p] => {
            if let Some(i) = offset(*p, TIER1_BASE, TIER1_SPAN) {
                (Tier::Tier1, Some(i))
            } else if let Some(i) = offset(*p, TIER2_BASE, TIER2_SPAN) {
                (Tier::Tier2, Some(i))
            } else if let Some(i) = offset(*p, TIER3_BASE, TIER3_SPAN) {
                (Tier::Tier3, Some(i))
            } else {
                (Tier::Overflow, None)
            }
        }
        [lead, trail] => {
            match (
                offset(*lead, OVERFLOW_LEAD_BASE, OVERFLOW_LEAD_SPAN),
                offset(*trail, OVERFLOW_TRAIL_BASE, OVERFLOW_TRAIL_SPAN),
            ) {
                (Some(l), Some(t)) => (Tier::Overflow, Some(l * OVERFLOW_TRAIL_SPAN + t)),
                _ if tier0::parse(symbol).is_ok() => (Tier::Tier0, None),
                _ => (Tier::Overflow, None),
            }
        }
        _ if tier0::parse(symbol).is_ok() => (Tier::Tier0, None),
        _ => (Tier::Overflow, None),
    }
}

/// A printable registry symbol (one or two code points for allocated tiers).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        classify(&self.0).0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TIER POLICY
// =============================================================================

/// Capacities and frequency floors for tiered allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    pub tier1_capacity: usize,
    pub tier1_min_frequency: i64,
    pub tier2_capacity: usize,
    pub tier2_min_frequency: i64,
    pub tier3_capacity: usize,
    /// Frequency assigned to identities ranked past tier2 when seeding.
    pub overflow_frequency: i64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            tier1_capacity: 500,
            tier1_min_frequency: 1500,
            tier2_capacity: 5000,
            tier2_min_frequency: 250,
            tier3_capacity: TIER3_SPAN,
            overflow_frequency: 25,
        }
    }
}

impl TierPolicy {
    /// Effective slot count, never larger than the code point range.
    #[must_use]
    pub fn capacity(&self, tier: Tier) -> usize {
        let configured = match tier {
            Tier::Tier0 => tier.span(),
            Tier::Tier1 => self.tier1_capacity,
            Tier::Tier2 => self.tier2_capacity,
            Tier::Tier3 => self.tier3_capacity,
            Tier::Overflow => OVERFLOW_SPAN,
        };
        configured.min(tier.span())
    }

    /// Frequency used for the identity at `rank` in a ranked seed list.
    #[must_use]
    pub fn seed_frequency(&self, rank: usize) -> i64 {
        if rank < self.tier1_capacity {
            self.tier1_min_frequency
        } else if rank < self.tier1_capacity.saturating_add(self.tier2_capacity) {
            self.tier2_min_frequency
        } else {
            self.overflow_frequency
        }
    }
}

/// Occupancy of one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub tier0: usize,
    pub tier1: usize,
    pub tier2: usize,
    pub tier3: usize,
    pub overflow: usize,
}

impl TierStats {
    fn bump(&mut self, tier: Tier) {
        let slot = match tier {
            Tier::Tier0 => &mut self.tier0,
            Tier::Tier1 => &mut self.tier1,
            Tier::Tier2 => &mut self.tier2,
            Tier::Tier3 => &mut self.tier3,
            Tier::Overflow => &mut self.overflow,
        };
        *slot = slot.saturating_add(1);
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.tier0 + self.tier1 + self.tier2 + self.tier3 + self.overflow
    }
}

// =============================================================================
// NAMESPACE TABLE
// =============================================================================

#[derive(Debug, Clone, Default)]
struct NamespaceTable {
    symbols: BTreeMap<String, Symbol>,
    owners: BTreeMap<Symbol, String>,
    tiers: BTreeMap<String, Tier>,
    payloads: BTreeMap<String, Value>,
    next: BTreeMap<Tier, usize>,
}

impl NamespaceTable {
    fn occupancy(&self, tier: Tier) -> usize {
        self.tiers.values().filter(|t| **t == tier).count()
    }

    /// First unowned slot at or after the tier's cursor.
    fn free_slot(&self, tier: Tier, policy: &TierPolicy) -> Option<(usize, Symbol)> {
        let capacity = policy.capacity(tier);
        if self.occupancy(tier) >= capacity {
            return None;
        }
        let start = self.next.get(&tier).copied().unwrap_or(0);
        (start..capacity).find_map(|index| {
            let symbol = Symbol(tier.symbol_at(index)?);
            (!self.owners.contains_key(&symbol)).then_some((index, symbol))
        })
    }

    fn bind(&mut self, identity: &str, symbol: Symbol, tier: Tier, index: Option<usize>) {
        if let Some(index) = index {
            let cursor = self.next.entry(tier).or_insert(0);
            *cursor = (*cursor).max(index.saturating_add(1));
        }
        self.owners.insert(symbol.clone(), identity.to_string());
        self.symbols.insert(identity.to_string(), symbol);
        self.tiers.insert(identity.to_string(), tier);
    }

    fn release(&mut self, identity: &str) -> Option<Symbol> {
        let symbol = self.symbols.remove(identity)?;
        self.owners.remove(&symbol);
        self.tiers.remove(identity);
        Some(symbol)
    }
}

// =============================================================================
// SYMBOL REGISTRY
// =============================================================================

/// The live registry. Owned by one writer; shared through [`SharedRegistry`].
#[derive(Debug, Clone)]
pub struct SymbolRegistry {
    policy: TierPolicy,
    tables: BTreeMap<Namespace, NamespaceTable>,
    view: OnceLock<Arc<RegistryState>>,
    digest_view: OnceLock<String>,
    invalidations: u64,
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::new(TierPolicy::default())
    }
}

impl SymbolRegistry {
    /// Create an empty registry with the given policy.
    #[must_use]
    pub fn new(policy: TierPolicy) -> Self {
        Self {
            policy,
            tables: Namespace::ALL
                .into_iter()
                .map(|ns| (ns, NamespaceTable::default()))
                .collect(),
            view: OnceLock::new(),
            digest_view: OnceLock::new(),
            invalidations: 0,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    fn table(&self, namespace: Namespace) -> Option<&NamespaceTable> {
        self.tables.get(&namespace)
    }

    fn table_mut(&mut self, namespace: Namespace) -> &mut NamespaceTable {
        self.tables.entry(namespace).or_default()
    }

    /// Drop the cached snapshot and digest after an entry changed.
    fn clear_views(&mut self) {
        self.view = OnceLock::new();
        self.digest_view = OnceLock::new();
    }

    /// Allocate (or return the existing) symbol for `identity`.
    ///
    /// Existing identities keep their symbol, including provisional tier3
    /// slots, and do not consume another slot.
    pub fn allocate(
        &mut self,
        namespace: Namespace,
        identity: &str,
        payload: Value,
        frequency: i64,
    ) -> Result<Symbol> {
        if frequency <= 0 {
            return Err(Error::InvalidFrequency(frequency));
        }
        if let Some(existing) = self.lookup(namespace, identity) {
            return Ok(existing.clone());
        }

        let policy = self.policy.clone();
        let bands: &[Tier] = if frequency >= policy.tier1_min_frequency {
            &[Tier::Tier1, Tier::Tier2, Tier::Overflow]
        } else if frequency >= policy.tier2_min_frequency {
            &[Tier::Tier2, Tier::Overflow]
        } else {
            &[Tier::Overflow]
        };

        let table = self.table_mut(namespace);
        let Some((tier, index, symbol)) = bands.iter().find_map(|tier| {
            table
                .free_slot(*tier, &policy)
                .map(|(index, symbol)| (*tier, index, symbol))
        }) else {
            return Err(Error::RangeExhausted {
                namespace,
                tier: Tier::Overflow,
            });
        };
        table.bind(identity, symbol.clone(), tier, Some(index));
        table.payloads.insert(identity.to_string(), payload);
        self.clear_views();
        Ok(symbol)
    }

    /// Reserve a provisional tier3 slot for a freshly discovered identity.
    pub fn reserve_provisional(
        &mut self,
        namespace: Namespace,
        identity: &str,
        payload: Value,
    ) -> Result<Symbol> {
        if let Some(existing) = self.lookup(namespace, identity) {
            return Ok(existing.clone());
        }
        let policy = self.policy.clone();
        let table = self.table_mut(namespace);
        let (index, symbol) =
            table
                .free_slot(Tier::Tier3, &policy)
                .ok_or(Error::RangeExhausted {
                    namespace,
                    tier: Tier::Tier3,
                })?;
        table.bind(identity, symbol.clone(), Tier::Tier3, Some(index));
        table.payloads.insert(identity.to_string(), payload);
        self.clear_views();
        Ok(symbol)
    }

    /// Bind `identity` to the fixed primitive symbol for `sides`.
    pub fn assign_primitive(
        &mut self,
        namespace: Namespace,
        identity: &str,
        sides: u32,
    ) -> Result<Symbol> {
        let symbol = Symbol::new(tier0::primitive_symbol(sides)?);
        if let Some(existing) = self.lookup(namespace, identity) {
            return Ok(existing.clone());
        }
        if self.identity_of(namespace, symbol.as_str()).is_some() {
            return Err(Error::DuplicateSymbol {
                namespace,
                symbol: symbol.0,
            });
        }
        self.table_mut(namespace)
            .bind(identity, symbol.clone(), Tier::Tier0, None);
        self.clear_views();
        Ok(symbol)
    }

    /// Move a provisional or overflow identity into a permanent tier.
    ///
    /// Identities already in tier0/1/2 keep their symbol. The old slot is
    /// released only after the new one is bound.
    pub fn promote(&mut self, namespace: Namespace, identity: &str, frequency: i64) -> Result<Symbol> {
        if frequency <= 0 {
            return Err(Error::InvalidFrequency(frequency));
        }
        if let (Some(symbol), Some(tier)) = (
            self.lookup(namespace, identity),
            self.tier_of(namespace, identity),
        ) {
            if tier.is_permanent() {
                return Ok(symbol.clone());
            }
        }

        let policy = self.policy.clone();
        let bands: &[Tier] = if frequency >= policy.tier1_min_frequency {
            &[Tier::Tier1, Tier::Tier2]
        } else {
            &[Tier::Tier2, Tier::Tier1]
        };
        let table = self.table_mut(namespace);
        let Some((tier, index, symbol)) = bands.iter().find_map(|tier| {
            table
                .free_slot(*tier, &policy)
                .map(|(index, symbol)| (*tier, index, symbol))
        }) else {
            return Err(Error::RangeExhausted {
                namespace,
                tier: Tier::Tier2,
            });
        };
        let payload = table.payloads.get(identity).cloned();
        table.release(identity);
        table.bind(identity, symbol.clone(), tier, Some(index));
        if let Some(payload) = payload {
            table.payloads.insert(identity.to_string(), payload);
        }
        self.clear_views();
        Ok(symbol)
    }

    /// Allocate identities in rank order, deriving each frequency from its rank.
    pub fn seed_ranked<I>(&mut self, namespace: Namespace, entries: I) -> Result<Vec<Symbol>>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        entries
            .into_iter()
            .enumerate()
            .map(|(rank, (identity, payload))| {
                let frequency = self.policy.seed_frequency(rank);
                self.allocate(namespace, &identity, payload, frequency)
            })
            .collect()
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    #[must_use]
    pub fn lookup(&self, namespace: Namespace, identity: &str) -> Option<&Symbol> {
        self.table(namespace)?.symbols.get(identity)
    }

    #[must_use]
    pub fn identity_of(&self, namespace: Namespace, symbol: &str) -> Option<&str> {
        self.table(namespace)?
            .owners
            .get(&Symbol::new(symbol))
            .map(String::as_str)
    }

    #[must_use]
    pub fn tier_of(&self, namespace: Namespace, identity: &str) -> Option<Tier> {
        self.table(namespace)?.tiers.get(identity).copied()
    }

    #[must_use]
    pub fn payload(&self, namespace: Namespace, identity: &str) -> Option<&Value> {
        self.table(namespace)?.payloads.get(identity)
    }

    /// Total number of identities across namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.symbols.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy per tier for every namespace.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<Namespace, TierStats> {
        self.tables
            .iter()
            .map(|(ns, table)| {
                let mut stats = TierStats::default();
                table.tiers.values().for_each(|tier| stats.bump(*tier));
                (*ns, stats)
            })
            .collect()
    }

    // =========================================================================
    // REPAIR
    // =========================================================================

    /// Drop an identity. Its slot is not reused by later allocations.
    pub fn remove(&mut self, namespace: Namespace, identity: &str) -> Option<Symbol> {
        self.lookup(namespace, identity)?;
        let table = self.table_mut(namespace);
        table.payloads.remove(identity);
        let released = table.release(identity);
        self.clear_views();
        released
    }

    /// Bind an exact `identity -> symbol` pair, replacing any previous symbol
    /// of that identity.
    pub fn insert_entry(&mut self, namespace: Namespace, identity: &str, symbol: &str) -> Result<()> {
        if let Some(owner) = self.identity_of(namespace, symbol) {
            if owner == identity {
                return Ok(());
            }
            return Err(Error::DuplicateSymbol {
                namespace,
                symbol: symbol.to_string(),
            });
        }
        let (tier, index) = classify(symbol);
        let table = self.table_mut(namespace);
        table.release(identity);
        table.bind(identity, Symbol::new(symbol), tier, index);
        self.clear_views();
        Ok(())
    }

    // =========================================================================
    // STATE EXPORT / IMPORT
    // =========================================================================

    /// Export a fresh copy of the full state. Every namespace is present.
    #[must_use]
    pub fn dump_state(&self) -> RegistryState {
        self.tables
            .iter()
            .map(|(ns, table)| {
                let entries = table
                    .symbols
                    .iter()
                    .map(|(id, sym)| (id.clone(), sym.0.clone()))
                    .collect();
                (ns.as_str().to_string(), entries)
            })
            .collect()
    }

    /// Shared immutable export, cached until the next change.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistryState> {
        Arc::clone(self.view.get_or_init(|| Arc::new(self.dump_state())))
    }

    /// Digest of the current state, cached alongside the snapshot.
    #[must_use]
    pub fn digest(&self) -> String {
        self.digest_view
            .get_or_init(|| state_digest(&self.snapshot()))
            .clone()
    }

    /// Replace the whole state. Payloads survive for identities that remain.
    pub fn load_state(&mut self, state: &RegistryState) -> Result<()> {
        let mut tables: BTreeMap<Namespace, NamespaceTable> = Namespace::ALL
            .into_iter()
            .map(|ns| (ns, NamespaceTable::default()))
            .collect();

        for (name, entries) in state {
            let namespace: Namespace = name.parse()?;
            let table = tables.entry(namespace).or_default();
            for (identity, raw) in entries {
                let symbol = Symbol::new(raw.as_str());
                if table.owners.contains_key(&symbol) {
                    return Err(Error::DuplicateSymbol {
                        namespace,
                        symbol: raw.clone(),
                    });
                }
                let (tier, index) = classify(raw);
                table.bind(identity, symbol, tier, index);
                if let Some(payload) = self
                    .table(namespace)
                    .and_then(|old| old.payloads.get(identity))
                {
                    table.payloads.insert(identity.clone(), payload.clone());
                }
            }
        }

        self.tables = tables;
        self.clear_views();
        Ok(())
    }

    /// Drop cached views so the next reader rebuilds them.
    pub fn invalidate(&mut self) {
        self.clear_views();
        self.invalidations = self.invalidations.saturating_add(1);
    }

    /// Number of explicit `invalidate()` calls so far.
    #[must_use]
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations
    }
}

/// Registry state as a JSON value.
#[must_use]
pub fn state_to_value(state: &RegistryState) -> Value {
    Value::Object(
        state
            .iter()
            .map(|(ns, entries)| {
                let inner: Map<String, Value> = entries
                    .iter()
                    .map(|(id, sym)| (id.clone(), Value::String(sym.clone())))
                    .collect();
                (ns.clone(), Value::Object(inner))
            })
            .collect(),
    )
}

/// Canonical digest of an exported state.
#[must_use]
pub fn state_digest(state: &RegistryState) -> String {
    digest::digest_value(&state_to_value(state))
}

// =============================================================================
// SHARED HANDLE
// =============================================================================

/// Cloneable handle to one live registry.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<SymbolRegistry>>,
}

impl SharedRegistry {
    #[must_use]
    pub fn new(registry: SymbolRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SymbolRegistry> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SymbolRegistry> {
        self.inner.write()
    }

    /// Exported copy, taken under one read lock.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistryState> {
        self.inner.read().snapshot()
    }

    #[must_use]
    pub fn digest(&self) -> String {
        self.inner.read().digest()
    }

    pub fn invalidate(&self) {
        self.inner.write().invalidate();
    }
}

// =============================================================================
// TESTS
// =============================================================================

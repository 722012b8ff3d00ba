//! Trigger conflict resolution strategies.
//!
//! When more than one hook claims the same trigger, exactly one may run
//! per occurrence. [`ConflictResolver`] picks that winner using the
//! configured [`ConflictStrategy`]; losers never enter any batch.
//!
//! The resolver runs before graph construction, so downstream stages only
//! ever see the surviving candidate set.

use core::fmt;

use hashbrown::HashMap;
use parking_lot::Mutex;
use rand::Rng;

use altair_hooks::hook::HookMetadata;

// ─────────────────────────────────────────────────────────────────────────────
// ConflictStrategy
// ─────────────────────────────────────────────────────────────────────────────

/// Strategy for choosing one winner among trigger-competing hooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Lowest numeric priority value wins (numerically lower is higher
    /// priority).
    #[default]
    PriorityBased,
    /// Winner rotates across calls, tracked per trigger.
    RoundRobin,
    /// Under high CPU the historically fastest hook wins; otherwise the
    /// highest-priority hook wins.
    LoadBased,
    /// Winner drawn with probability proportional to `10 - priority`.
    WeightedRandom,
    /// The hook registered earliest wins.
    FirstRegistered,
    /// The hook registered latest wins.
    LastRegistered,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStrategy::PriorityBased => "priority_based",
            ConflictStrategy::RoundRobin => "round_robin",
            ConflictStrategy::LoadBased => "load_based",
            ConflictStrategy::WeightedRandom => "weighted_random",
            ConflictStrategy::FirstRegistered => "first_registered",
            ConflictStrategy::LastRegistered => "last_registered",
        };
        write!(f, "{name}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConflictResolution
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of resolving one contested trigger.
#[derive(Debug, Clone)]
pub struct ConflictResolution {
    /// The contested trigger.
    pub trigger: String,
    /// The hook that runs for this occurrence, if any candidate existed.
    pub winner: Option<String>,
    /// Hooks excluded from this occurrence.
    pub losers: Vec<String>,
    /// The strategy that produced this outcome.
    pub strategy: ConflictStrategy,
    /// Human-readable explanation of the choice.
    pub reason: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// ConflictResolver
// ─────────────────────────────────────────────────────────────────────────────

/// Live signals consulted by load-sensitive strategies.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSignal {
    /// Rolling average CPU usage in percent, if telemetry is available.
    pub cpu_average: Option<f64>,
    /// CPU percentage above which the system counts as loaded.
    pub cpu_high_threshold: f64,
}

/// Picks exactly one winner among hooks competing for a trigger.
///
/// Round-robin rotation counters persist across calls for the resolver's
/// lifetime, keyed by trigger name.
#[derive(Debug, Default)]
pub struct ConflictResolver {
    round_robin: Mutex<HashMap<String, usize>>,
}

impl ConflictResolver {
    /// Creates a resolver with empty rotation state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves one trigger occurrence.
    ///
    /// With zero or one candidate the input passes through with reason
    /// "no conflict". With N > 1 candidates, exactly one winner and N-1
    /// losers are returned, for every strategy.
    #[must_use]
    pub fn resolve_conflicts(
        &self,
        trigger: &str,
        competing: &[String],
        metadata: &HashMap<String, HookMetadata>,
        strategy: ConflictStrategy,
        load: LoadSignal,
    ) -> ConflictResolution {
        // Deterministic candidate order keeps every strategy stable.
        let mut candidates: Vec<&String> = competing.iter().collect();
        candidates.sort();

        if candidates.len() <= 1 {
            return ConflictResolution {
                trigger: trigger.to_string(),
                winner: candidates.first().map(|c| (*c).clone()),
                losers: Vec::new(),
                strategy,
                reason: "no conflict".to_string(),
            };
        }

        let (winner, reason) = match strategy {
            ConflictStrategy::PriorityBased => Self::by_priority(&candidates, metadata),
            ConflictStrategy::RoundRobin => self.by_rotation(trigger, &candidates),
            ConflictStrategy::LoadBased => Self::by_load(&candidates, metadata, load),
            ConflictStrategy::WeightedRandom => Self::by_weighted_random(&candidates, metadata),
            ConflictStrategy::FirstRegistered => Self::by_age(&candidates, metadata, false),
            ConflictStrategy::LastRegistered => Self::by_age(&candidates, metadata, true),
        };

        let losers = candidates
            .iter()
            .filter(|c| ***c != winner)
            .map(|c| (*c).clone())
            .collect();

        ConflictResolution {
            trigger: trigger.to_string(),
            winner: Some(winner),
            losers,
            strategy,
            reason,
        }
    }

    fn priority_of(name: &str, metadata: &HashMap<String, HookMetadata>) -> i32 {
        metadata.get(name).map_or(i32::MAX, |m| m.priority)
    }

    fn by_priority(
        candidates: &[&String],
        metadata: &HashMap<String, HookMetadata>,
    ) -> (String, String) {
        let winner = candidates
            .iter()
            .min_by_key(|c| (Self::priority_of(c, metadata), (*c).clone()))
            .map(|c| (*c).clone())
            .unwrap_or_default();
        let priority = Self::priority_of(&winner, metadata);
        (winner, format!("highest priority (class {priority})"))
    }

    fn by_rotation(&self, trigger: &str, candidates: &[&String]) -> (String, String) {
        let mut counters = self.round_robin.lock();
        let counter = counters.entry_ref(trigger).or_insert(0);
        let index = *counter % candidates.len();
        *counter += 1;
        (
            candidates[index].clone(),
            format!("round robin rotation (slot {index})"),
        )
    }

    fn by_load(
        candidates: &[&String],
        metadata: &HashMap<String, HookMetadata>,
        load: LoadSignal,
    ) -> (String, String) {
        let loaded = load
            .cpu_average
            .is_some_and(|cpu| cpu > load.cpu_high_threshold);
        if loaded {
            let winner = candidates
                .iter()
                .min_by_key(|c| {
                    let avg = metadata
                        .get(**c)
                        .map_or(u128::MAX, |m| m.average_execution_time.as_nanos());
                    (avg, (*c).clone())
                })
                .map(|c| (*c).clone())
                .unwrap_or_default();
            (winner, "system loaded, fastest hook wins".to_string())
        } else {
            let (winner, _) = Self::by_priority(candidates, metadata);
            (winner, "system idle, highest priority wins".to_string())
        }
    }

    fn by_weighted_random(
        candidates: &[&String],
        metadata: &HashMap<String, HookMetadata>,
    ) -> (String, String) {
        let weights: Vec<f64> = candidates
            .iter()
            .map(|c| f64::from((10 - Self::priority_of(c, metadata).clamp(0, 10)).max(1)))
            .collect();
        let total: f64 = weights.iter().sum();

        let mut rng = rand::rng();
        let mut draw = rng.random_range(0.0..total);
        for (candidate, weight) in candidates.iter().zip(&weights) {
            if draw < *weight {
                return (
                    (*candidate).clone(),
                    "weighted random draw by priority".to_string(),
                );
            }
            draw -= weight;
        }
        // Floating point slack lands on the last candidate.
        (
            candidates[candidates.len() - 1].clone(),
            "weighted random draw by priority".to_string(),
        )
    }

    fn by_age(
        candidates: &[&String],
        metadata: &HashMap<String, HookMetadata>,
        latest: bool,
    ) -> (String, String) {
        let key = |c: &&&String| {
            metadata
                .get(**c)
                .map(|m| m.created_at)
                .unwrap_or(std::time::UNIX_EPOCH)
        };
        let winner = if latest {
            candidates.iter().max_by_key(key)
        } else {
            candidates.iter().min_by_key(key)
        };
        let winner = winner.map(|c| (*c).clone()).unwrap_or_default();
        let reason = if latest {
            "most recently registered".to_string()
        } else {
            "earliest registered".to_string()
        };
        (winner, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::time::SystemTime;

    fn meta(hooks: Vec<HookMetadata>) -> HashMap<String, HookMetadata> {
        hooks.into_iter().map(|h| (h.name.clone(), h)).collect()
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn zero_and_one_candidates_pass_through() {
        let resolver = ConflictResolver::new();
        let metadata = meta(vec![HookMetadata::new("only", 1)]);

        let empty = resolver.resolve_conflicts(
            "t",
            &[],
            &metadata,
            ConflictStrategy::PriorityBased,
            LoadSignal::default(),
        );
        assert_eq!(empty.winner, None);
        assert_eq!(empty.reason, "no conflict");

        let single = resolver.resolve_conflicts(
            "t",
            &names(&["only"]),
            &metadata,
            ConflictStrategy::PriorityBased,
            LoadSignal::default(),
        );
        assert_eq!(single.winner.as_deref(), Some("only"));
        assert!(single.losers.is_empty());
    }

    #[test]
    fn priority_based_picks_lowest_class() {
        let resolver = ConflictResolver::new();
        let metadata = meta(vec![HookMetadata::new("x", 1), HookMetadata::new("y", 5)]);

        let resolution = resolver.resolve_conflicts(
            "on_save",
            &names(&["x", "y"]),
            &metadata,
            ConflictStrategy::PriorityBased,
            LoadSignal::default(),
        );
        assert_eq!(resolution.winner.as_deref(), Some("x"));
        assert_eq!(resolution.losers, vec!["y".to_string()]);
    }

    #[test]
    fn round_robin_rotates_per_trigger() {
        let resolver = ConflictResolver::new();
        let metadata = meta(vec![HookMetadata::new("a", 1), HookMetadata::new("b", 1)]);
        let competing = names(&["a", "b"]);

        let first = resolver
            .resolve_conflicts(
                "t",
                &competing,
                &metadata,
                ConflictStrategy::RoundRobin,
                LoadSignal::default(),
            )
            .winner
            .unwrap();
        let second = resolver
            .resolve_conflicts(
                "t",
                &competing,
                &metadata,
                ConflictStrategy::RoundRobin,
                LoadSignal::default(),
            )
            .winner
            .unwrap();
        assert_ne!(first, second);

        // A different trigger has independent rotation state.
        let other = resolver
            .resolve_conflicts(
                "u",
                &competing,
                &metadata,
                ConflictStrategy::RoundRobin,
                LoadSignal::default(),
            )
            .winner
            .unwrap();
        assert_eq!(other, first);
    }

    #[test]
    fn load_based_prefers_fast_hooks_under_pressure() {
        let resolver = ConflictResolver::new();
        let metadata = meta(vec![
            HookMetadata::new("slow_but_important", 1)
                .with_average_execution_time(Duration::from_secs(2)),
            HookMetadata::new("quick", 9)
                .with_average_execution_time(Duration::from_millis(5)),
        ]);
        let competing = names(&["quick", "slow_but_important"]);

        let busy = resolver.resolve_conflicts(
            "t",
            &competing,
            &metadata,
            ConflictStrategy::LoadBased,
            LoadSignal {
                cpu_average: Some(95.0),
                cpu_high_threshold: 75.0,
            },
        );
        assert_eq!(busy.winner.as_deref(), Some("quick"));

        let idle = resolver.resolve_conflicts(
            "t",
            &competing,
            &metadata,
            ConflictStrategy::LoadBased,
            LoadSignal {
                cpu_average: Some(10.0),
                cpu_high_threshold: 75.0,
            },
        );
        assert_eq!(idle.winner.as_deref(), Some("slow_but_important"));
    }

    #[test]
    fn load_based_without_telemetry_falls_back_to_priority() {
        let resolver = ConflictResolver::new();
        let metadata = meta(vec![HookMetadata::new("a", 2), HookMetadata::new("b", 7)]);

        let resolution = resolver.resolve_conflicts(
            "t",
            &names(&["a", "b"]),
            &metadata,
            ConflictStrategy::LoadBased,
            LoadSignal::default(),
        );
        assert_eq!(resolution.winner.as_deref(), Some("a"));
    }

    #[test]
    fn weighted_random_always_picks_exactly_one() {
        let resolver = ConflictResolver::new();
        let metadata = meta(vec![
            HookMetadata::new("a", 1),
            HookMetadata::new("b", 5),
            HookMetadata::new("c", 9),
        ]);
        let competing = names(&["a", "b", "c"]);

        for _ in 0..50 {
            let resolution = resolver.resolve_conflicts(
                "t",
                &competing,
                &metadata,
                ConflictStrategy::WeightedRandom,
                LoadSignal::default(),
            );
            let winner = resolution.winner.unwrap();
            assert!(competing.contains(&winner));
            assert_eq!(resolution.losers.len(), 2);
            assert!(!resolution.losers.contains(&winner));
        }
    }

    #[test]
    fn registration_order_strategies() {
        let resolver = ConflictResolver::new();
        let early = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let late = SystemTime::UNIX_EPOCH + Duration::from_secs(200);
        let metadata = meta(vec![
            HookMetadata::new("old", 5).with_created_at(early),
            HookMetadata::new("new", 5).with_created_at(late),
        ]);
        let competing = names(&["new", "old"]);

        let first = resolver.resolve_conflicts(
            "t",
            &competing,
            &metadata,
            ConflictStrategy::FirstRegistered,
            LoadSignal::default(),
        );
        assert_eq!(first.winner.as_deref(), Some("old"));

        let last = resolver.resolve_conflicts(
            "t",
            &competing,
            &metadata,
            ConflictStrategy::LastRegistered,
            LoadSignal::default(),
        );
        assert_eq!(last.winner.as_deref(), Some("new"));
    }

    #[test]
    fn every_strategy_returns_one_winner() {
        let resolver = ConflictResolver::new();
        let metadata = meta(vec![
            HookMetadata::new("a", 1),
            HookMetadata::new("b", 3),
            HookMetadata::new("c", 6),
        ]);
        let competing = names(&["a", "b", "c"]);

        for strategy in [
            ConflictStrategy::PriorityBased,
            ConflictStrategy::RoundRobin,
            ConflictStrategy::LoadBased,
            ConflictStrategy::WeightedRandom,
            ConflictStrategy::FirstRegistered,
            ConflictStrategy::LastRegistered,
        ] {
            let resolution = resolver.resolve_conflicts(
                "t",
                &competing,
                &metadata,
                strategy,
                LoadSignal::default(),
            );
            assert!(resolution.winner.is_some(), "strategy {strategy}");
            assert_eq!(resolution.losers.len(), 2, "strategy {strategy}");
        }
    }
}

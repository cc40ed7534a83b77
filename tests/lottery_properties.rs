//! Lottery Property Tests
//!
//! Statistical and property-based checks for the weighted draw, the
//! guaranteed tier and the pity policy.

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;

use tool_perks::catalog::CatalogSnapshot;
use tool_perks::lottery::{Lottery, PityPolicy};

const TIERS: [&str; 6] = ["verde", "azul-clarito", "azul-oscuro", "roja", "morada", "naranja"];

fn catalog_from(perks: &[(usize, f64)]) -> CatalogSnapshot {
    let perks: Vec<_> = perks
        .iter()
        .enumerate()
        .map(|(i, (tier, weight))| {
            json!({ "id": format!("perk{}", i), "category": TIERS[*tier], "weight": weight })
        })
        .collect();
    CatalogSnapshot::from_json(&json!({ "perks": perks }).to_string()).expect("valid catalog")
}

// ============================================================================
// Weighted convergence
// ============================================================================

#[test]
fn test_weighted_draws_converge_to_weights() {
    let snapshot = catalog_from(&[(0, 5.0), (1, 3.0), (4, 2.0), (5, 0.0)]);
    let mut lottery = Lottery::seeded(2024);
    let samples = 100_000;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..samples {
        let perk = lottery.draw_perk(&snapshot, None).unwrap();
        *counts.entry(perk.id.clone()).or_default() += 1;
    }

    let total = snapshot.total_weight();
    for perk in snapshot.perks() {
        let expected = perk.draw_weight / total;
        let observed = counts.get(&perk.id).copied().unwrap_or(0) as f64 / samples as f64;
        assert!(
            (observed - expected).abs() < 0.01,
            "{}: observed {:.4}, expected {:.4}",
            perk.id,
            observed,
            expected
        );
    }
    assert!(!counts.contains_key("perk3"), "zero-weight perk was drawn");
}

#[test]
fn test_levels_are_uniform() {
    let json = r#"{ "perks": [ { "id": "fertility", "levels": {
        "1": { "boost-type": "crops", "boost-amount": 1 },
        "2": { "boost-type": "crops", "boost-amount": 2 },
        "5": { "boost-type": "crops", "boost-amount": 5 } } } ] }"#;
    let snapshot = CatalogSnapshot::from_json(json).unwrap();
    let perk = snapshot.get("fertility").unwrap();
    let mut lottery = Lottery::seeded(77);

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for _ in 0..30_000 {
        *counts.entry(lottery.draw_level(perk)).or_default() += 1;
    }
    assert_eq!(counts.len(), 3);
    for level in [1, 2, 5] {
        let share = counts[&level] as f64 / 30_000.0;
        assert!((share - 1.0 / 3.0).abs() < 0.02, "level {} share {:.3}", level, share);
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_guaranteed_tier_always_hits(
        perks in prop::collection::vec((0usize..6, 0.0f64..10.0), 1..20),
        tier in 0usize..6,
        seed in any::<u64>(),
    ) {
        let snapshot = catalog_from(&perks);
        let mut lottery = Lottery::seeded(seed);
        let tier_name = TIERS[tier];
        let tier_has_perks = perks.iter().any(|(t, _)| *t == tier);

        for _ in 0..20 {
            let perk = lottery.draw_perk(&snapshot, Some(tier_name)).unwrap();
            if tier_has_perks {
                prop_assert_eq!(&perk.category, tier_name);
            }
        }
    }

    #[test]
    fn prop_pity_threshold(
        pity in 0i64..1_000,
        draws in 1i64..=10,
        threshold in 1i64..1_000,
    ) {
        let outcome = PityPolicy::new(threshold).evaluate(pity, draws);
        prop_assert_eq!(outcome.guaranteed, pity + draws >= threshold);
        if outcome.guaranteed {
            prop_assert_eq!(outcome.next_pity, 0);
        } else {
            prop_assert_eq!(outcome.next_pity, pity + draws);
        }
    }

    #[test]
    fn prop_pity_accumulates_until_guarantee(
        sequences in prop::collection::vec(1i64..=10, 1..200),
        threshold in 1i64..300,
    ) {
        let policy = PityPolicy::new(threshold);
        let mut pity = 0;
        let mut since_reset = 0;
        for draws in sequences {
            since_reset += draws;
            let outcome = policy.evaluate(pity, draws);
            prop_assert_eq!(outcome.guaranteed, since_reset >= threshold);
            if outcome.guaranteed {
                since_reset = 0;
            }
            pity = outcome.next_pity;
            prop_assert_eq!(pity, since_reset);
            prop_assert!(pity < threshold);
        }
    }

    #[test]
    fn prop_draw_never_fails_on_nonempty_catalog(
        perks in prop::collection::vec((0usize..6, 0.0f64..3.0), 1..10),
        seed in any::<u64>(),
    ) {
        let snapshot = catalog_from(&perks);
        let mut lottery = Lottery::seeded(seed);
        for _ in 0..10 {
            prop_assert!(lottery.draw_perk(&snapshot, None).is_ok());
        }
    }
}

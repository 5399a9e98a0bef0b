use relicforge_engine::rarity::expected_tier;
use relicforge_engine::{
    DropContext, EngineConfig, ProgressionEngine, Rarity, RarityModifier, RarityResolver,
};
use std::convert::TryFrom;

const SAMPLE_SIZE: usize = 5000;
const TOLERANCE: f64 = 0.025;

fn rate(count: usize) -> f64 {
    f64::from(u32::try_from(count).expect("count fits"))
        / f64::from(u32::try_from(SAMPLE_SIZE).expect("sample size fits"))
}

#[test]
fn generated_rarities_track_the_window() {
    let config = EngineConfig::default();
    let ctx = DropContext::new(60.0, 0);
    let expected = RarityResolver::new(&config.rarity)
        .tier_distribution(&ctx, &[])
        .unwrap();
    let mut engine = ProgressionEngine::new(config, 0x0D20_9A11).unwrap();

    let mut counts = [0usize; 5];
    for _ in 0..SAMPLE_SIZE {
        let item = engine.generate_item(&ctx, &[]).unwrap();
        counts[item.rarity().index()] += 1;
    }
    for (tier, (count, want)) in counts.iter().zip(expected).enumerate() {
        let observed = rate(*count);
        assert!(
            (observed - want).abs() <= TOLERANCE,
            "tier {tier} drifted: observed {observed:.4} expected {want:.4}"
        );
    }
}

#[test]
fn expected_tier_never_decreases_with_session_length() {
    let config = EngineConfig::default();
    let resolver = RarityResolver::new(&config.rarity);
    let mut previous = f64::NEG_INFINITY;
    for step in 0..=60_u32 {
        let minutes = f64::from(step) * 5.0;
        let dist = resolver
            .tier_distribution(&DropContext::new(minutes, 0), &[])
            .unwrap();
        let total: f64 = dist.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "{minutes} min sums to {total}");
        let tier = expected_tier(&dist);
        assert!(
            tier + 1e-12 >= previous,
            "expected tier fell at {minutes} min: {tier} < {previous}"
        );
        previous = tier;
    }
}

#[test]
fn collapses_at_both_ends_ignore_luck() {
    let config = EngineConfig::default();
    let mut engine = ProgressionEngine::new(config, 7).unwrap();
    let luck = [RarityModifier::drop_luck(400.0)];
    for _ in 0..200 {
        let short = engine
            .generate_item(&DropContext::new(4.9, 0), &luck)
            .unwrap();
        assert_eq!(short.rarity(), Rarity::Common);
        let marathon = engine
            .generate_item(&DropContext::new(240.0, 0), &[])
            .unwrap();
        assert_eq!(marathon.rarity(), Rarity::Legendary);
    }
}

#[test]
fn luck_shifts_the_window_upward() {
    let config = EngineConfig::default();
    let resolver = RarityResolver::new(&config.rarity);
    let ctx = DropContext::new(45.0, 0);
    let plain = expected_tier(&resolver.tier_distribution(&ctx, &[]).unwrap());
    let lucky = expected_tier(
        &resolver
            .tier_distribution(&ctx, &[RarityModifier::drop_luck(50.0)])
            .unwrap(),
    );
    let unlucky = expected_tier(
        &resolver
            .tier_distribution(&ctx, &[RarityModifier::rarity_bias(-50.0)])
            .unwrap(),
    );
    assert!(lucky > plain);
    assert!(unlucky < plain);
}

#[test]
fn celestial_never_drops() {
    let mut engine = ProgressionEngine::new(EngineConfig::default(), 99).unwrap();
    for minutes in [5.0, 60.0, 179.0, 240.0, 600.0] {
        for _ in 0..100 {
            let item = engine
                .generate_item(
                    &DropContext::new(minutes, 0),
                    &[RarityModifier::drop_luck(1_000.0)],
                )
                .unwrap();
            assert_ne!(item.rarity(), Rarity::Celestial);
        }
    }
}

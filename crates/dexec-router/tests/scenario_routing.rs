//! Scenario tests for the mock DEX router: seeded determinism, wrapped-SOL
//! aliasing, quote bands, and execution outcomes.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use dexec_router::{resolve_mint, DexRouter, RouterConfig, RouterError, WRAPPED_SOL_MINT};
use dexec_schemas::Dex;

/// Millisecond latencies so paused-time tests finish instantly.
fn fast_config() -> RouterConfig {
    RouterConfig {
        quote_latency_ms: (1, 2),
        execution_latency_ms: (1, 2),
        ..RouterConfig::default()
    }
}

#[test]
fn sol_symbol_aliases_to_wrapped_mint() {
    assert_eq!(resolve_mint("SOL"), WRAPPED_SOL_MINT);
    assert_eq!(resolve_mint("USDC"), "USDC");
    assert_eq!(resolve_mint("sol"), "sol", "aliasing is exact-match only");
}

#[tokio::test(start_paused = true)]
async fn best_route_is_deterministic_under_a_seed() {
    let amount = dec!(2.5);

    let a = DexRouter::with_seed(fast_config(), 42)
        .best_route("SOL", "USDC", amount)
        .await;
    let b = DexRouter::with_seed(fast_config(), 42)
        .best_route("SOL", "USDC", amount)
        .await;

    assert_eq!(a.selected_dex, b.selected_dex);
    assert_eq!(a.quote.price, b.quote.price);
    assert_eq!(a.quote.amount_out, b.quote.amount_out);
    assert_eq!(a.reason, b.reason);
}

#[tokio::test(start_paused = true)]
async fn different_seeds_stay_inside_the_price_bands() {
    let amount = dec!(1);

    for seed in 0..32u64 {
        let route = DexRouter::with_seed(fast_config(), seed)
            .best_route("SOL", "USDC", amount)
            .await;

        // Both venues quote around base 100: raydium in [98, 102],
        // meteora in [97, 102].
        assert!(
            route.quote.price >= dec!(97) && route.quote.price <= dec!(102),
            "seed {seed}: price {} outside any venue band",
            route.quote.price
        );

        // Output reflects the venue fee: strictly less than amount * price.
        assert!(route.quote.amount_out < amount * route.quote.price);

        let expected_fee = match route.selected_dex {
            Dex::Raydium => dec!(0.003),
            Dex::Meteora => dec!(0.002),
        };
        assert_eq!(route.quote.fee, expected_fee);
    }
}

#[tokio::test(start_paused = true)]
async fn reason_trace_names_both_venues_and_the_delta() {
    let route = DexRouter::with_seed(fast_config(), 7)
        .best_route("SOL", "USDC", dec!(1))
        .await;

    assert!(route.reason.contains("raydium"), "reason: {}", route.reason);
    assert!(route.reason.contains("meteora"), "reason: {}", route.reason);
    assert!(route.reason.contains("delta="), "reason: {}", route.reason);
    assert!(
        route.reason.ends_with(route.selected_dex.as_str()),
        "reason ends with the selection: {}",
        route.reason
    );
}

#[tokio::test(start_paused = true)]
async fn execution_fails_with_congestion_when_probability_is_one() {
    let cfg = RouterConfig {
        failure_probability: 1.0,
        ..fast_config()
    };
    let router = DexRouter::with_seed(cfg, 1);

    let err = router
        .execute_swap(Dex::Raydium, dec!(1), dec!(99), dec!(0.01))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NetworkCongestion));
}

#[tokio::test(start_paused = true)]
async fn execution_applies_bounded_slippage_and_mints_a_hash() {
    let cfg = RouterConfig {
        failure_probability: 0.0,
        ..fast_config()
    };

    let amount_in = dec!(2);
    let expected_out = dec!(199.5);
    let slippage = dec!(0.01);

    for seed in 0..16u64 {
        let router = DexRouter::with_seed(cfg.clone(), seed);
        let exec = router
            .execute_swap(Dex::Meteora, amount_in, expected_out, slippage)
            .await
            .unwrap();

        // Realized slippage is in [0, slippage).
        let floor = expected_out * (Decimal::ONE - slippage);
        assert!(
            exec.amount_out <= expected_out && exec.amount_out > floor,
            "seed {seed}: amount_out {} outside ({floor}, {expected_out}]",
            exec.amount_out
        );
        assert_eq!(
            exec.executed_price,
            (exec.amount_out / amount_in).round_dp(8)
        );
        assert!(
            exec.tx_hash.starts_with("mock_tx_"),
            "synthetic hash: {}",
            exec.tx_hash
        );
    }
}

#[tokio::test(start_paused = true)]
async fn zero_slippage_order_executes_at_expected_out() {
    let cfg = RouterConfig {
        failure_probability: 0.0,
        ..fast_config()
    };
    let router = DexRouter::with_seed(cfg, 3);

    let exec = router
        .execute_swap(Dex::Raydium, dec!(1), dec!(100), Decimal::ZERO)
        .await
        .unwrap();
    assert_eq!(exec.amount_out, dec!(100), "s ∈ [0, 0) collapses to 0");
}

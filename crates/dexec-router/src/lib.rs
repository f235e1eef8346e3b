//! Mock DEX router.
//!
//! Produces competing quotes from two simulated backends (raydium, meteora),
//! selects the better route, and simulates swap execution. The behavior is
//! deterministic in shape and random in magnitude: latencies, price factors,
//! failure rolls, and realized slippage all come from an injected `StdRng`,
//! so a seeded router replays the exact same routing decisions.
//!
//! All random draws for one routing (or execution) call happen up-front,
//! under a single lock, in a fixed order; the concurrent quote futures then
//! consume pre-drawn values. Without that, two tasks racing for the RNG would
//! destroy seeded reproducibility.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use dexec_schemas::{Dex, Quote, RouteResult};

/// Canonical wrapped-SOL mint. The symbol `SOL` aliases to this address
/// before any quote is requested; the client-facing symbol is never changed.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Decimal places carried by prices and amounts (NUMERIC(20,8) semantics).
const SCALE: u32 = 8;

// ---------------------------------------------------------------------------
// RouterConfig
// ---------------------------------------------------------------------------

/// Behavior knobs. Defaults are the production simulation; tests shrink the
/// latencies and pin the failure probability to 0.0 or 1.0.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Reference price both venues quote around.
    pub base_price: f64,
    /// Quote latency range, milliseconds (inclusive).
    pub quote_latency_ms: (u64, u64),
    /// Execution latency range, milliseconds (inclusive).
    pub execution_latency_ms: (u64, u64),
    /// Probability that an execution fails with `NetworkCongestion`.
    pub failure_probability: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_price: 100.0,
            quote_latency_ms: (150, 250),
            execution_latency_ms: (2000, 3000),
            failure_probability: 0.05,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RouterError {
    /// Simulated transient failure; counts as one attempt upstream.
    #[error("network congestion: transaction dropped by the cluster")]
    NetworkCongestion,
}

/// Outcome of a successful simulated swap.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub tx_hash: String,
    pub executed_price: Decimal,
    pub amount_out: Decimal,
}

// ---------------------------------------------------------------------------
// Venue parameters
// ---------------------------------------------------------------------------

struct VenueParams {
    band: (f64, f64),
    fee: f64,
    estimated_gas: f64,
}

fn venue_params(dex: Dex) -> VenueParams {
    match dex {
        Dex::Raydium => VenueParams {
            band: (0.98, 1.02),
            fee: 0.003,
            estimated_gas: 5e-5,
        },
        Dex::Meteora => VenueParams {
            band: (0.97, 1.02),
            fee: 0.002,
            estimated_gas: 4e-5,
        },
    }
}

/// Pre-drawn randomness for one quote call.
struct QuoteDraw {
    latency: Duration,
    price_factor: f64,
}

// ---------------------------------------------------------------------------
// DexRouter
// ---------------------------------------------------------------------------

pub struct DexRouter {
    cfg: RouterConfig,
    rng: Mutex<StdRng>,
}

impl DexRouter {
    /// Production constructor: entropy-seeded PRNG.
    pub fn new(cfg: RouterConfig) -> Self {
        Self {
            cfg,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded constructor for reproducible scenarios.
    pub fn with_seed(cfg: RouterConfig, seed: u64) -> Self {
        Self {
            cfg,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Quote both venues concurrently and select the route with the larger
    /// output. Ties break toward raydium.
    pub async fn best_route(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
    ) -> RouteResult {
        let mint_in = resolve_mint(token_in);
        let mint_out = resolve_mint(token_out);

        // Fixed draw order: raydium first, then meteora.
        let (ray_draw, met_draw) = {
            let mut rng = self.lock_rng();
            (self.draw_quote(&mut rng), self.draw_quote(&mut rng))
        };

        let (raydium, meteora) = tokio::join!(
            self.simulate_quote(Dex::Raydium, mint_in, mint_out, amount_in, ray_draw),
            self.simulate_quote(Dex::Meteora, mint_in, mint_out, amount_in, met_draw),
        );

        let (selected, other) = if meteora.amount_out > raydium.amount_out {
            (meteora, raydium)
        } else {
            (raydium, meteora)
        };
        let delta = selected.amount_out - other.amount_out;
        let reason = format!(
            "{} out={} (price {}, fee {}) vs {} out={} (price {}, fee {}); delta={} -> {}",
            selected.dex,
            selected.amount_out,
            selected.price,
            selected.fee,
            other.dex,
            other.amount_out,
            other.price,
            other.fee,
            delta,
            selected.dex,
        );

        info!(
            token_in = %token_in,
            token_out = %token_out,
            selected = %selected.dex,
            amount_out = %selected.amount_out,
            "route selected"
        );

        RouteResult {
            selected_dex: selected.dex,
            quote: selected,
            reason,
        }
    }

    /// Simulate swap execution on the selected venue.
    ///
    /// Fails with [`RouterError::NetworkCongestion`] at the configured
    /// probability; otherwise applies a realized slippage uniform in
    /// `[0, slippage)` and mints a synthetic transaction hash.
    pub async fn execute_swap(
        &self,
        dex: Dex,
        amount_in: Decimal,
        expected_out: Decimal,
        slippage: Decimal,
    ) -> Result<ExecutionResult, RouterError> {
        let (latency, failure_roll, slip_fraction, hash_nonce) = {
            let mut rng = self.lock_rng();
            let (lo, hi) = self.cfg.execution_latency_ms;
            (
                Duration::from_millis(rng.gen_range(lo..=hi)),
                rng.gen::<f64>(),
                rng.gen::<f64>(),
                rng.gen::<u32>(),
            )
        };

        debug!(dex = %dex, latency_ms = latency.as_millis() as u64, "submitting swap");
        sleep(latency).await;

        if failure_roll < self.cfg.failure_probability {
            return Err(RouterError::NetworkCongestion);
        }

        // Realized slippage s ∈ [0, slippage).
        let s = slippage * decimal_from_f64(slip_fraction);
        let amount_out = (expected_out * (Decimal::ONE - s)).round_dp(SCALE);
        let executed_price = (amount_out / amount_in).round_dp(SCALE);
        let tx_hash = format!(
            "mock_tx_{}_{:08x}",
            Utc::now().timestamp_millis(),
            hash_nonce
        );

        info!(dex = %dex, tx_hash = %tx_hash, amount_out = %amount_out, "swap executed");

        Ok(ExecutionResult {
            tx_hash,
            executed_price,
            amount_out,
        })
    }

    fn draw_quote(&self, rng: &mut StdRng) -> QuoteDraw {
        let (lo, hi) = self.cfg.quote_latency_ms;
        QuoteDraw {
            latency: Duration::from_millis(rng.gen_range(lo..=hi)),
            // Factor in [0,1); each venue maps it onto its own band.
            price_factor: rng.gen::<f64>(),
        }
    }

    async fn simulate_quote(
        &self,
        dex: Dex,
        mint_in: &str,
        mint_out: &str,
        amount_in: Decimal,
        draw: QuoteDraw,
    ) -> Quote {
        sleep(draw.latency).await;

        let params = venue_params(dex);
        let (band_lo, band_hi) = params.band;
        let price_f = self.cfg.base_price * (band_lo + draw.price_factor * (band_hi - band_lo));
        let price = decimal_from_f64(price_f).round_dp(SCALE);
        let fee = decimal_from_f64(params.fee);
        let amount_out = (amount_in * price * (Decimal::ONE - fee)).round_dp(SCALE);

        debug!(
            dex = %dex,
            mint_in = %mint_in,
            mint_out = %mint_out,
            price = %price,
            amount_out = %amount_out,
            "quote received"
        );

        Quote {
            dex,
            price,
            amount_out,
            fee,
            estimated_gas: decimal_from_f64(params.estimated_gas),
        }
    }

    fn lock_rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().expect("router rng poisoned")
    }
}

/// Map the client-facing `SOL` symbol to the canonical wrapped mint; every
/// other symbol passes through untouched.
pub fn resolve_mint(symbol: &str) -> &str {
    if symbol == "SOL" {
        info!(symbol = %symbol, mint = %WRAPPED_SOL_MINT, "aliasing SOL to wrapped mint");
        WRAPPED_SOL_MINT
    } else {
        symbol
    }
}

fn decimal_from_f64(v: f64) -> Decimal {
    // The simulation only produces well-ranged finite floats.
    Decimal::from_f64(v).unwrap_or_default()
}

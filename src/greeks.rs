// =============================================================================
// Black-Scholes sensitivity kernel — gamma, vanna, charm, volga
// =============================================================================
//
//   d1    = (ln(S/K) + (r + σ²/2)·T) / (σ·√T)
//   d2    = d1 − σ·√T
//   gamma = φ(d1) / (S·σ·√T)
//   vega  = S·φ(d1)·√T
//   vanna = −d2·φ(d1) / σ
//   charm = −φ(d1)·(2·r·T − d2·σ·√T) / (2·T·σ·√T)
//   volga = vega·d1·d2 / σ
//
// These four are identical for calls and puts. Degenerate inputs (T or σ at
// or below zero) and any non-finite intermediate produce 0, never NaN.
// =============================================================================

const SQRT_2PI: f64 = 2.5066282746310002;

/// Standard normal density.
fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_2PI
}

fn zero_if_non_finite(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// The second-order sensitivities the pipeline aggregates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Greeks {
    pub gamma: f64,
    pub vanna: f64,
    pub charm: f64,
    pub volga: f64,
}

/// Compute gamma, vanna, charm and volga for one contract.
///
/// * `s` — underlying spot.
/// * `k` — strike.
/// * `t` — time to expiry in years.
/// * `r` — risk-free rate.
/// * `sigma` — implied volatility (e.g. 0.55 for 55%).
pub fn black_scholes_greeks(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> Greeks {
    let sqrt_t = t.sqrt();
    let sig_sqrt_t = sigma * sqrt_t;

    let d1 = ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / sig_sqrt_t;
    let d2 = d1 - sig_sqrt_t;
    let pdf_d1 = norm_pdf(d1);

    let gamma = pdf_d1 / (s * sig_sqrt_t);
    let vanna = -d2 * pdf_d1 / sigma;
    let charm = -pdf_d1 * (2.0 * r * t - d2 * sig_sqrt_t) / (2.0 * t * sig_sqrt_t);
    let vega = s * pdf_d1 * sqrt_t;
    let volga = vega * d1 * d2 / sigma;

    Greeks {
        gamma: zero_if_non_finite(gamma),
        vanna: zero_if_non_finite(vanna),
        charm: zero_if_non_finite(charm),
        volga: zero_if_non_finite(volga),
    }
}

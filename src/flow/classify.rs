// =============================================================================
// Scenario classifier — buckets one publish tick's flow metrics
// =============================================================================
//
// Rules are evaluated in order, first match wins:
//   1. spot rising  and NGI < 0  -> Dealer Sell (Material if |NGI| > 0.1·ADV)
//   2. spot falling and NGI > 0  -> Dealer Buy  (same materiality threshold)
//   3. |NGI| < 1e-6              -> Gamma Pin
//   4. |VSS| > 2·|NGI|           -> Vanna Squeeze
//   5. otherwise                 -> Neutral
// =============================================================================

use serde::Serialize;

/// Flatness threshold below which net gamma counts as pinned.
const GAMMA_PIN_EPS: f64 = 1e-6;
/// Fraction of the liquidity reference that makes dealer flow "material".
const MATERIALITY_FRACTION: f64 = 0.1;

/// Categorical bucket published with every metrics record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scenario {
    DealerSellMaterial,
    DealerSellImmaterial,
    DealerBuyMaterial,
    DealerBuyImmaterial,
    GammaPin,
    VannaSqueeze,
    Neutral,
}

impl Scenario {
    /// Wire/warehouse label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DealerSellMaterial => "Dealer Sell Material",
            Self::DealerSellImmaterial => "Dealer Sell Immaterial",
            Self::DealerBuyMaterial => "Dealer Buy Material",
            Self::DealerBuyImmaterial => "Dealer Buy Immaterial",
            Self::GammaPin => "Gamma Pin",
            Self::VannaSqueeze => "Vanna Squeeze",
            Self::Neutral => "Neutral",
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one tick of aggregate flow.
///
/// * `ngi`, `vss` — dollar gamma / vanna aggregates for the tick.
/// * `adv_usd` — liquidity reference in dollars.
/// * `spot_change_pct` — spot move since the previous publish, fractional.
pub fn classify(ngi: f64, vss: f64, adv_usd: f64, spot_change_pct: f64) -> Scenario {
    let material = ngi.abs() > MATERIALITY_FRACTION * adv_usd;
    let rising = spot_change_pct > 0.0;
    let falling = spot_change_pct < 0.0;

    if rising && ngi < 0.0 {
        return if material {
            Scenario::DealerSellMaterial
        } else {
            Scenario::DealerSellImmaterial
        };
    }
    if falling && ngi > 0.0 {
        return if material {
            Scenario::DealerBuyMaterial
        } else {
            Scenario::DealerBuyImmaterial
        };
    }
    if ngi.abs() < GAMMA_PIN_EPS {
        return Scenario::GammaPin;
    }
    if vss.abs() > 2.0 * ngi.abs() {
        return Scenario::VannaSqueeze;
    }
    Scenario::Neutral
}

// =============================================================================
// Dollar roll-up — NGI, VSS, CHL_24h, VOLG
// =============================================================================
//
//   NGI     = Σ gamma · notional · 0.01      (dollar gamma, 1% spot move)
//   VSS     = Σ vanna · notional · 0.01      (dollar vanna, 1 vol-point)
//   CHL_24h = Σ charm · notional · (1/365)   (24h delta decay, charm per year)
//   VOLG    = Σ volga · notional · 0.01      (dollar volga, 1 vol-point)
// =============================================================================

/// One vol-point / one-percent-of-spot step used for NGI, VSS and VOLG.
const STEP: f64 = 0.01;
/// 24 hours expressed in years, for charm.
const DAY_FRACTION: f64 = 1.0 / 365.0;

/// Per-instrument sensitivities after dealer signing, ready to aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignedExposure {
    pub gamma: f64,
    pub vanna: f64,
    pub charm: f64,
    pub volga: f64,
    pub notional_usd: f64,
}

/// Aggregate dollar-weighted sensitivities over the whole book.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowAggregates {
    pub ngi: f64,
    pub vss: f64,
    pub chl_24h: f64,
    pub volg: f64,
}

/// Sum the book's signed exposures into aggregate dollar metrics.
pub fn roll_up(exposures: &[SignedExposure]) -> FlowAggregates {
    let mut agg = FlowAggregates::default();
    for e in exposures {
        agg.ngi += e.gamma * e.notional_usd * STEP;
        agg.vss += e.vanna * e.notional_usd * STEP;
        agg.chl_24h += e.charm * e.notional_usd * DAY_FRACTION;
        agg.volg += e.volga * e.notional_usd * STEP;
    }
    agg
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn exposure(gamma: f64, vanna: f64, charm: f64, volga: f64, notional: f64) -> SignedExposure {
        SignedExposure {
            gamma,
            vanna,
            charm,
            volga,
            notional_usd: notional,
        }
    }

    #[test]
    fn two_instrument_book() {
        let out = roll_up(&[
            exposure(2.0, 5.0, -3.0, 6.0, 1e6),
            exposure(-1.0, 4.0, 2.0, 3.0, 8e5),
        ]);
        assert!((out.ngi - 12_000.0).abs() < 1e-9, "NGI = {}", out.ngi);
        assert!((out.vss - 82_000.0).abs() < 1e-9, "VSS = {}", out.vss);
        assert!(
            (out.chl_24h - (-1.4e6 / 365.0)).abs() < 1e-6,
            "CHL_24h = {}",
            out.chl_24h
        );
        assert!((out.chl_24h - (-3835.616438)).abs() < 1e-3);
        assert!((out.volg - 84_000.0).abs() < 1e-9, "VOLG = {}", out.volg);
    }

    #[test]
    fn ngi_is_one_percent_of_gamma_notional() {
        let exposures = [
            exposure(0.3, 0.0, 0.0, 0.0, 2.5e5),
            exposure(-0.7, 0.0, 0.0, 0.0, 1.1e6),
            exposure(0.05, 0.0, 0.0, 0.0, 9e4),
        ];
        let expected: f64 = exposures
            .iter()
            .map(|e| e.gamma * e.notional_usd)
            .sum::<f64>()
            * 0.01;
        let out = roll_up(&exposures);
        assert!((out.ngi - expected).abs() < 1e-9);
    }

    #[test]
    fn empty_book_is_all_zero() {
        assert_eq!(roll_up(&[]), FlowAggregates::default());
    }
}

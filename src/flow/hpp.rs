// =============================================================================
// Hedge-Pressure Projection
// =============================================================================

/// Weight of VSS in the projection.
const ALPHA: f64 = 0.1;
/// Weight of CHL_24h in the projection.
const BETA: f64 = 0.1;

/// `sign(Δspot)·NGI + α·VSS + β·CHL_24h` with α = β = 0.1.
pub fn hpp(spot_move_sign: i8, ngi: f64, vss: f64, chl_24h: f64) -> f64 {
    f64::from(spot_move_sign) * ngi + ALPHA * vss + BETA * chl_24h
}

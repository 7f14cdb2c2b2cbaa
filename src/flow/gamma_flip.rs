// =============================================================================
// Gamma flip — first zero-cross of net dealer gamma across strikes
// =============================================================================

/// Integer sign with an explicit zero, so transitions into and out of a flat
/// level count as changes.
fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Distance of the gamma flip from spot, as `strike/spot - 1`.
///
/// `gamma_by_strike` must be sorted ascending by strike; values are net
/// dealer gamma per strike. The flip strike is the one following the first
/// entry whose gamma sign differs from its predecessor's (ties resolved in
/// ascending-strike order). Returns `None` when the series never changes
/// sign, when the change lands on the last entry (no following strike), or
/// when spot is zero.
pub fn gamma_flip_distance(gamma_by_strike: &[(f64, f64)], spot: f64) -> Option<f64> {
    if spot == 0.0 {
        return None;
    }

    let first_change = (1..gamma_by_strike.len())
        .find(|&i| sign(gamma_by_strike[i].1) != sign(gamma_by_strike[i - 1].1))?;

    let (flip_strike, _) = gamma_by_strike.get(first_change + 1)?;
    Some(flip_strike / spot - 1.0)
}

// =============================================================================
// Dealer-net inference — sign multiplier from customer-side markers
// =============================================================================
//
// Without trade-flow data the pipeline cannot observe which side of the open
// interest dealers actually hold. The working assumption is that all open
// interest is customer-long, leaving dealers short gamma against it: the
// default multiplier is +1. When a `side` marker is present, a `short`
// substring keeps +1 (customer short, dealer long the option) and any other
// value flips to -1. A future trade feed replaces this rule.
// =============================================================================

/// Sign applied to an instrument's sensitivities before aggregation.
pub fn dealer_side_multiplier(side: Option<&str>) -> f64 {
    match side {
        Some(side) if side.to_ascii_lowercase().contains("short") => 1.0,
        Some(_) => -1.0,
        None => 1.0,
    }
}

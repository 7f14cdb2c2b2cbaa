// =============================================================================
// Flow analytics — dollar roll-ups and scenario classification
// =============================================================================

pub mod classify;
pub mod dealer_net;
pub mod gamma_flip;
pub mod hpp;
pub mod rollup;

pub use classify::{classify, Scenario};
pub use dealer_net::dealer_side_multiplier;
pub use gamma_flip::gamma_flip_distance;
pub use hpp::hpp;
pub use rollup::{roll_up, FlowAggregates, SignedExposure};

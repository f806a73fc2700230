//! Pure domain services.

pub mod invalidation;
pub mod sizing;

pub use invalidation::{DEFAULT_INVALIDATION_MARGIN_POINTS, InvalidationPolicy, should_invalidate};
pub use sizing::fit_covering;

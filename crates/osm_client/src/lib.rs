//! OpenStreetMap service clients: Nominatim geocoding and Overpass counts.
//!
//! Blocking reqwest clients (no Tokio runtime required). Each client owns a
//! throttle for its service; waits go through a shared [`Sleeper`] and stop
//! early when the batch [`CancelToken`] fires.

mod geocode;
mod overpass;
mod retry;
mod throttle;

pub use geocode::{Area, Geocoder, ResolveError, ResolvedLocation};
pub use overpass::{area_clause, build_query, Feature, FeatureCounter, FeatureTally};
pub use retry::{
    CancelToken, Cancelled, FailureClass, RecordingSleeper, Retrier, RetryError, RetryPolicy,
    RetryState, Sleeper, ThreadSleeper,
};
pub use throttle::Throttle;

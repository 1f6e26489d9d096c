//! graph-watch: Commit watchers for the Graph object store.
//!
//! Subscribers register a [`WatchPredicate`] and a handler. After every
//! successful commit the registry evaluates each change record against every
//! live predicate and calls matching handlers, inline or on a background task.

pub mod predicate;
pub mod registry;

pub use predicate::WatchPredicate;
pub use registry::{Subscription, SubscriptionId, WatchHandler, WatchRegistry};

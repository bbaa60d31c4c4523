//! Orchestration of virtual users.
//!
//! The `Executor` trait is the runtime that executes a [`Scenario`]. Different
//! executors provide different scheduling strategies; the built-in
//! [`InjectionExecutor`] starts users open-loop, at the offsets computed from an
//! [`crate::InjectionProfile`], and enforces an optional maximum run duration.
pub mod injection;
pub use injection::InjectionExecutor;

use crate::{aggregate::Aggregate, scenario::Scenario};
use std::future::Future;

/// The runtime hook that executes a `Scenario`.
///
/// Implementations decide when virtual users start, how many run at once and
/// when the run is over. They must collect every sample produced by the users
/// into the returned aggregate.
pub trait Executor<A>
where
    Self: Send + Sync + Sized,
    A: Aggregate,
{
    type Error;

    /// Execute the scenario and return the final aggregate.
    fn exec(&self, scenario: &Scenario) -> impl Future<Output = Result<A, Self::Error>> + Send;
}

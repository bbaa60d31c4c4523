//! The `InjectionExecutor`: open-loop user injection with a global time limit.
//!
//! # High-level flow
//! 1. An [`ExecutionContext`] is created. It carries the HTTP client shared by
//!    every user, the failure policy and a `watch` channel used as the run-wide
//!    cancellation signal.
//! 2. If `max_duration` is set, a timer task flips the cancellation signal when
//!    it expires.
//! 3. The scheduler walks the start offsets from the [`InjectionProfile`] in
//!    order, sleeping until each one and spawning a Tokio task per virtual user.
//!    Once cancelled, the remaining users are never spawned.
//! 4. Each user runs the scenario chain with a fresh session and consumes its
//!    samples into a task-local aggregate.
//! 5. While waiting for the next start offset, the scheduler merges the
//!    aggregate of every user that has finished, so memory follows the users
//!    in flight rather than the users of the whole run.
//! 6. Once every spawned user has been merged, one `Scheduled` sample is added
//!    per user that never started.
//!
//! A run ends when all users have finished. Users in a `forever` loop only
//! finish once the run is cancelled, so such scenarios need `max_duration`.

use std::{sync::Arc, time::Duration};

use tokio::{
    task::{JoinError, JoinSet},
    time::Instant,
};
use typed_builder::TypedBuilder;

use super::Executor;
use crate::{
    aggregate::Aggregate,
    chain::{ExecutionContext, FailurePolicy, VirtualUser},
    error::EngineError,
    http::HttpProtocol,
    injection::InjectionProfile,
    metric::{Sample, UserMetric, UserState},
    scenario::Scenario,
};
use internals::*;

/// Executor that starts virtual users according to an injection profile.
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use stampede::{
///     Executor, InjectionExecutor, Injection, Scenario,
///     aggregate::RunAggregate,
///     chain::Chain,
///     http::{HttpProtocol, Request},
/// };
///
/// # async fn run() -> Result<(), stampede::error::EngineError> {
/// let scenario = Scenario::builder()
///     .name("List games")
///     .chain(Chain::new().forever(Chain::new().exec(Request::get("List", "/videogame"))))
///     .build();
///
/// let results: RunAggregate = InjectionExecutor::builder()
///     .profile(vec![
///         Injection::nothing_for(Duration::from_secs(1)),
///         Injection::ramp(5, Duration::from_secs(10)),
///     ])
///     .protocol(HttpProtocol::builder().base_url("http://localhost:8080").build())
///     .max_duration(Duration::from_secs(60))
///     .build()
///     .exec(&scenario)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct InjectionExecutor {
    /// When users start.
    #[builder(setter(into))]
    pub profile: InjectionProfile,
    pub protocol: HttpProtocol,
    /// Cancels the run once elapsed. Users not yet started are dropped and
    /// looping users stop at their next iteration.
    #[builder(default, setter(strip_option))]
    pub max_duration: Option<Duration>,
    #[builder(default)]
    pub on_failure: FailurePolicy,
}

impl<A> Executor<A> for InjectionExecutor
where
    A: Aggregate<Metric = Sample> + 'static,
{
    type Error = EngineError;

    async fn exec(&self, scenario: &Scenario) -> Result<A, Self::Error> {
        let client = self.protocol.client()?;
        let ctx = ExecutionContext::new(client, Arc::new(self.protocol.clone()), self.on_failure);
        let schedule = self.profile.schedule();
        let scenario = Arc::new(scenario.clone());

        if self.max_duration.is_none() && scenario.loops_forever() {
            tracing::warn!(
                "Scenario {} loops forever and no max duration is set; the run will not end on its own.",
                scenario.name
            );
        }

        tracing::info!(
            "Running scenario: {} with {} users injected over {:?}!",
            scenario.name,
            schedule.len(),
            self.profile.duration()
        );
        let start = Instant::now();
        let timer = self
            .max_duration
            .map(|limit| tokio::spawn(max_duration_timer(ctx.clone(), limit)));

        let (mut final_agg, not_started) =
            schedule_users::<A>(ctx.clone(), scenario.clone(), start, schedule).await;
        if let Some(timer) = timer {
            timer.abort();
        }

        tracing::info!("Processing results...");
        for user in not_started {
            final_agg.consume(&Sample::User(UserMetric {
                user,
                state: UserState::Scheduled,
                elapsed: Duration::ZERO,
                cancelled: true,
            }));
        }

        tracing::info!("Done running scenario: {} in {:?}!", scenario.name, start.elapsed());
        Ok(final_agg)
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// Internal components of the `InjectionExecutor`.
mod internals {
    use super::*;

    /// Cancels the run once `limit` has elapsed.
    pub async fn max_duration_timer(ctx: ExecutionContext, limit: Duration) {
        tokio::time::sleep(limit).await;
        tracing::info!("Max duration of {limit:?} reached, cancelling the run...");
        ctx.cancel();
    }

    /// Spawns one task per start offset, at that offset, and merges every user's
    /// aggregate as soon as that user finishes.
    ///
    /// Returns the merged aggregate of the users that ran and the ids of those
    /// that never started because the run got cancelled first.
    pub async fn schedule_users<A>(
        mut ctx: ExecutionContext,
        scenario: Arc<Scenario>,
        start: Instant,
        schedule: Vec<Duration>,
    ) -> (A, Vec<u64>)
    where
        A: Aggregate<Metric = Sample> + 'static,
    {
        let total = schedule.len() as u64;
        let mut users = JoinSet::new();
        let mut agg = A::new();
        let mut spawned = 0;

        for (id, offset) in (0..total).zip(schedule) {
            if ctx.is_cancelled() {
                break;
            }
            let due = tokio::time::sleep_until(start + offset);
            tokio::pin!(due);
            let cancelled = loop {
                tokio::select! {
                    _ = &mut due => break false,
                    _ = ctx.shutdown.wait_for(|b| *b) => break true,
                    Some(done) = users.join_next() => merge_user(&mut agg, done),
                }
            };
            if cancelled {
                break;
            }

            let user_ctx = ctx.clone();
            let scenario = Arc::clone(&scenario);
            users.spawn(async move { VirtualUser::<A>::new(id, user_ctx).run(&scenario.chain).await });
            spawned += 1;
        }

        if spawned < total {
            tracing::info!("Run cancelled before {} users could start.", total - spawned);
        }
        tracing::info!("All users scheduled, waiting for {} of them to finish...", users.len());
        while let Some(done) = users.join_next().await {
            merge_user(&mut agg, done);
        }
        (agg, (spawned..total).collect())
    }

    fn merge_user<A: Aggregate>(agg: &mut A, done: Result<A, JoinError>) {
        match done {
            Ok(user) => agg.merge(user),
            // keep the other users' data
            Err(e) => tracing::error!("Virtual user panicked: {e}"),
        }
    }
}

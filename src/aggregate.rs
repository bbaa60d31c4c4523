use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::ErrorKind,
    macros::aggregate,
    metric::{Metric, Sample, StepMetric, UserMetric, UserState},
};

/// The `Aggregate` trait defines how raw [`Metric`] values are collected into a
/// compact, mergeable representation.
///
/// Every virtual user owns a private aggregate and consumes its own samples into
/// it, so the hot path never contends on a lock. As each user finishes the engine
/// merges its aggregate into the run result.
///
/// Aggregates store raw counters and sums only. Averages and ratios are derived
/// later by a [`crate::Report`].
///
/// # Implementor notes
/// - `merge` must be associative and commutative: user aggregates are merged in
///   whatever order their tasks finish.
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Raw counters for one named step.
#[aggregate]
#[derive(Default)]
pub struct StepStats {
    pub ok: u64,
    pub ko: u64,
    pub total_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Duration,
    pub errors: BTreeMap<ErrorKind, u64>,
}

impl StepStats {
    fn consume(&mut self, metric: &StepMetric) {
        match metric.error {
            None => self.ok += 1,
            Some(kind) => {
                self.ko += 1;
                *self.errors.entry(kind).or_default() += 1;
            }
        }
        self.total_latency += metric.latency;
        self.min_latency = Some(match self.min_latency {
            Some(min) => min.min(metric.latency),
            None => metric.latency,
        });
        self.max_latency = self.max_latency.max(metric.latency);
    }

    fn merge(&mut self, other: Self) {
        self.ok += other.ok;
        self.ko += other.ko;
        self.total_latency += other.total_latency;
        self.min_latency = match (self.min_latency, other.min_latency) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_latency = self.max_latency.max(other.max_latency);
        for (kind, count) in other.errors {
            *self.errors.entry(kind).or_default() += count;
        }
    }

    pub fn count(&self) -> u64 {
        self.ok + self.ko
    }
}

/// How virtual users left the run.
#[aggregate]
#[derive(Default)]
pub struct UserStats {
    /// Never started because the run was cancelled first.
    pub not_started: u64,
    pub completed: u64,
    pub aborted: u64,
    /// Users cut short by cancellation, including those that never started.
    pub cancelled: u64,
    pub total_time: Duration,
}

impl UserStats {
    fn consume(&mut self, metric: &UserMetric) {
        match metric.state {
            UserState::Scheduled => self.not_started += 1,
            UserState::Completed => self.completed += 1,
            UserState::Aborted => self.aborted += 1,
            // users never report while still running
            UserState::Running => {}
        }
        if metric.cancelled {
            self.cancelled += 1;
        }
        self.total_time += metric.elapsed;
    }

    fn merge(&mut self, other: Self) {
        self.not_started += other.not_started;
        self.completed += other.completed;
        self.aborted += other.aborted;
        self.cancelled += other.cancelled;
        self.total_time += other.total_time;
    }
}

/// The built-in aggregate of a run: per-step counters plus user outcomes.
#[aggregate]
#[derive(Default)]
pub struct RunAggregate {
    pub steps: BTreeMap<String, StepStats>,
    pub users: UserStats,
}

impl RunAggregate {
    pub fn step(&self, name: &str) -> Option<&StepStats> {
        self.steps.get(name)
    }

    pub fn failures(&self) -> u64 {
        self.steps.values().map(|s| s.ko).sum()
    }

    pub fn successes(&self) -> u64 {
        self.steps.values().map(|s| s.ok).sum()
    }
}

impl Aggregate for RunAggregate {
    type Metric = Sample;

    fn new() -> Self {
        RunAggregate::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        match metric {
            Sample::Step(step) => {
                if let Some(stats) = self.steps.get_mut(&step.step) {
                    stats.consume(step);
                } else {
                    let mut stats = StepStats::default();
                    stats.consume(step);
                    self.steps.insert(step.step.clone(), stats);
                }
            }
            Sample::User(user) => self.users.consume(user),
        }
    }

    fn merge(&mut self, other: Self) {
        for (name, stats) in other.steps {
            match self.steps.get_mut(&name) {
                Some(mine) => mine.merge(stats),
                None => {
                    self.steps.insert(name, stats);
                }
            }
        }
        self.users.merge(other.users);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn counts_per_step() {
        let mut agg = RunAggregate::new();
        agg.aggregate(&[
            StepMetric::ok("Authenticate", ms(10)).into(),
            StepMetric::ok("Authenticate", ms(30)).into(),
            StepMetric::failed("Get game", ms(5), ErrorKind::Extraction).into(),
        ]);

        let auth = agg.step("Authenticate").unwrap();
        assert_eq!((auth.ok, auth.ko), (2, 0));
        assert_eq!(auth.min_latency, Some(ms(10)));
        assert_eq!(auth.max_latency, ms(30));
        assert_eq!(auth.total_latency, ms(40));

        let get = agg.step("Get game").unwrap();
        assert_eq!(get.errors[&ErrorKind::Extraction], 1);
        assert_eq!(agg.failures(), 1);
        assert_eq!(agg.successes(), 2);
    }

    #[test]
    fn merge_matches_single_aggregate() {
        let samples: Vec<Sample> = vec![
            StepMetric::ok("a", ms(1)).into(),
            StepMetric::failed("a", ms(9), ErrorKind::Timeout).into(),
            StepMetric::ok("b", ms(4)).into(),
            UserMetric {
                user: 1,
                state: UserState::Completed,
                elapsed: ms(100),
                cancelled: true,
            }
            .into(),
            UserMetric {
                user: 2,
                state: UserState::Scheduled,
                elapsed: Duration::ZERO,
                cancelled: true,
            }
            .into(),
        ];

        let mut whole = RunAggregate::new();
        whole.aggregate(&samples);

        let (left, right) = samples.split_at(2);
        let mut a = RunAggregate::new();
        a.aggregate(left);
        let mut b = RunAggregate::new();
        b.aggregate(right);
        b.merge(a);

        assert_eq!(whole, b);
        assert_eq!(whole.users.completed, 1);
        assert_eq!(whole.users.not_started, 1);
        assert_eq!(whole.users.cancelled, 2);
    }
}

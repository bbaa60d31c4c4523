use std::{collections::BTreeMap, fmt::Debug, future::Future, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Aggregate,
    aggregate::{RunAggregate, UserStats},
};

/// A [`Report`] is the processed form of an [`Aggregate`].
///
/// Reports derive averages and ratios from raw counters. They are plain data:
/// no I/O, built with a [`From<A>`] conversion, and handed to a [`Reporter`].
pub trait Report<A>
where
    Self: Send + Sync + Debug + From<A> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// A [`Reporter`] consumes a [`Report`] and sends it somewhere.
///
/// Reporters are the I/O boundary: the metric → aggregate → report pipeline
/// stays pure and the reporter decides how results are presented.
pub trait Reporter<A: Aggregate, R: Report<A>> {
    fn report(&self, report: &R) -> impl Future<Output = Result<(), Box<dyn std::error::Error>>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub ok: u64,
    pub ko: u64,
    pub min_latency: Duration,
    pub mean_latency: Duration,
    pub max_latency: Duration,
    pub errors: BTreeMap<String, u64>,
}

/// Per-step pass/fail counts and latencies, plus how users finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub steps: BTreeMap<String, StepReport>,
    pub users: UserStats,
    pub total_ok: u64,
    pub total_ko: u64,
}

impl RunReport {
    /// Whether the run stayed within the tolerated number of failed steps.
    pub fn passed(&self, max_failures: u64) -> bool {
        self.total_ko <= max_failures
    }

    pub fn success_ratio(&self) -> f64 {
        let total = self.total_ok + self.total_ko;
        if total == 0 {
            return 0.0;
        }
        self.total_ok as f64 / total as f64 * 100.0
    }
}

impl From<RunAggregate> for RunReport {
    fn from(value: RunAggregate) -> Self {
        let total_ok = value.successes();
        let total_ko = value.failures();
        let steps = value
            .steps
            .into_iter()
            .map(|(name, stats)| {
                let count = stats.count().max(1);
                let report = StepReport {
                    ok: stats.ok,
                    ko: stats.ko,
                    min_latency: stats.min_latency.unwrap_or_default(),
                    mean_latency: stats.total_latency.div_f64(count as f64),
                    max_latency: stats.max_latency,
                    errors: stats
                        .errors
                        .into_iter()
                        .map(|(kind, n)| (kind.to_string(), n))
                        .collect(),
                };
                (name, report)
            })
            .collect();
        Self {
            steps,
            users: value.users,
            total_ok,
            total_ko,
        }
    }
}

impl Report<RunAggregate> for RunReport {}

/// Prints a table to stdout.
pub struct StdoutReporter;

impl Reporter<RunAggregate, RunReport> for StdoutReporter {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
        let width = report
            .steps
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max("step".len());

        println!(
            "{:<width$}  {:>8}  {:>8}  {:>10}  {:>10}  {:>10}  errors",
            "step", "ok", "ko", "min ms", "mean ms", "max ms"
        );
        for (name, step) in &report.steps {
            let errors = step
                .errors
                .iter()
                .map(|(kind, n)| format!("{kind}={n}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!(
                "{:<width$}  {:>8}  {:>8}  {:>10.1}  {:>10.1}  {:>10.1}  {}",
                name,
                step.ok,
                step.ko,
                millis(step.min_latency),
                millis(step.mean_latency),
                millis(step.max_latency),
                errors
            );
        }
        println!(
            "total ok={} ko={} ({:.2}% ok); users completed={} aborted={} cancelled={} not started={}",
            report.total_ok,
            report.total_ko,
            report.success_ratio(),
            report.users.completed,
            report.users.aborted,
            report.users.cancelled,
            report.users.not_started,
        );
        Ok(())
    }
}

/// Prints the report as one JSON document.
pub struct JsonReporter;

impl Reporter<RunAggregate, RunReport> for JsonReporter {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string_pretty(report)?);
        Ok(())
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ErrorKind,
        metric::{Sample, StepMetric},
    };

    #[test]
    fn derives_means_and_totals() {
        let mut agg = RunAggregate::new();
        let samples: Vec<Sample> = vec![
            StepMetric::ok("Create", Duration::from_millis(10)).into(),
            StepMetric::ok("Create", Duration::from_millis(30)).into(),
            StepMetric::failed("Delete", Duration::from_millis(4), ErrorKind::Assertion).into(),
        ];
        agg.aggregate(&samples);

        let report = RunReport::from(agg);
        assert_eq!(report.steps["Create"].mean_latency, Duration::from_millis(20));
        assert_eq!(report.steps["Delete"].errors["assertion"], 1);
        assert_eq!((report.total_ok, report.total_ko), (2, 1));
        assert!(!report.passed(0));
        assert!(report.passed(1));
    }

    #[test]
    fn empty_run_has_no_ratio() {
        let report = RunReport::from(RunAggregate::new());
        assert_eq!(report.success_ratio(), 0.0);
        assert!(report.passed(0));
    }

    #[tokio::test]
    async fn reporters_accept_reports() {
        let report = RunReport::from(RunAggregate::new());
        StdoutReporter.report(&report).await.unwrap();
        JsonReporter.report(&report).await.unwrap();
    }
}

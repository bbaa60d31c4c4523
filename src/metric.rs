use std::{fmt::Debug, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{error::ErrorKind, macros::metric};

/// A `Metric` is a single observation produced while a run is in progress.
///
/// Virtual users emit metrics into a task-local [`crate::Aggregate`]; aggregates
/// are merged once every user has finished. The `#[metric]` attribute derives
/// the required bounds and implements this trait.
///
/// ```rust
/// use stampede::macros::metric;
///
/// #[metric]
/// struct BytesSent(u64);
/// ```
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
}

/// Outcome of one executed action.
#[metric]
pub struct StepMetric {
    /// Declared (unrendered) step name.
    pub step: String,
    pub latency: Duration,
    /// `None` when the step passed.
    pub error: Option<ErrorKind>,
}

impl StepMetric {
    pub fn ok(step: impl Into<String>, latency: Duration) -> Self {
        Self {
            step: step.into(),
            latency,
            error: None,
        }
    }

    pub fn failed(step: impl Into<String>, latency: Duration, kind: ErrorKind) -> Self {
        Self {
            step: step.into(),
            latency,
            error: Some(kind),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Lifecycle of a virtual user: `Scheduled -> Running -> Completed | Aborted`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum UserState {
    Scheduled,
    Running,
    Completed,
    Aborted,
}

/// Emitted once per virtual user when it leaves the run.
///
/// Users that were still `Scheduled` when the run was cancelled are reported
/// with that state and never ran.
#[metric]
pub struct UserMetric {
    pub user: u64,
    pub state: UserState,
    pub elapsed: Duration,
    /// The user stopped at a loop boundary because the run was cancelled.
    pub cancelled: bool,
}

#[metric]
pub enum Sample {
    Step(StepMetric),
    User(UserMetric),
}

impl From<StepMetric> for Sample {
    fn from(value: StepMetric) -> Self {
        Self::Step(value)
    }
}

impl From<UserMetric> for Sample {
    fn from(value: UserMetric) -> Self {
        Self::User(value)
    }
}

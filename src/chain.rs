//! Chains and the virtual-user interpreter.
//!
//! A [`Chain`] is an ordered list of [`Action`]s: HTTP steps, feeds, pauses,
//! session hooks and the `repeat`/`forever` combinators, which nest chains.
//! A [`VirtualUser`] walks a chain strictly in order with its own [`Session`].
//!
//! Step failures never leave the user: they are recorded as metrics and the
//! [`FailurePolicy`] decides how much of the chain is skipped. Cancellation of
//! the run is cooperative and only observed at the start of a loop iteration,
//! so requests and pauses already underway always complete.

use std::{fmt, sync::Arc, time::Duration};

use futures::{FutureExt, future::BoxFuture};
use reqwest::Client;
use tokio::{
    sync::watch::{self, Receiver, Sender},
    time::Instant,
};

use crate::{
    aggregate::Aggregate,
    check,
    error::ErrorKind,
    feeder::Feeder,
    http::{HttpProtocol, Request},
    metric::{Sample, StepMetric, UserMetric, UserState},
    session::Session,
};

pub type SessionHook = Arc<dyn Fn(&mut Session) + Send + Sync>;

/// What a failed step does to the rest of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Skip the rest of the current loop iteration, or of the whole scenario
    /// when the failure is not inside a loop.
    #[default]
    AbortIteration,
    /// Stop the virtual user.
    AbortUser,
    /// Record the failure and carry on with the next action.
    Continue,
}

#[derive(Clone)]
pub enum Action {
    Exec(Request),
    Feed(Arc<dyn Feeder>),
    Pause(Duration),
    Repeat {
        times: usize,
        counter: Option<String>,
        chain: Chain,
    },
    Forever {
        counter: Option<String>,
        chain: Chain,
    },
    Hook(SessionHook),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec(request) => f.debug_tuple("Exec").field(&request.name().source()).finish(),
            Self::Feed(feeder) => f.debug_tuple("Feed").field(&feeder.name()).finish(),
            Self::Pause(d) => f.debug_tuple("Pause").field(d).finish(),
            Self::Repeat { times, chain, .. } => f
                .debug_struct("Repeat")
                .field("times", times)
                .field("chain", chain)
                .finish(),
            Self::Forever { chain, .. } => f.debug_struct("Forever").field("chain", chain).finish(),
            Self::Hook(_) => f.write_str("Hook"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chain {
    actions: Vec<Action>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn push(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn exec(self, request: Request) -> Self {
        self.push(Action::Exec(request))
    }

    /// Draws one record and merges its fields into the session.
    pub fn feed(self, feeder: Arc<dyn Feeder>) -> Self {
        self.push(Action::Feed(feeder))
    }

    pub fn pause(self, duration: Duration) -> Self {
        self.push(Action::Pause(duration))
    }

    pub fn repeat(self, times: usize, chain: Chain) -> Self {
        self.push(Action::Repeat {
            times,
            counter: None,
            chain,
        })
    }

    /// Like [`Chain::repeat`], exposing the 0-based iteration in `counter`.
    pub fn repeat_counted(self, times: usize, counter: impl Into<String>, chain: Chain) -> Self {
        self.push(Action::Repeat {
            times,
            counter: Some(counter.into()),
            chain,
        })
    }

    /// Loops until the run is cancelled.
    pub fn forever(self, chain: Chain) -> Self {
        self.push(Action::Forever {
            counter: None,
            chain,
        })
    }

    pub fn forever_counted(self, counter: impl Into<String>, chain: Chain) -> Self {
        self.push(Action::Forever {
            counter: Some(counter.into()),
            chain,
        })
    }

    pub fn on_session<F>(self, hook: F) -> Self
    where
        F: Fn(&mut Session) + Send + Sync + 'static,
    {
        self.push(Action::Hook(Arc::new(hook)))
    }

    /// Appends every action of `other`.
    pub fn then(mut self, other: Chain) -> Self {
        self.actions.extend(other.actions);
        self
    }

    /// Whether the chain contains a `forever` loop at any depth.
    pub fn loops_forever(&self) -> bool {
        self.actions.iter().any(|action| match action {
            Action::Forever { .. } => true,
            Action::Repeat { chain, .. } => chain.loops_forever(),
            _ => false,
        })
    }
}

/// Shared, cheaply clonable state every virtual user of a run sees.
#[derive(Clone)]
pub struct ExecutionContext {
    pub client: Client,
    pub protocol: Arc<HttpProtocol>,
    pub policy: FailurePolicy,
    /// Flips to `true` once the run is cancelled.
    pub shutdown: Receiver<bool>,
    cancel: Arc<Sender<bool>>,
}

impl ExecutionContext {
    pub fn new(client: Client, protocol: Arc<HttpProtocol>, policy: FailurePolicy) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            client,
            protocol,
            policy,
            shutdown: rx,
            cancel: Arc::new(tx),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Cancels the run for every holder of this context.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// How control leaves a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Failed,
    Cancelled,
    /// A fatal error stopped the whole run.
    Halted,
}

/// One virtual user: a session, a private aggregate and the run context.
pub struct VirtualUser<A> {
    session: Session,
    ctx: ExecutionContext,
    agg: A,
}

impl<A> VirtualUser<A>
where
    A: Aggregate<Metric = Sample>,
{
    pub fn new(id: u64, ctx: ExecutionContext) -> Self {
        Self {
            session: Session::new(id),
            ctx,
            agg: A::new(),
        }
    }

    /// Runs the chain to completion and returns everything this user recorded.
    pub async fn run(mut self, chain: &Chain) -> A {
        let id = self.session.user();
        let started = Instant::now();
        tracing::debug!("User {id} started.");

        let flow = self.run_chain(chain).await;
        let (state, cancelled) = match flow {
            Flow::Continue => (UserState::Completed, false),
            Flow::Cancelled => (UserState::Completed, true),
            Flow::Failed => (UserState::Aborted, false),
            Flow::Halted => (UserState::Aborted, true),
        };

        tracing::debug!("User {id} finished: {state:?}.");
        self.record(UserMetric {
            user: id,
            state,
            elapsed: started.elapsed(),
            cancelled,
        });
        self.agg
    }

    fn record(&mut self, sample: impl Into<Sample>) {
        self.agg.consume(&sample.into());
    }

    fn run_chain<'a>(&'a mut self, chain: &'a Chain) -> BoxFuture<'a, Flow> {
        async move {
            for action in chain.actions() {
                let flow = match action {
                    Action::Exec(request) => self.exec(request).await,
                    Action::Feed(feeder) => self.feed(feeder.as_ref()),
                    Action::Pause(duration) => {
                        tokio::time::sleep(*duration).await;
                        Flow::Continue
                    }
                    Action::Repeat {
                        times,
                        counter,
                        chain,
                    } => self.repeat(Some(*times), counter.as_deref(), chain).await,
                    Action::Forever { counter, chain } => {
                        self.repeat(None, counter.as_deref(), chain).await
                    }
                    Action::Hook(hook) => {
                        hook(&mut self.session);
                        Flow::Continue
                    }
                };
                if flow != Flow::Continue {
                    return flow;
                }
            }
            Flow::Continue
        }
        .boxed()
    }

    async fn repeat(&mut self, times: Option<usize>, counter: Option<&str>, chain: &Chain) -> Flow {
        let mut iteration = 0;
        while times.is_none_or(|n| iteration < n) {
            if self.ctx.is_cancelled() {
                return Flow::Cancelled;
            }
            if let Some(name) = counter {
                self.session.set(name, iteration as i64);
            }
            match self.run_chain(chain).await {
                Flow::Continue => {}
                Flow::Failed if self.ctx.policy == FailurePolicy::AbortIteration => {}
                other => return other,
            }
            iteration += 1;
            // keep tight loops cooperative
            tokio::task::yield_now().await;
        }
        Flow::Continue
    }

    async fn exec(&mut self, request: &Request) -> Flow {
        let step = request.name().source();
        let started = Instant::now();
        let sent = request
            .send(&self.ctx.client, &self.ctx.protocol, &self.session)
            .await;
        let latency = started.elapsed();
        let result = sent.and_then(|response| {
            tracing::trace!(user = self.session.user(), status = response.status, "{step}: {}", response.body);
            check::apply(request.checks(), &response, &mut self.session)
        });

        match result {
            Ok(()) => {
                tracing::debug!(
                    user = self.session.user(),
                    step = %self.rendered_name(request),
                    "Step passed in {latency:?}."
                );
                self.record(StepMetric::ok(step, latency));
                Flow::Continue
            }
            Err(error) => {
                tracing::warn!(
                    user = self.session.user(),
                    step = %self.rendered_name(request),
                    "Step failed: {error}"
                );
                self.record(StepMetric::failed(step, latency, error.kind()));
                match self.ctx.policy {
                    FailurePolicy::Continue => Flow::Continue,
                    FailurePolicy::AbortIteration | FailurePolicy::AbortUser => Flow::Failed,
                }
            }
        }
    }

    /// The step name with session values filled in, or as declared if they are missing.
    fn rendered_name(&self, request: &Request) -> String {
        request
            .name()
            .render(&self.session)
            .unwrap_or_else(|_| request.name().source().to_owned())
    }

    fn feed(&mut self, feeder: &dyn Feeder) -> Flow {
        match feeder.next() {
            Ok(record) => {
                self.session.extend(record.iter());
                Flow::Continue
            }
            Err(error) => {
                tracing::error!("{error}; stopping the run.");
                self.record(StepMetric::failed(
                    format!("Feed {}", feeder.name()),
                    Duration::ZERO,
                    ErrorKind::Exhausted,
                ));
                self.ctx.cancel();
                Flow::Halted
            }
        }
    }
}

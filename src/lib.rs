//! Stampede: open-loop HTTP load generation for Rust.
//!
//! A run starts virtual users according to an injection profile. Each user walks
//! a scenario (a chain of HTTP steps, feeds, pauses and loops) with its own
//! session, so values extracted from one response can be used by the next
//! request. Every step produces a sample; samples are aggregated per user and
//! merged into the run result as each user finishes.
//!
//! # Architecture
//!
//! - [`Scenario`]: a named [`chain::Chain`], run by every virtual user.
//! - [`Executor`]: responsible for actually running the scenario. The built-in
//!   [`InjectionExecutor`] starts users at the offsets of an
//!   [`InjectionProfile`] and enforces an optional maximum duration.
//! - [`feeder::Feeder`]: source of per-iteration parameter records.
//! - [`session::Session`]: the per-user variables steps read and write.
//! - [`http::Request`] and [`check::Check`]: one HTTP step and what to extract
//!   from or assert on its response.
//! - [`Metric`] → [`Aggregate`] → [`Report`] → [`Reporter`]: how results flow
//!   from a single step to the console.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use stampede::{
//!     Executor, Injection, InjectionExecutor, Reporter, Scenario,
//!     aggregate::RunAggregate,
//!     chain::Chain,
//!     check::Check,
//!     feeder::{FileFeeder, Strategy},
//!     http::{HttpProtocol, Request},
//!     report::{RunReport, StdoutReporter},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let games = FileFeeder::from_json_file("resources/data/gameJsonFile.json", Strategy::Random)?;
//!
//!     let chain = Chain::new()
//!         .exec(
//!             Request::post("Authenticate", "/authenticate")
//!                 .body(r#"{"username": "admin", "password": "admin"}"#)
//!                 .check(Check::json_path("token").save_as("jwtToken")),
//!         )
//!         .feed(Arc::new(games))
//!         .exec(
//!             Request::get("Get game - {{name}}", "/videogame/{{id}}")
//!                 .check(Check::json_path("name").is("{{name}}")),
//!         );
//!
//!     let results: RunAggregate = InjectionExecutor::builder()
//!         .profile(vec![Injection::ramp(5, Duration::from_secs(10))])
//!         .protocol(
//!             HttpProtocol::builder()
//!                 .base_url("https://videogamedb.uk/api")
//!                 .accept("application/json")
//!                 .content_type("application/json")
//!                 .build(),
//!         )
//!         .build()
//!         .exec(&Scenario::builder().name("Video games").chain(chain).build())
//!         .await?;
//!
//!     StdoutReporter.report(&RunReport::from(results)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//! - `internals`: exposes scheduling internals (arrival math, the user
//!   scheduler) that are useful for experiments but not part of the stable API.

extern crate self as stampede;

/// Metric aggregators
pub mod aggregate;
/// Chains of actions and the virtual-user interpreter
pub mod chain;
/// Response extraction and assertions
pub mod check;
/// Runtime parameters
pub mod config;
pub mod error;
/// Orchestrators that define how things will actually run
pub mod executor;
/// Parameter sources
pub mod feeder;
pub mod http;
/// When virtual users start
pub mod injection;
/// Single metrics
pub mod metric;
/// Reports and Reporters
pub mod report;
/// Named chains
pub mod scenario;
pub mod session;
pub mod template;

pub use aggregate::Aggregate;
pub use executor::{Executor, InjectionExecutor};
pub use injection::{Injection, InjectionProfile};
pub use metric::Metric;
pub use report::{Report, Reporter};
pub use scenario::Scenario;

/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use stampede_macros::*;
}

//! Load tests against the video game database API.
//!
//! ```text
//! USERS=20 RAMP_DURATION=30 TEST_DURATION=120 videogamedb full
//! videogamedb feeders --base-url http://localhost:8080/api
//! ```

use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rand::{Rng, distr::Alphanumeric, rngs::ThreadRng};
use stampede::{
    Executor, Injection, InjectionExecutor, Reporter, Scenario,
    aggregate::RunAggregate,
    chain::Chain,
    check::Check,
    config::RunConfig,
    feeder::{Fields, FileFeeder, GeneratorFeeder, Strategy},
    http::{HttpProtocol, Request},
    report::{JsonReporter, RunReport, StdoutReporter},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Load tests for the video game database")]
struct Cli {
    #[command(subcommand)]
    workload: Workload,

    #[command(flatten)]
    config: RunConfig,

    /// Print the report as JSON instead of a table.
    #[arg(long, global = true)]
    json: bool,

    /// Log every step, not only failures.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Workload {
    /// Users loop over list, authenticate, create, read and delete until the test duration is over.
    Full,
    /// One user creates ten randomly generated games, one per second.
    Feeders,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = cli.config;
    config.log_summary();

    let protocol = HttpProtocol::builder()
        .base_url(config.base_url.clone())
        .accept("application/json")
        .content_type("application/json")
        .timeout(config.request_timeout())
        .build();

    let (scenario, executor) = match cli.workload {
        Workload::Full => full(&config, protocol)?,
        Workload::Feeders => feeders(&config, protocol)?,
    };

    let results: RunAggregate = executor.exec(&scenario).await?;
    let report = RunReport::from(results);
    if cli.json {
        JsonReporter.report(&report).await
    } else {
        StdoutReporter.report(&report).await
    }
    .map_err(|e| anyhow!("failed to print the report: {e}"))?;

    tracing::info!("Stress test completed");
    if report.passed(config.max_failures) {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(
            "{} steps failed, more than the {} tolerated",
            report.total_ko,
            config.max_failures
        );
        Ok(ExitCode::FAILURE)
    }
}

fn authenticate() -> Request {
    Request::post("Authenticate", "/authenticate")
        .body(r#"{"password": "admin", "username": "admin"}"#)
        .check(Check::json_path("token").save_as("jwtToken"))
}

fn full(config: &RunConfig, protocol: HttpProtocol) -> anyhow::Result<(Scenario, InjectionExecutor)> {
    let games = FileFeeder::from_json_file(config.resource("data/gameJsonFile.json"), Strategy::Random)
        .context("failed to load the game feeder")?;
    let create = Request::post("Create New Game - {{name}}", "/videogame")
        .bearer("jwtToken")
        .body_file(config.resource("bodies/newGameTemplate.json"))
        .context("failed to read the new game body")?
        .as_json();

    let iteration = Chain::new()
        .exec(Request::get("Get all video games", "/videogame"))
        .exec(authenticate())
        .feed(Arc::new(games))
        .exec(create)
        .exec(
            Request::get("Get Last Posted Game - {{name}}", "/videogame/{{id}}")
                .check(Check::json_path("name").is("{{name}}")),
        )
        .exec(
            Request::delete("Delete game - {{name}}", "/videogame/{{id}}")
                .bearer("jwtToken")
                .check(Check::body().is("Video game deleted")),
        );

    let scenario = Scenario::builder()
        .name("Video game db - final simulation")
        .chain(Chain::new().forever(iteration))
        .build();
    let executor = InjectionExecutor::builder()
        .profile(vec![
            Injection::nothing_for(Duration::from_secs(1)),
            Injection::ramp(config.users as usize, config.ramp_duration()),
        ])
        .protocol(protocol)
        .max_duration(config.test_duration())
        .build();
    Ok((scenario, executor))
}

fn feeders(config: &RunConfig, protocol: HttpProtocol) -> anyhow::Result<(Scenario, InjectionExecutor)> {
    let create = Request::post("Create New Game - {{gameName}}", "/videogame")
        .bearer("jwtToken")
        .body_file(config.resource("bodies/customGameTemplate.json"))
        .context("failed to read the custom game body")?
        .as_json()
        .check(Check::body().save_as("responseBody"));

    let iteration = Chain::new()
        .feed(Arc::new(GeneratorFeeder::new("random games", random_game)))
        .exec(create)
        .on_session(|session| {
            if let Some(body) = session.get("responseBody") {
                tracing::info!("{body}");
            }
        })
        .pause(Duration::from_secs(1));

    let scenario = Scenario::builder()
        .name("Video Game Db - custom feeder")
        .chain(Chain::new().exec(authenticate()).repeat(10, iteration))
        .build();
    let executor = InjectionExecutor::builder()
        .profile(vec![Injection::at_once(1)])
        .protocol(protocol)
        .build();
    Ok((scenario, executor))
}

fn random_game(rng: &mut ThreadRng) -> Fields {
    let mut game = Fields::new();
    game.insert("gameId".into(), rng.random_range(1..=10_i64).into());
    game.insert("gameName".into(), format!("{}-gameName", alphanumeric(rng, 5)).into());
    game.insert("releaseDate".into(), random_date(rng).into());
    game.insert("reviewScore".into(), rng.random_range(0..100_i64).into());
    game.insert("category".into(), format!("{}-category", alphanumeric(rng, 5)).into());
    game.insert("rating".into(), format!("{}-rating", alphanumeric(rng, 4)).into());
    game
}

fn alphanumeric(rng: &mut ThreadRng, len: usize) -> String {
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

/// A date within a hundred years either side of 1970-01-01.
fn random_date(rng: &mut ThreadRng) -> String {
    const HUNDRED_YEARS: i64 = 100 * 365;
    let offset = rng.random_range(-HUNDRED_YEARS..HUNDRED_YEARS);
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(offset)))
        .map(|date| date.to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

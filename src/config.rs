//! Runtime parameters of a load test.
//!
//! Every parameter can come from the command line or from the environment, so
//! the same binary can be driven from a shell or from a CI job.

use std::{path::PathBuf, time::Duration};

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct RunConfig {
    /// Number of virtual users to inject.
    #[arg(long, env = "USERS", default_value_t = 5)]
    pub users: u64,

    /// Seconds over which the users are ramped up.
    #[arg(long = "ramp-duration", env = "RAMP_DURATION", default_value_t = 10)]
    pub ramp_secs: u64,

    /// Seconds after which the run is cancelled.
    #[arg(long = "test-duration", env = "TEST_DURATION", default_value_t = 60)]
    pub test_secs: u64,

    /// Base URL every request path is resolved against.
    #[arg(long = "base-url", env = "BASE_URL", default_value = "https://videogamedb.uk/api")]
    pub base_url: String,

    /// Failed steps tolerated before the process exits with an error.
    #[arg(long = "max-failures", env = "MAX_FAILURES", default_value_t = 0)]
    pub max_failures: u64,

    /// Seconds before a single request times out.
    #[arg(long = "request-timeout", env = "REQUEST_TIMEOUT", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Directory holding the feeder files and request bodies.
    #[arg(long, env = "RESOURCES", default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/resources"))]
    pub resources: PathBuf,
}

impl RunConfig {
    pub fn ramp_duration(&self) -> Duration {
        Duration::from_secs(self.ramp_secs)
    }

    pub fn test_duration(&self) -> Duration {
        Duration::from_secs(self.test_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolves a path relative to the resources directory.
    pub fn resource(&self, relative: &str) -> PathBuf {
        self.resources.join(relative)
    }

    /// Logs the effective parameters before the run starts.
    pub fn log_summary(&self) {
        tracing::info!("Running with {} users", self.users);
        tracing::info!("Ramping users over {} seconds", self.ramp_secs);
        tracing::info!("Total test duration {} seconds", self.test_secs);
        tracing::info!("Target: {}", self.base_url);
        tracing::debug!(
            "Request timeout {}s, {} failures tolerated, resources in {}",
            self.request_timeout_secs,
            self.max_failures,
            self.resources.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: RunConfig,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "test",
            "--users",
            "20",
            "--ramp-duration",
            "30",
            "--test-duration",
            "120",
            "--base-url",
            "http://localhost:8080/api",
            "--max-failures",
            "3",
            "--request-timeout",
            "5",
            "--resources",
            "fixtures",
        ]);
        let config = cli.config;

        assert_eq!(config.users, 20);
        assert_eq!(config.ramp_duration(), Duration::from_secs(30));
        assert_eq!(config.test_duration(), Duration::from_secs(120));
        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.resource("bodies/a.json"), PathBuf::from("fixtures/bodies/a.json"));
    }

    #[test]
    fn resources_default_to_the_crate_directory() {
        let config = Cli::parse_from(["test"]).config;
        if std::env::var_os("RESOURCES").is_none() {
            assert!(config.resources.is_absolute());
            assert!(config.resource("data/gameJsonFile.json").is_file());
            assert!(config.resource("bodies/newGameTemplate.json").is_file());
        }
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(Cli::try_parse_from(["test", "--users", "many"]).is_err());
        assert!(Cli::try_parse_from(["test", "--test-duration", "-1"]).is_err());
    }
}

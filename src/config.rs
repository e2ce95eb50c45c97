//! Configuration management for the coordinator and agents.
//!
//! Both binaries read the same environment variables; each uses the subset it needs.
//! - `HOST` / `PORT` - Coordinator bind address. Defaults to `127.0.0.1:8080`.
//! - `ORCHESTRATOR_URL` - Base URL agents poll. Defaults to `http://127.0.0.1:8080`.
//! - `COMPUTING_POWER` - Worker loops per agent process. Defaults to `2`.
//! - `TIME_ADDITION_MS`, `TIME_SUBTRACTION_MS`, `TIME_MULTIPLICATION_MS`,
//!   `TIME_DIVISION_MS` - Simulated service time per operator. Default `10000` each.
//! - `QUEUE_CAPACITY` - Task queue admission bound. Defaults to `100`.
//! - `POLL_INTERVAL_MS` - Agent pause when no task is available. Defaults to `1000`.
//! - `RETRY_BACKOFF_MS` - Agent pause after a transport failure. Defaults to `1000`.
//! - `POLL_WAIT_MS` - Long-poll wait requested by agents. Defaults to `0` (plain polling).
//! - `TASK_LEASE_GRACE_MS` - Added to a task's service time to form its lease. Defaults to `30000`.
//! - `MAX_TASK_ATTEMPTS` - Dispatches before a task is failed. Defaults to `3`.
//! - `LEASE_SWEEP_INTERVAL_MS` - Lease sweep period. Defaults to `1000`.
//! - `STATIC_DIR` - Directory holding the dashboard `index.html`. Defaults to `web`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::calc::Operator;
use crate::util::{env_var_or, env_var_parsed};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Simulated cost of each operator, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimes {
    pub addition_ms: u64,
    pub subtraction_ms: u64,
    pub multiplication_ms: u64,
    pub division_ms: u64,
}

impl ServiceTimes {
    pub fn uniform(ms: u64) -> Self {
        Self {
            addition_ms: ms,
            subtraction_ms: ms,
            multiplication_ms: ms,
            division_ms: ms,
        }
    }

    pub fn for_operator(&self, op: Operator) -> u64 {
        match op {
            Operator::Add => self.addition_ms,
            Operator::Subtract => self.subtraction_ms,
            Operator::Multiply => self.multiplication_ms,
            Operator::Divide => self.division_ms,
        }
    }
}

impl Default for ServiceTimes {
    fn default() -> Self {
        Self::uniform(10_000)
    }
}

/// Coordinator-side scheduling knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Admission bound of the ready-task queue
    pub queue_capacity: usize,

    /// Grace added to a task's service time before its lease expires
    pub lease_grace: Duration,

    /// Dispatches allowed before a task is marked failed
    pub max_task_attempts: u32,

    /// How often expired leases are swept
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            lease_grace: Duration::from_millis(30_000),
            max_task_attempts: 3,
            sweep_interval: Duration::from_millis(1_000),
        }
    }
}

/// Agent-side polling knobs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the coordinator
    pub orchestrator_url: String,

    /// Number of concurrent worker loops
    pub computing_power: usize,

    /// Pause between polls when no task is available
    pub poll_interval: Duration,

    /// Pause after a failed request
    pub retry_backoff: Duration,

    /// Long-poll wait requested from the coordinator (zero disables it)
    pub poll_wait: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            orchestrator_url: "http://127.0.0.1:8080".to_string(),
            computing_power: 2,
            poll_interval: Duration::from_millis(1_000),
            retry_backoff: Duration::from_millis(1_000),
            poll_wait: Duration::ZERO,
        }
    }
}

/// Full configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Directory holding the static dashboard
    pub static_dir: PathBuf,

    /// Per-operator simulated service time
    pub service_times: ServiceTimes,

    pub scheduler: SchedulerConfig,

    pub agent: AgentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            static_dir: PathBuf::from("web"),
            service_times: ServiceTimes::default(),
            scheduler: SchedulerConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_var_parsed(name, default).map_err(|e| ConfigError::InvalidValue(name.to_string(), e))
}

fn millis(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    parsed(name, default.as_millis() as u64).map(Duration::from_millis)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let host = env_var_or("HOST", &defaults.host);
        let port = parsed("PORT", defaults.port)?;
        let static_dir = PathBuf::from(env_var_or("STATIC_DIR", "web"));

        let fallback = defaults.service_times;
        let service_times = ServiceTimes {
            addition_ms: parsed("TIME_ADDITION_MS", fallback.addition_ms)?,
            subtraction_ms: parsed("TIME_SUBTRACTION_MS", fallback.subtraction_ms)?,
            multiplication_ms: parsed("TIME_MULTIPLICATION_MS", fallback.multiplication_ms)?,
            division_ms: parsed("TIME_DIVISION_MS", fallback.division_ms)?,
        };

        let scheduler = SchedulerConfig {
            queue_capacity: parsed("QUEUE_CAPACITY", defaults.scheduler.queue_capacity)?,
            lease_grace: millis("TASK_LEASE_GRACE_MS", defaults.scheduler.lease_grace)?,
            max_task_attempts: parsed("MAX_TASK_ATTEMPTS", defaults.scheduler.max_task_attempts)?
                .max(1),
            sweep_interval: millis("LEASE_SWEEP_INTERVAL_MS", defaults.scheduler.sweep_interval)?,
        };
        if scheduler.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "QUEUE_CAPACITY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let agent = AgentConfig {
            orchestrator_url: env_var_or("ORCHESTRATOR_URL", &defaults.agent.orchestrator_url),
            computing_power: parsed("COMPUTING_POWER", defaults.agent.computing_power)?.max(1),
            poll_interval: millis("POLL_INTERVAL_MS", defaults.agent.poll_interval)?,
            retry_backoff: millis("RETRY_BACKOFF_MS", defaults.agent.retry_backoff)?,
            poll_wait: millis("POLL_WAIT_MS", defaults.agent.poll_wait)?,
        };

        Ok(Self {
            host,
            port,
            static_dir,
            service_times,
            scheduler,
            agent,
        })
    }

    /// Config with fast timings (useful for testing).
    pub fn for_testing(service_ms: u64) -> Self {
        Self {
            service_times: ServiceTimes::uniform(service_ms),
            scheduler: SchedulerConfig {
                lease_grace: Duration::from_millis(5_000),
                sweep_interval: Duration::from_millis(50),
                ..SchedulerConfig::default()
            },
            agent: AgentConfig {
                poll_interval: Duration::from_millis(10),
                retry_backoff: Duration::from_millis(10),
                ..AgentConfig::default()
            },
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_time_per_operator() {
        let times = ServiceTimes {
            addition_ms: 1,
            subtraction_ms: 2,
            multiplication_ms: 3,
            division_ms: 4,
        };
        assert_eq!(times.for_operator(Operator::Add), 1);
        assert_eq!(times.for_operator(Operator::Subtract), 2);
        assert_eq!(times.for_operator(Operator::Multiply), 3);
        assert_eq!(times.for_operator(Operator::Divide), 4);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.agent.computing_power, 2);
        assert_eq!(config.scheduler.queue_capacity, 100);
        assert_eq!(config.service_times, ServiceTimes::uniform(10_000));
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let value = parsed::<u16>("DISTCALC_CONFIG_TEST_PORT_UNSET", 1).unwrap();
        assert_eq!(value, 1);

        std::env::set_var("DISTCALC_CONFIG_TEST_BAD_PORT", "eighty");
        let err = parsed::<u16>("DISTCALC_CONFIG_TEST_BAD_PORT", 1).unwrap_err();
        assert!(err.to_string().contains("DISTCALC_CONFIG_TEST_BAD_PORT"));
    }
}

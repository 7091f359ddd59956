// Simulation settings, read from the environment

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Participants at the table (2..=10)
    pub replicas: usize,

    /// Operations each participant issues
    pub ops_per_actor: usize,

    /// Upper bound of the simulated per-frame network delay
    pub max_delay_ms: u64,

    /// Probability that a frame is delivered a second time
    pub duplicate_rate: f64,

    pub seed: u64,

    /// Append-only audit log; disabled when unset
    pub op_log_path: Option<PathBuf>,

    pub retention_floor: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            replicas: 4,
            ops_per_actor: 50,
            max_delay_ms: 20,
            duplicate_rate: 0.05,
            seed: 7,
            op_log_path: None,
            retention_floor: 256,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", name, value)),
        Err(_) => Ok(default),
    }
}

impl SimulationConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = SimulationConfig::default();

        let config = SimulationConfig {
            replicas: env_or("REPLICAS", defaults.replicas)?,
            ops_per_actor: env_or("OPS_PER_ACTOR", defaults.ops_per_actor)?,
            max_delay_ms: env_or("MAX_DELAY_MS", defaults.max_delay_ms)?,
            duplicate_rate: env_or("DUPLICATE_RATE", defaults.duplicate_rate)?,
            seed: env_or("SEED", defaults.seed)?,
            op_log_path: std::env::var("OP_LOG_PATH").ok().map(PathBuf::from),
            retention_floor: env_or("RETENTION_FLOOR", defaults.retention_floor)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=10).contains(&self.replicas) {
            bail!("REPLICAS must be between 2 and 10, got {}", self.replicas);
        }
        if !(0.0..1.0).contains(&self.duplicate_rate) {
            bail!(
                "DUPLICATE_RATE must be in [0, 1), got {}",
                self.duplicate_rate
            );
        }
        Ok(())
    }
}

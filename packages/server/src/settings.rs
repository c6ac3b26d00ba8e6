//! Process configuration: defaults, then `jobqueue.toml`, then `JOBQUEUE_*`
//! environment variables.

use db::DbConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use queue_core::QueueConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "jobqueue.toml";
pub const ENV_PREFIX: &str = "JOBQUEUE_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub queue: QueueConfig,
    pub database: DbConfig,
    /// Enqueue a handful of demo jobs on startup.
    pub seed_demo_jobs: bool,
}

impl Settings {
    /// Load settings from [`CONFIG_FILE`] and the environment.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `JOBQUEUE_QUEUE__CONCURRENCY=8` or `JOBQUEUE_DATABASE__ENDPOINT=rocksdb://data`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(CONFIG_FILE).extract()
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

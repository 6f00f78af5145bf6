use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{MigrateError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// identifier field of every object type, never copied into payloads
    pub id_field: String,
    /// fields used to build a human-identifiable reference to a source record
    pub display_fields: Vec<String>,
    /// catalog config
    pub catalog: CatalogConfig,
    /// external-key resolver config
    pub resolver: ResolverConfig,
    /// execution config
    pub execution: ExecutionConfig,
    /// store config
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// glob patterns over `Object` or `Object.field` that are never migrated
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// max cached key lookups for a session
    pub cache_capacity: u64,
    /// values not matching this pattern skip identifier-based resolution
    pub id_pattern: Option<String>,
    /// fallback key field per target object type when no key field is chosen
    pub default_keys: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// concurrent store calls within one stage, range [1, 256], defaults to 4
    pub workers: usize,
    /// payloads per create call, defaults to 200
    pub batch_size: usize,
    /// per store call timeout in milliseconds, 0 disables it
    pub call_timeout_ms: u64,
    /// defer non-required include edges that close a cycle between object types
    pub defer_optional_cycle_edges: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// store type
    pub store_type: StoreType,
    /// postgres config
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    #[default]
    Mem,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// source database url
    pub source_url: String,
    /// target database url
    pub target_url: String,
    /// schema both databases share, defaults to `public`
    #[serde(default = "default_pg_schema")]
    pub schema: String,
}

fn default_pg_schema() -> String {
    "public".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_field: "Id".to_string(),
            display_fields: vec!["Name".to_string()],
            catalog: CatalogConfig::default(),
            resolver: ResolverConfig::default(),
            execution: ExecutionConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10_000,
            id_pattern: None,
            default_keys: BTreeMap::new(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 200,
            call_timeout_ms: 60_000,
            defer_optional_cycle_edges: false,
        }
    }
}

impl ExecutionConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| MigrateError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id_field.is_empty() {
            return Err(MigrateError::Config("id_field must not be empty".to_string()));
        }
        if !(1..=256).contains(&self.execution.workers) {
            return Err(MigrateError::Config(format!("execution.workers must be within [1, 256], got {}", self.execution.workers)));
        }
        if self.execution.batch_size == 0 {
            return Err(MigrateError::Config("execution.batch_size must be positive".to_string()));
        }
        if self.store.store_type == StoreType::Postgres && self.store.postgres.is_none() {
            return Err(MigrateError::Config("[store.postgres] is required when store_type is postgres".to_string()));
        }
        if let Some(pattern) = &self.resolver.id_pattern {
            regex::Regex::new(pattern)?;
        }
        Ok(())
    }
}

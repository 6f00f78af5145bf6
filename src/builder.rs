use std::sync::Arc;

use crate::{
    Config, Engine, MigrateError, Result, StoreType,
    catalog::Catalog,
    store::{PostgresOrg, RecordSource, TargetStore},
};

#[derive(Default)]
pub struct EngineBuilder {
    config: Config,
    catalog: Option<Arc<dyn Catalog>>,
    source: Option<Arc<dyn RecordSource>>,
    target: Option<Arc<dyn TargetStore>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    /// Source organization, also used as the relationship catalog unless one is set.
    pub fn source<T>(
        mut self,
        source: T,
    ) -> Self
    where
        T: Catalog + RecordSource + 'static,
    {
        let source = Arc::new(source);
        if self.catalog.is_none() {
            self.catalog = Some(source.clone());
        }
        self.source = Some(source);
        self
    }

    pub fn catalog(
        mut self,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn target<T>(
        mut self,
        target: T,
    ) -> Self
    where
        T: TargetStore + 'static,
    {
        self.target = Some(Arc::new(target));
        self
    }

    pub fn build(self) -> Result<Engine> {
        let catalog = self.catalog.ok_or_else(|| MigrateError::Engine("a relationship catalog is required".to_string()))?;
        let source = self.source.ok_or_else(|| MigrateError::Engine("a source organization is required".to_string()))?;
        let target = self.target.ok_or_else(|| MigrateError::Engine("a target organization is required".to_string()))?;

        Engine::new(self.config, catalog, source, target)
    }

    /// Build an engine whose organizations are described by `config.store`.
    pub async fn connect(config: Config) -> Result<Engine> {
        match config.store.store_type {
            StoreType::Mem => Err(MigrateError::Config("in-memory organizations must be passed to EngineBuilder::source and ::target".to_string())),
            StoreType::Postgres => {
                let postgres = config.store.postgres.clone().ok_or_else(|| MigrateError::Config("[store.postgres] is required when store_type is postgres".to_string()))?;
                let source = PostgresOrg::connect(&postgres.source_url, &postgres.schema, &config.id_field).await?;
                let target = PostgresOrg::connect(&postgres.target_url, &postgres.schema, &config.id_field).await?;

                EngineBuilder::new().config(config).source(source).target(target).build()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{Config, MemOrg, MigrateError};

    use super::EngineBuilder;

    #[test]
    fn test_build_requires_organizations() {
        assert!(matches!(EngineBuilder::new().source(MemOrg::new()).build(), Err(MigrateError::Engine(_))));
        assert!(matches!(EngineBuilder::new().target(MemOrg::new()).build(), Err(MigrateError::Engine(_))));
        assert!(EngineBuilder::new().source(MemOrg::new()).target(MemOrg::new()).build().is_ok());
    }

    #[test]
    fn test_build_validates_config() {
        let mut config = Config::default();
        config.execution.batch_size = 0;
        let built = EngineBuilder::new().config(config).source(MemOrg::new()).target(MemOrg::new()).build();
        assert!(matches!(built, Err(MigrateError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_mem_store() {
        assert!(matches!(EngineBuilder::connect(Config::default()).await, Err(MigrateError::Config(_))));
    }
}

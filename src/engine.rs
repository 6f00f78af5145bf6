//! Migration engine - the main entry point for Orgmigrate.
//!
//! The engine ties the collaborators of a session together:
//! - Analyzing root records into a reviewable [`Plan`]
//! - Executing a plan against the target organization
//! - Broadcasting progress on the event channel

use std::sync::Arc;

use tracing::debug;

use crate::{
    Config, MigrateError, Result,
    catalog::{Catalog, CatalogClient},
    common::Shutdown,
    dispatcher::Dispatcher,
    graph::GraphBuilder,
    model::{FieldActions, SourceRecord},
    plan::{Plan, compile},
    resolver::ExternalKeyResolver,
    result::MigrationResult,
    runtime::{Channel, Context},
    store::{RecordSource, TargetStore},
    utils,
};

/// The migration engine of one session.
///
/// Relationship descriptors and external-key lookups are cached for the
/// lifetime of the engine; everything a run creates lives in its result.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().config(config).source(source).target(target).build()?;
///
/// let plan = engine.analyze(roots, &actions).await?;
/// println!("{}", plan.summary());
///
/// let result = engine.execute_migration(&plan).await?;
/// println!("{}", result.summary());
/// ```
pub struct Engine {
    config: Config,
    /// Relationship catalog of the source organization.
    catalog: Arc<CatalogClient>,
    source: Arc<dyn RecordSource>,
    target: Arc<dyn TargetStore>,
    /// Session-scoped external-key lookups.
    resolver: Arc<ExternalKeyResolver>,
    /// Event channel for broadcasting progress.
    channel: Arc<Channel>,
}

impl Engine {
    pub(crate) fn new(
        config: Config,
        catalog: Arc<dyn Catalog>,
        source: Arc<dyn RecordSource>,
        target: Arc<dyn TargetStore>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(CatalogClient::new(catalog, &config.catalog.excluded)?);
        let resolver = Arc::new(ExternalKeyResolver::new(target.clone(), &config)?);

        Ok(Self {
            config,
            catalog,
            source,
            target,
            resolver,
            channel: Arc::new(Channel::new()),
        })
    }

    /// Collect every record to create and compile the plan.
    ///
    /// Fails with [`MigrateError::CyclicDependency`] when object types depend
    /// on each other, or when the catalog cannot be read.
    pub async fn analyze(
        &self,
        roots: Vec<SourceRecord>,
        actions: &FieldActions,
    ) -> Result<Plan> {
        let graph = GraphBuilder::new(self.catalog.clone(), self.source.clone())
            .default_keys(self.config.resolver.default_keys.clone())
            .build(roots, actions)
            .await?;

        compile(graph, self.config.execution.defer_optional_cycle_edges)
    }

    pub async fn execute_migration(
        &self,
        plan: &Plan,
    ) -> Result<MigrationResult> {
        self.execute_migration_with(plan, &Shutdown::new()).await
    }

    /// Execute a plan, stopping between stages once `shutdown` is signalled.
    ///
    /// Each call is an independent run with a fresh remap table.
    pub async fn execute_migration_with(
        &self,
        plan: &Plan,
        shutdown: &Shutdown,
    ) -> Result<MigrationResult> {
        if let Some(object_type) = plan.records_by_type.keys().find(|t| !plan.object_order.contains(t)) {
            return Err(MigrateError::Plan(format!("object type {} has records but no stage", object_type)));
        }

        self.channel.listen();
        let ctx = Arc::new(Context::new(
            utils::longid(),
            self.channel.clone(),
            self.resolver.clone(),
            self.target.clone(),
            self.config.execution.clone(),
            self.config.id_field.clone(),
            self.config.display_fields.clone(),
        ));
        debug!(run_id = ctx.run_id(), "run context created");

        Ok(Dispatcher::new(ctx).run(plan, shutdown).await)
    }

    /// Stops dispatching events to channel handlers.
    pub fn shutdown(&self) {
        self.channel.shutdown();
    }

    /// Returns a reference to the event channel.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> Arc<ExternalKeyResolver> {
        self.resolver.clone()
    }
}

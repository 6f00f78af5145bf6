//! # Orgmigrate
//!
//! Orgmigrate replicates records fetched from one data store (the *source
//! organization*) into a second instance of the same schema (the *target
//! organization*), carrying along the related records the user asked for.
//!
//! ## Pipeline
//!
//! - **Graph**: starting from root records and per-field [`FieldAction`]s, collect every record that
//!   must be created and the child -> parent dependencies between them
//! - **Plan**: order object types so every parent is created before its children, rejecting
//!   cross-type cycles
//! - **Dispatch**: create records stage by stage, remap source identifiers to the freshly minted
//!   target identifiers, then patch self references in a deferred update pass
//!
//! Per-record failures never abort a run; they are aggregated into a [`MigrationResult`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use orgmigrate::{EngineBuilder, FieldAction, FieldActions};
//!
//! let engine = EngineBuilder::new().source(source).target(target).build()?;
//!
//! let mut actions = FieldActions::new();
//! actions.set("Contact", "AccountId", FieldAction::Include);
//!
//! let plan = engine.analyze(roots, &actions).await?;
//! println!("{}", plan.summary());
//! let result = engine.execute_migration(&plan).await?;
//! ```

mod builder;
mod catalog;
mod common;
mod config;
mod dispatcher;
mod engine;
mod error;
mod events;
mod graph;
mod model;
mod plan;
mod resolver;
mod result;
mod runtime;
mod store;
mod utils;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use catalog::{Catalog, CatalogClient};
pub use common::Shutdown;
pub use config::{CatalogConfig, Config, ExecutionConfig, PostgresConfig, ResolverConfig, StoreConfig, StoreType};
pub use engine::Engine;
pub use error::MigrateError;
pub use events::{Event, Message, MigrationEvent};
pub use graph::{DependencyEdge, GraphBuilder, KeyReference, NodeWarning, RecordGraph, RecordNode, Reference, ReferenceKind};
pub use model::*;
pub use plan::{DeferredUpdate, Plan, PlanIssue, compile};
pub use resolver::ExternalKeyResolver;
pub use result::{ErrorKind, MigrationResult, ObjectResult, RecordError, Remapping, RunStatus};
pub use runtime::{Channel, ChannelEvent, ChannelOptions};
pub use store::{CallStats, CreateOutcome, MemOrg, PostgresOrg, RecordSource, TargetStore, UpdateCall};

/// Result type alias for Orgmigrate operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;

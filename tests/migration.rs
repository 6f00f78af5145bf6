use std::time::Duration;

use async_trait::async_trait;
use orgmigrate::{
    Config, CreateOutcome, Engine, EngineBuilder, ErrorKind, FieldAction, FieldActions, Fields, MemOrg, MigrateError, MigrationEvent, RecordKey,
    RelationshipDescriptor, RunStatus, Shutdown, SourceRecord, TargetId, TargetStore,
};
use serde_json::json;

fn source() -> MemOrg {
    let org = MemOrg::new();
    org.describe(
        "Account",
        vec![RelationshipDescriptor::new("ParentId", ["Account"]), RelationshipDescriptor::new("PrimaryContactId", ["Contact"])],
    );
    org.describe(
        "Contact",
        vec![
            RelationshipDescriptor::new("AccountId", ["Account"]).required(),
            RelationshipDescriptor::new("OwnerId", ["User"]),
            RelationshipDescriptor::new("ReportsToId", ["Contact"]),
        ],
    );
    org.describe("Task", vec![RelationshipDescriptor::new("WhatId", ["Account", "Opportunity"])]);

    org.insert(SourceRecord::new("Account", "001A").with_field("Name", "Acme"));
    org.insert(SourceRecord::new("Account", "001B").with_field("Name", "Acme EU").with_field("ParentId", "001A"));
    org.insert(SourceRecord::new("Opportunity", "006A").with_field("Name", "Renewal"));
    org.insert(SourceRecord::new("User", "005A").with_field("Username", "jdoe@example.com"));
    org
}

fn engine(
    source: &MemOrg,
    target: &MemOrg,
    config: Config,
) -> Engine {
    EngineBuilder::new().config(config).source(source.clone()).target(target.clone()).build().unwrap()
}

fn contact(
    id: &str,
    account: &str,
) -> SourceRecord {
    SourceRecord::new("Contact", id).with_field("Id", id).with_field("LastName", id).with_field("AccountId", account).with_field("OwnerId", "005A")
}

fn include_account() -> FieldActions {
    let mut actions = FieldActions::new();
    actions.set("Contact", "AccountId", FieldAction::Include);
    actions
}

// ==================== scenarios ====================

#[tokio::test]
async fn test_included_parent_is_created_first_and_remapped() {
    let (source, target) = (source(), MemOrg::new());
    let engine = engine(&source, &target, Config::default());

    let plan = engine.analyze(vec![contact("003A", "001A")], &include_account()).await.unwrap();
    assert_eq!(plan.object_order, vec!["Account", "Contact"]);

    let result = engine.execute_migration(&plan).await.unwrap();
    assert!(result.is_clean());
    assert_eq!(result.inserted(), 2);

    let account_id = result.target_id(&RecordKey::new("Account", "001A")).unwrap().clone();
    let contact_id = result.target_id(&RecordKey::new("Contact", "003A")).unwrap();
    let created = target.record("Contact", contact_id).unwrap();
    assert_eq!(created.fields["AccountId"], json!(account_id));
    assert_eq!(created.fields["LastName"], json!("003A"));
    assert_eq!(created.fields["Id"], json!(contact_id));
    assert!(!created.fields.contains_key("OwnerId"));
    assert_eq!(target.record("Account", &account_id).unwrap().fields["Name"], json!("Acme"));
}

#[tokio::test]
async fn test_self_reference_set_by_one_update() {
    let (source, target) = (source(), MemOrg::new());
    let engine = engine(&source, &target, Config::default());
    let mut actions = FieldActions::new();
    actions.set("Account", "ParentId", FieldAction::Include);

    let roots = vec![source.record("Account", "001A").unwrap(), source.record("Account", "001B").unwrap()];
    let plan = engine.analyze(roots, &actions).await.unwrap();
    assert_eq!(plan.object_order, vec!["Account"]);
    assert_eq!(plan.deferred_updates.len(), 1);

    let result = engine.execute_migration(&plan).await.unwrap();
    assert!(result.is_clean());
    assert_eq!(result.object("Account").unwrap().inserted, 2);
    assert_eq!(result.object("Account").unwrap().updated, 1);

    let parent_id = result.target_id(&RecordKey::new("Account", "001A")).unwrap().clone();
    let child_id = result.target_id(&RecordKey::new("Account", "001B")).unwrap().clone();
    let updates = target.update_log();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].target_id, child_id);
    assert_eq!(updates[0].fields["ParentId"], json!(parent_id));
    assert_eq!(target.record("Account", &child_id).unwrap().fields["ParentId"], json!(parent_id));
}

#[tokio::test]
async fn test_unmatched_optional_key_omits_field() {
    let (source, target) = (source(), MemOrg::new());
    let engine = engine(&source, &target, Config::default());
    let mut actions = FieldActions::new();
    actions.set("Contact", "OwnerId", FieldAction::match_by_key("Username"));

    let plan = engine.analyze(vec![contact("003A", "001A")], &actions).await.unwrap();
    assert_eq!(plan.record_count(), 1);

    let result = engine.execute_migration(&plan).await.unwrap();
    let contacts = result.object("Contact").unwrap();
    assert_eq!(contacts.inserted, 1);
    assert_eq!(contacts.failed, 0);
    assert_eq!(contacts.errors_of(ErrorKind::ExternalKeyNotFound).count(), 1);
    assert_eq!(
        contacts.error_messages(),
        vec!["[ExternalKeyNotFound] Contact 003A (OwnerId): no User with Username = jdoe@example.com"]
    );

    let created = target.records("Contact");
    assert_eq!(created.len(), 1);
    assert!(!created[0].fields.contains_key("OwnerId"));
}

#[tokio::test]
async fn test_matched_key_points_at_existing_record() {
    let (source, target) = (source(), MemOrg::new());
    target.insert(SourceRecord::new("User", "005T").with_field("Username", "jdoe@example.com"));
    let engine = engine(&source, &target, Config::default());
    let mut actions = FieldActions::new();
    actions.set("Contact", "OwnerId", FieldAction::match_by_key("Username"));

    let roots = vec![contact("003A", "001A"), contact("003B", "001A"), contact("003C", "001A")];
    let plan = engine.analyze(roots, &actions).await.unwrap();
    let result = engine.execute_migration(&plan).await.unwrap();

    assert!(result.is_clean());
    assert!(target.records("Contact").iter().all(|c| c.fields["OwnerId"] == json!("005T")));
    assert_eq!(target.calls().queries, 1);
    assert_eq!(target.count("User"), 1);
}

#[tokio::test]
async fn test_required_key_miss_fails_without_insert() {
    let (source, target) = (source(), MemOrg::new());
    source.describe("Contact", vec![RelationshipDescriptor::new("OwnerId", ["User"]).required()]);
    let engine = engine(&source, &target, Config::default());
    let mut actions = FieldActions::new();
    actions.set("Contact", "OwnerId", FieldAction::match_by_key("Username"));

    let plan = engine.analyze(vec![contact("003A", "001A")], &actions).await.unwrap();
    let result = engine.execute_migration(&plan).await.unwrap();

    let contacts = result.object("Contact").unwrap();
    assert_eq!(contacts.failed, 1);
    assert_eq!(contacts.errors_of(ErrorKind::ExternalKeyNotFound).count(), 1);
    assert_eq!(target.calls().creates, 0);
}

#[tokio::test]
async fn test_one_failed_sibling_blocks_only_its_children() {
    let (source, target) = (source(), MemOrg::new());
    target.reject_when("Account", "Name", "Account 4", "FIELD_CUSTOM_VALIDATION_EXCEPTION: name is reserved");
    let engine = engine(&source, &target, Config::default());

    let mut roots: Vec<SourceRecord> = (1..=10).map(|i| SourceRecord::new("Account", format!("A{:02}", i)).with_field("Name", format!("Account {}", i))).collect();
    roots.push(contact("003D", "A04"));
    roots.push(contact("003E", "A05"));

    let plan = engine.analyze(roots, &include_account()).await.unwrap();
    let result = engine.execute_migration(&plan).await.unwrap();

    let accounts = result.object("Account").unwrap();
    assert_eq!(accounts.inserted, 9);
    assert_eq!(accounts.failed, 1);
    assert_eq!(accounts.error_messages(), vec!["[RecordCreateFailed] Account A04 (Name: Account 4): FIELD_CUSTOM_VALIDATION_EXCEPTION: name is reserved"]);

    let contacts = result.object("Contact").unwrap();
    assert_eq!(contacts.inserted, 1);
    assert_eq!(contacts.failed, 1);
    let blocked = contacts.errors_of(ErrorKind::ParentNotCreated).next().unwrap();
    assert_eq!(blocked.record, RecordKey::new("Contact", "003D"));
    assert_eq!(blocked.field_name.as_deref(), Some("AccountId"));

    assert!(result.target_id(&RecordKey::new("Account", "A04")).is_none());
    assert!(result.target_id(&RecordKey::new("Contact", "003D")).is_none());
    assert_eq!(target.count("Contact"), 1);
    assert_eq!(result.remapped.len(), 10);
}

// ==================== graph properties ====================

#[tokio::test]
async fn test_shared_parent_created_once() {
    let (source, target) = (source(), MemOrg::new());
    let engine = engine(&source, &target, Config::default());

    let plan = engine.analyze(vec![contact("003A", "001A"), contact("003B", "001A")], &include_account()).await.unwrap();
    assert_eq!(plan.stage("Account").len(), 1);

    let result = engine.execute_migration(&plan).await.unwrap();
    assert!(result.is_clean());
    assert_eq!(target.count("Account"), 1);
    let account_id = result.target_id(&RecordKey::new("Account", "001A")).unwrap();
    assert!(target.records("Contact").iter().all(|c| c.fields["AccountId"] == json!(account_id)));
}

#[tokio::test]
async fn test_analyze_is_deterministic() {
    let (source, target) = (source(), MemOrg::new());
    let engine = engine(&source, &target, Config::default());
    let mut actions = include_account();
    actions.set_for_type("Task", "WhatId", "Opportunity", FieldAction::Include);

    let roots = vec![SourceRecord::new("Task", "00TA").with_field("WhatId", "006A"), contact("003A", "001A")];
    let first = engine.analyze(roots.clone(), &actions).await.unwrap();
    let second = engine.analyze(roots, &actions).await.unwrap();

    assert_eq!(first.object_order, vec!["Account", "Contact", "Opportunity", "Task"]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_polymorphic_parent_created_and_remapped() {
    let (source, target) = (source(), MemOrg::new());
    let engine = engine(&source, &target, Config::default());
    let mut actions = FieldActions::new();
    actions.set("Task", "WhatId", FieldAction::Include);

    let plan = engine.analyze(vec![SourceRecord::new("Task", "00TA").with_field("Subject", "Call").with_field("WhatId", "006A")], &actions).await.unwrap();
    assert_eq!(plan.object_order, vec!["Opportunity", "Task"]);

    let result = engine.execute_migration(&plan).await.unwrap();
    let opportunity_id = result.target_id(&RecordKey::new("Opportunity", "006A")).unwrap();
    assert_eq!(target.records("Task")[0].fields["WhatId"], json!(opportunity_id));
}

#[tokio::test]
async fn test_fetch_failure_is_reported_not_fatal() {
    let (source, target) = (source(), MemOrg::new());
    source.fail_fetch("Account", "001A");
    let engine = engine(&source, &target, Config::default());

    let plan = engine.analyze(vec![contact("003A", "001A")], &include_account()).await.unwrap();
    assert_eq!(plan.object_order, vec!["Contact"]);
    assert_eq!(plan.issues_of(ErrorKind::MissingRequiredDependency).count(), 1);

    let result = engine.execute_migration(&plan).await.unwrap();
    let contacts = result.object("Contact").unwrap();
    assert_eq!(contacts.inserted, 1);
    assert_eq!(contacts.errors_of(ErrorKind::RelatedRecordFetchFailed).count(), 1);
    assert!(!target.records("Contact")[0].fields.contains_key("AccountId"));
}

#[tokio::test]
async fn test_excluded_fields_never_reach_payload() {
    let (source, target) = (source(), MemOrg::new());
    let mut config = Config::default();
    config.catalog.excluded = vec!["*.LastName".to_string()];
    let engine = engine(&source, &target, config);

    let plan = engine.analyze(vec![contact("003A", "001A").with_field("Email", "doe@example.com")], &FieldActions::new()).await.unwrap();
    engine.execute_migration(&plan).await.unwrap();

    let created = &target.records("Contact")[0];
    assert_eq!(created.fields["Email"], json!("doe@example.com"));
    assert!(!created.fields.contains_key("LastName"));
    assert!(!created.fields.contains_key("AccountId"));
}

// ==================== cycles ====================

fn cyclic_actions() -> FieldActions {
    let mut actions = include_account();
    actions.set("Account", "PrimaryContactId", FieldAction::Include);
    actions
}

#[tokio::test]
async fn test_cross_type_cycle_is_rejected() {
    let (source, target) = (source(), MemOrg::new());
    source.insert(SourceRecord::new("Account", "001C").with_field("Name", "Initech").with_field("PrimaryContactId", "003A"));
    let engine = engine(&source, &target, Config::default());

    let err = engine.analyze(vec![contact("003A", "001C")], &cyclic_actions()).await.unwrap_err();
    assert_eq!(
        err,
        MigrateError::CyclicDependency {
            object_types: vec!["Account".to_string(), "Contact".to_string()],
        }
    );
}

#[tokio::test]
async fn test_optional_cycle_edge_set_after_creation() {
    let (source, target) = (source(), MemOrg::new());
    source.insert(SourceRecord::new("Account", "001C").with_field("Name", "Initech").with_field("PrimaryContactId", "003A"));
    let mut config = Config::default();
    config.execution.defer_optional_cycle_edges = true;
    let engine = engine(&source, &target, config);

    let plan = engine.analyze(vec![contact("003A", "001C")], &cyclic_actions()).await.unwrap();
    assert_eq!(plan.object_order, vec!["Account", "Contact"]);
    assert_eq!(plan.deferred_updates.len(), 1);

    let result = engine.execute_migration(&plan).await.unwrap();
    assert!(result.is_clean());
    let account_id = result.target_id(&RecordKey::new("Account", "001C")).unwrap();
    let contact_id = result.target_id(&RecordKey::new("Contact", "003A")).unwrap();
    assert_eq!(target.record("Account", account_id).unwrap().fields["PrimaryContactId"], json!(contact_id));
    assert_eq!(target.record("Contact", contact_id).unwrap().fields["AccountId"], json!(account_id));
}

// ==================== execution control ====================

#[tokio::test]
async fn test_batches_bounded_by_batch_size() {
    let (source, target) = (source(), MemOrg::new());
    let mut config = Config::default();
    config.execution.batch_size = 3;
    config.execution.workers = 2;
    let engine = engine(&source, &target, config);

    let roots = (0..10).map(|i| SourceRecord::new("Account", format!("A{}", i)).with_field("Name", format!("Account {}", i))).collect();
    let plan = engine.analyze(roots, &FieldActions::new()).await.unwrap();
    let result = engine.execute_migration(&plan).await.unwrap();

    assert_eq!(result.inserted(), 10);
    assert_eq!(target.calls().creates, 4);
}

#[tokio::test]
async fn test_cancel_before_start_creates_nothing() {
    let (source, target) = (source(), MemOrg::new());
    let engine = engine(&source, &target, Config::default());
    let plan = engine.analyze(vec![contact("003A", "001A")], &include_account()).await.unwrap();

    let shutdown = Shutdown::new();
    shutdown.shutdown();
    let result = engine.execute_migration_with(&plan, &shutdown).await.unwrap();

    assert_eq!(
        result.status,
        RunStatus::Cancelled {
            completed_stages: 0,
        }
    );
    assert_eq!(target.calls().creates, 0);
}

#[tokio::test]
async fn test_cancel_takes_effect_between_stages() {
    let (source, target) = (source(), MemOrg::new());
    target.set_latency(Some(Duration::from_millis(200)));
    let engine = engine(&source, &target, Config::default());
    let plan = engine.analyze(vec![contact("003A", "001A")], &include_account()).await.unwrap();

    let shutdown = Shutdown::new();
    let mut events = engine.channel().subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event.event, MigrationEvent::StageStarted { .. }) {
                trigger.shutdown();
            }
        }
    });

    let result = engine.execute_migration_with(&plan, &shutdown).await.unwrap();
    assert_eq!(
        result.status,
        RunStatus::Cancelled {
            completed_stages: 1,
        }
    );
    assert_eq!(target.count("Account"), 1);
    assert_eq!(target.count("Contact"), 0);
    assert_eq!(result.remapped.len(), 1);
}

#[tokio::test]
async fn test_unreachable_target_aborts_session() {
    let (source, target) = (source(), MemOrg::new());
    target.set_unreachable(true);
    let engine = engine(&source, &target, Config::default());
    let plan = engine.analyze(vec![contact("003A", "001A")], &include_account()).await.unwrap();

    let result = engine.execute_migration(&plan).await.unwrap();
    assert!(matches!(&result.status, RunStatus::Aborted { error } if error.starts_with("target store unreachable")));
    assert_eq!(result.object("Account").unwrap().failed, 1);
    assert!(result.object("Contact").is_none());
    assert!(!result.is_clean());
}

#[tokio::test]
async fn test_slow_call_times_out_per_batch() {
    let (source, target) = (source(), MemOrg::new());
    target.set_latency(Some(Duration::from_millis(300)));
    let mut config = Config::default();
    config.execution.call_timeout_ms = 20;
    let engine = engine(&source, &target, config);

    let plan = engine.analyze(vec![source.record("Account", "001A").unwrap()], &FieldActions::new()).await.unwrap();
    let result = engine.execute_migration(&plan).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    let accounts = result.object("Account").unwrap();
    assert_eq!(accounts.failed, 1);
    assert_eq!(accounts.errors[0].message, "timed out after 20ms");
}

#[tokio::test]
async fn test_progress_events_in_order() {
    let (source, target) = (source(), MemOrg::new());
    let engine = engine(&source, &target, Config::default());
    let plan = engine.analyze(vec![contact("003A", "001A")], &include_account()).await.unwrap();

    let mut events = engine.channel().subscribe();
    let result = engine.execute_migration(&plan).await.unwrap();

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.run_id, result.run_id);
        names.push(event.event.str().to_string());
    }
    assert_eq!(
        names,
        vec!["RunStarted", "StageStarted", "RecordCreated", "StageFinished", "StageStarted", "RecordCreated", "StageFinished", "RunFinished"]
    );
}

#[tokio::test]
async fn test_unreachable_during_key_lookup_fails_whole_stage() {
    let (source, target) = (source(), MemOrg::new());
    target.set_unreachable(true);
    let engine = engine(&source, &target, Config::default());
    let mut actions = FieldActions::new();
    actions.set("Contact", "OwnerId", FieldAction::match_by_key("Username"));

    let plan = engine.analyze(vec![contact("003A", "001A"), contact("003B", "001A"), contact("003C", "001A")], &actions).await.unwrap();
    assert_eq!(plan.object_order, vec!["Contact"]);

    let mut events = engine.channel().subscribe();
    let result = engine.execute_migration(&plan).await.unwrap();

    assert!(matches!(&result.status, RunStatus::Aborted { error } if error.starts_with("target store unreachable")));
    let contacts = result.object("Contact").unwrap();
    assert_eq!(contacts.inserted, 0);
    assert_eq!(contacts.failed, 3);
    assert_eq!(contacts.errors.len(), 3);
    assert!(contacts.errors.iter().all(|e| e.kind == ErrorKind::RecordCreateFailed && e.message.starts_with("not attempted: target store unreachable")));
    assert_eq!(target.calls().creates, 0);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.event.str().to_string());
    }
    assert_eq!(names.iter().filter(|n| *n == "RecordFailed").count(), 3);
    assert!(names.contains(&"StageFinished".to_string()));
}

// ==================== deferred updates ====================

fn include_parent_account() -> FieldActions {
    let mut actions = FieldActions::new();
    actions.set("Account", "ParentId", FieldAction::Include);
    actions
}

#[tokio::test]
async fn test_self_reference_to_failed_parent_counts_as_update_failure() {
    let (source, target) = (source(), MemOrg::new());
    target.reject_when("Account", "Name", "Acme", "DUPLICATE_VALUE: duplicate name");
    let engine = engine(&source, &target, Config::default());

    let roots = vec![source.record("Account", "001A").unwrap(), source.record("Account", "001B").unwrap()];
    let plan = engine.analyze(roots, &include_parent_account()).await.unwrap();
    let result = engine.execute_migration(&plan).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    let accounts = result.object("Account").unwrap();
    assert_eq!(accounts.inserted, 1);
    assert_eq!(accounts.failed, 1);
    assert_eq!(accounts.updated, 0);
    assert_eq!(accounts.update_failed, 1);

    let blocked: Vec<_> = accounts.errors_of(ErrorKind::ParentNotCreated).collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].record, RecordKey::new("Account", "001B"));
    assert_eq!(blocked[0].field_name.as_deref(), Some("ParentId"));
    assert_eq!(blocked[0].message, "parent Account/001A was not created");
    assert!(target.update_log().is_empty());
}

#[tokio::test]
async fn test_rejected_deferred_update_keeps_create_counters() {
    let (source, target) = (source(), MemOrg::new());
    target.reject_field("Account", "ParentId", "INVALID_CROSS_REFERENCE_KEY: invalid parent");
    let engine = engine(&source, &target, Config::default());

    let roots = vec![source.record("Account", "001A").unwrap(), source.record("Account", "001B").unwrap()];
    let plan = engine.analyze(roots, &include_parent_account()).await.unwrap();
    let result = engine.execute_migration(&plan).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(!result.is_clean());
    let accounts = result.object("Account").unwrap();
    assert_eq!(accounts.inserted, 2);
    assert_eq!(accounts.failed, 0);
    assert_eq!(accounts.updated, 0);
    assert_eq!(accounts.update_failed, 1);
    assert_eq!(
        accounts.errors_of(ErrorKind::RecordUpdateFailed).map(|e| e.message.as_str()).collect::<Vec<_>>(),
        vec!["INVALID_CROSS_REFERENCE_KEY: invalid parent"]
    );
    assert_eq!(target.update_log().len(), 1);

    let child_id = result.target_id(&RecordKey::new("Account", "001B")).unwrap();
    assert!(!target.record("Account", child_id).unwrap().fields.contains_key("ParentId"));
}

// ==================== worker failure ====================

/// Target whose client crashes on one poisoned payload.
struct CrashingOrg {
    inner: MemOrg,
    poison: &'static str,
}

#[async_trait]
impl TargetStore for CrashingOrg {
    async fn create_many(
        &self,
        object_type: &str,
        payloads: Vec<Fields>,
    ) -> orgmigrate::Result<Vec<CreateOutcome>> {
        if payloads.iter().any(|p| p.get("Name") == Some(&json!(self.poison))) {
            panic!("store client crashed");
        }
        self.inner.create_many(object_type, payloads).await
    }

    async fn update_by_id(
        &self,
        object_type: &str,
        target_id: &str,
        fields: Fields,
    ) -> orgmigrate::Result<()> {
        self.inner.update_by_id(object_type, target_id, fields).await
    }

    async fn query_by_field(
        &self,
        object_type: &str,
        field: &str,
        value: &str,
    ) -> orgmigrate::Result<Option<TargetId>> {
        self.inner.query_by_field(object_type, field, value).await
    }
}

#[tokio::test]
async fn test_crashed_worker_keeps_sibling_outcomes() {
    let (source, target) = (source(), MemOrg::new());
    let mut config = Config::default();
    config.execution.batch_size = 1;
    config.execution.workers = 2;
    let engine = EngineBuilder::new()
        .config(config)
        .source(source.clone())
        .target(CrashingOrg {
            inner: target.clone(),
            poison: "Account 1",
        })
        .build()
        .unwrap();

    let roots = (1..=5).map(|i| SourceRecord::new("Account", format!("A{}", i)).with_field("Name", format!("Account {}", i))).collect();
    let plan = engine.analyze(roots, &FieldActions::new()).await.unwrap();
    let result = engine.execute_migration(&plan).await.unwrap();

    assert!(matches!(&result.status, RunStatus::Aborted { error } if error.starts_with("stage worker failed")));
    let accounts = result.object("Account").unwrap();
    assert_eq!(accounts.inserted, 4);
    assert_eq!(accounts.failed, 1);
    assert_eq!(accounts.errors[0].record, RecordKey::new("Account", "A1"));
    assert!(accounts.errors[0].message.starts_with("outcome unknown: stage worker failed"));
    assert_eq!(result.remapped.len(), 4);
    assert_eq!(target.count("Account"), 4);
}

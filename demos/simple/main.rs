use orgmigrate::{ChannelEvent, ChannelOptions, EngineBuilder, FieldActions, MemOrg, MigrationEvent, RelationshipDescriptor, SourceRecord};

fn source() -> MemOrg {
    let org = MemOrg::new();
    org.describe("Account", vec![RelationshipDescriptor::new("ParentId", ["Account"])]);
    org.describe(
        "Contact",
        vec![
            RelationshipDescriptor::new("AccountId", ["Account"]).required(),
            RelationshipDescriptor::new("OwnerId", ["User"]),
            RelationshipDescriptor::new("ReportsToId", ["Contact"]),
        ],
    );

    for record in SourceRecord::list_from_json(include_str!("./records.json")).unwrap() {
        org.insert(record);
    }
    org
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let source = source();
    let target = MemOrg::new();
    target.insert(SourceRecord::new("User", "005X").with_field("Username", "jdoe@example.com"));

    let engine = EngineBuilder::new().source(source.clone()).target(target.clone()).build().unwrap();

    ChannelEvent::channel(engine.channel(), ChannelOptions::default()).unwrap().on_failure(move |e| {
        println!("Failed: {:?}", e.event);
    });
    ChannelEvent::channel(engine.channel(), ChannelOptions::with_object_type("Contact")).unwrap().on_event(move |e| {
        if let MigrationEvent::RecordCreated {
            record,
            target_id,
        } = &e.event
        {
            println!("Contact created: {} -> {}", record, target_id);
        }
    });

    let actions = FieldActions::from_json(include_str!("./actions.json")).unwrap();
    let roots = source.records("Contact");

    let plan = engine.analyze(roots, &actions).await.unwrap();
    println!("{}", plan.summary());

    let result = engine.execute_migration(&plan).await.unwrap();
    println!("{}", result.summary());

    for contact in target.records("Contact") {
        println!("Target contact: {:#?}", contact.fields);
    }
}

use protobit::*;
use std::collections::BTreeMap;

#[prototype]
pub struct Gizmo {
    #[assert(min = 0, max = 100, default = 0)]
    pub count: i64,
    pub tags: Vec<String>,
}

fn store() -> Store {
    protobit::logger::init(protobit::log::LevelFilter::Warn);
    Store::open(Config::default()).unwrap()
}

fn file_config(dir: &tempfile::TempDir) -> Config {
    Config {
        yaml_root: dir.path().join("yaml"),
        scratch_root: dir.path().join("scratch"),
        lock_timeout_secs: 1,
        lock_poll_millis: 10,
        ..Config::default()
    }
}

fn count_rows(store: &Store, sql: &str) -> i64 {
    store.session().query("protobit", sql, &[], |row| Ok(row.get::<_, i64>(0).unwrap())).unwrap()[0]
}

fn tagged() -> Arc<Class> {
    Class::builder("Alpha")
        .attribute("id", Assertion::int().serial().optional())
        .attribute("tags", Assertion::array(Assertion::str()))
        .build()
        .unwrap()
}

#[test]
fn array_elements_are_stored_as_indexed_rows() {
    let store = store();
    let class = tagged();
    store.create_table(&class).unwrap();

    let mut alpha =
        Entity::construct(&class, [("name", Value::from("alpha")), ("tags", Value::from(vec!["x", "y"]))]).unwrap();
    store.save(&mut alpha).unwrap();
    assert_eq!(alpha.id(), &Value::Int(1));

    let names = store
        .session()
        .query("protobit", "SELECT name FROM alpha WHERE id = 1", &[], |row| Ok(row.get::<_, String>(0).unwrap()))
        .unwrap();
    assert_eq!(names, vec!["alpha".to_string()]);
    let children = store
        .session()
        .query(
            "protobit",
            "SELECT element_index, element_value FROM alpha_tags WHERE parent_id = 1 ORDER BY element_index",
            &[],
            |row| Ok((row.get::<_, i64>(0).unwrap(), row.get::<_, String>(1).unwrap())),
        )
        .unwrap();
    assert_eq!(children, vec![(0, "x".to_string()), (1, "y".to_string())]);

    let loaded = store.load(&class, &Value::Int(1)).unwrap();
    assert_eq!(loaded.get("tags").unwrap(), &Value::from(vec!["x", "y"]));
}

#[test]
fn count_is_bounded_and_defaults_to_zero() {
    let class = Class::builder("Counter")
        .attribute("count", Assertion::int().min(0.0).max(100.0).default(0))
        .build()
        .unwrap();
    let mut counter = Entity::construct(&class, [("name", Value::from("c"))]).unwrap();
    assert_eq!(counter.get("count").unwrap(), &Value::Int(0));
    assert_eq!(counter.set("count", 150).unwrap_err().kind(), ErrorKind::AssertFailed);
    counter.set("count", 50).unwrap();
    assert_eq!(counter.get("count").unwrap(), &Value::Int(50));
}

#[test]
fn nested_collections_round_trip() {
    let store = store();
    let class = Class::builder("Sheet")
        .attribute("matrix", Assertion::array(Assertion::array(Assertion::int())))
        .attribute("index", Assertion::hash(Assertion::array(Assertion::str())))
        .attribute("payload", Assertion::any().optional())
        .attribute("ratio", Assertion::float().default(0.5))
        .attribute("active", Assertion::boolean().default(true))
        .build()
        .unwrap();
    store.create_table(&class).unwrap();

    let matrix = Value::Array(vec![
        Value::from(Vec::<i64>::new()),
        Value::from(vec![7]),
        Value::from(vec![1, 2, 3]),
    ]);
    let mut index = BTreeMap::new();
    index.insert("empty".to_string(), Value::from(Vec::<String>::new()));
    index.insert("one".to_string(), Value::from(vec!["a"]));
    index.insert("many".to_string(), Value::from(vec!["b", "c", "d"]));
    let mut payload = BTreeMap::new();
    payload.insert("nested".to_string(), Value::from(vec![Value::from(1), Value::from("two")]));

    let mut sheet = Entity::construct(
        &class,
        [
            ("name", Value::from("s")),
            ("matrix", matrix.clone()),
            ("index", Value::Hash(index)),
            ("payload", Value::Hash(payload)),
        ],
    )
    .unwrap();
    store.save(&mut sheet).unwrap();
    let loaded = store.load(&class, sheet.id()).unwrap();
    assert_eq!(loaded, sheet);
    assert_eq!(loaded.get("matrix").unwrap(), &matrix);

    let mut empty = Entity::construct(&class, [("name", Value::from("e"))]).unwrap();
    store.save(&mut empty).unwrap();
    assert_eq!(store.load(&class, empty.id()).unwrap(), empty);
}

#[test]
fn resaving_keeps_id_and_replaces_link_rows() {
    let store = store();
    let class = tagged();
    store.create_table(&class).unwrap();
    let mut alpha =
        Entity::construct(&class, [("name", Value::from("a")), ("tags", Value::from(vec!["x", "y", "z"]))]).unwrap();
    store.save(&mut alpha).unwrap();
    let id = alpha.id().clone();
    let ctime = alpha.get("ctime").unwrap().clone();
    let mtime = alpha.get("mtime").unwrap().clone();

    store.save(&mut alpha).unwrap();
    assert_eq!(alpha.id(), &id);
    assert_eq!(alpha.get("ctime").unwrap(), &ctime);
    assert_ne!(alpha.get("mtime").unwrap(), &mtime);
    assert_eq!(store.count(&class).unwrap(), 1);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM alpha_tags"), 3);
}

#[test]
fn loads_never_see_stale_cache_entries() {
    let store = store();
    let class = Class::builder("Note")
        .attribute("body", Assertion::text().default(""))
        .cache_ttl(Duration::from_secs(300))
        .build()
        .unwrap();
    store.create_table(&class).unwrap();
    let mut note = Entity::construct(&class, [("name", Value::from("n")), ("body", Value::from("v1"))]).unwrap();
    store.save(&mut note).unwrap();
    let id = note.id().clone();
    assert_eq!(store.load(&class, &id).unwrap().get("body").unwrap(), &Value::from("v1"));

    note.set("body", "v2").unwrap();
    store.save(&mut note).unwrap();
    assert_eq!(store.load(&class, &id).unwrap().get("body").unwrap(), &Value::from("v2"));

    store.remove(&mut note).unwrap();
    assert_eq!(store.load(&class, &id).unwrap_err().kind(), ErrorKind::ObjectNotFound);
}

#[test]
fn failed_link_insert_rolls_back_the_whole_save() {
    let store = store();
    let class = tagged();
    store.create_table(&class).unwrap();
    let mut alpha = Entity::construct(&class, [("name", Value::from("before")), ("tags", Value::from(vec!["a"]))]).unwrap();
    store.save(&mut alpha).unwrap();
    let mtime = alpha.get("mtime").unwrap().clone();

    store
        .session()
        .execute_batch(
            "protobit",
            "CREATE TRIGGER no_boom BEFORE INSERT ON alpha_tags WHEN NEW.element_value = 'boom' \
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();
    alpha.set("name", "after").unwrap();
    alpha.set("tags", Value::from(vec!["b", "boom"])).unwrap();
    let err = store.save(&mut alpha).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionFailed);
    assert_eq!(err.root_cause().kind(), ErrorKind::DbQueryFailed);
    assert_eq!(alpha.get("mtime").unwrap(), &mtime);

    let stored = store.load(&class, alpha.id()).unwrap();
    assert_eq!(stored.name(), Some("before"));
    assert_eq!(stored.get("tags").unwrap(), &Value::from(vec!["a"]));
    assert_eq!(store.session().depth(), 0);
}

#[test]
fn round_robin_keeps_the_latest_rows() {
    let store = store();
    let class = Class::builder("Heartbeat").round_robin(3).build().unwrap();
    store.create_table(&class).unwrap();
    for i in 1..=5 {
        let mut beat = Entity::construct(&class, [("message", Value::from(format!("beat {i}")))]).unwrap();
        store.save(&mut beat).unwrap();
        assert_eq!(beat.id(), &Value::Int(i - 1));
    }
    assert_eq!(store.count(&class).unwrap(), 3);
    let messages: Vec<Value> = store
        .ids(&class)
        .unwrap()
        .iter()
        .map(|id| store.load(&class, id).unwrap().get("message").unwrap().clone())
        .collect();
    assert_eq!(messages, vec![Value::from("beat 3"), Value::from("beat 4"), Value::from("beat 5")]);
}

#[test]
fn flat_files_keep_snapshots_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(file_config(&dir)).unwrap();
    let class = Class::builder("Memo")
        .attribute("body", Assertion::text().default(""))
        .relational(false)
        .flat_file(true)
        .history(true)
        .build()
        .unwrap();

    let mut memo = Entity::construct(&class, [("name", Value::from("m")), ("body", Value::from("first"))]).unwrap();
    store.save_with_comment(&mut memo, Some("draft")).unwrap();
    memo.set("body", "second").unwrap();
    store.save_with_comment(&mut memo, Some("final")).unwrap();

    let path = store.flat_files().path(&class, memo.id()).unwrap();
    assert!(path.starts_with(dir.path().join("yaml").join("Memo")));
    let revisions = store.history().revisions(&path).unwrap();
    assert_eq!(revisions.iter().map(|r| r.comment.as_str()).collect::<Vec<_>>(), vec!["draft", "final"]);

    assert_eq!(store.load(&class, memo.id()).unwrap(), memo);
    assert_eq!(store.load_by_name(&class, "m").unwrap(), memo);
    assert_eq!(store.names(&class).unwrap(), vec!["m".to_string()]);
    assert_eq!(store.ids(&class).unwrap(), vec![memo.id().clone()]);

    store.remove(&mut memo).unwrap();
    assert!(!path.exists());
    assert_eq!(store.history().revisions(&path).unwrap().len(), 2);
    assert_eq!(store.count(&class).unwrap(), 0);
}

#[test]
fn held_lock_times_out_a_flat_file_save() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(file_config(&dir)).unwrap();
    let class = Class::builder("Locked").relational(false).flat_file(true).build().unwrap();
    let mut entity = Entity::construct(&class, [("name", Value::from("l"))]).unwrap();
    store.save(&mut entity).unwrap();

    let _held = store.flat_files().lock(&class, entity.id()).unwrap();
    let mtime = entity.get("mtime").unwrap().clone();
    let err = store.save(&mut entity).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockTimeoutExceeded);
    assert_eq!(entity.get("mtime").unwrap(), &mtime);
}

#[test]
fn schema_drift_is_reported_or_repaired() {
    let store = store();
    let v1 = Class::builder("Gadget").build().unwrap();
    store.create_table(&v1).unwrap();

    let v2 = Class::builder("Gadget")
        .attribute("color", Assertion::str().optional())
        .build()
        .unwrap();
    let err = store.create_table(&v2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

    let repaired = store.check_schema(&v2, ReconcileMode::AutoReconcile).unwrap();
    assert_eq!(repaired, vec![Drift::MissingColumn { column: "color".to_string() }]);
    assert!(store.check_schema(&v2, ReconcileMode::Strict).unwrap().is_empty());
}

#[test]
fn file_backed_databases_survive_reconnects() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config { sqlite_dir: Some(dir.path().to_path_buf()), ..Config::default() };
    let store = Store::open(config).unwrap();
    let class = tagged();
    store.create_table(&class).unwrap();
    let mut alpha = Entity::construct(&class, [("name", Value::from("kept"))]).unwrap();
    store.save(&mut alpha).unwrap();

    store.session().disconnect("protobit");
    assert!(store.name_exists(&class, "kept").unwrap());
    assert!(dir.path().join("protobit.sqlite3").exists());
}

#[test]
fn prototype_classes_persist_through_typed_accessors() {
    let store = store();
    let created = store.create_registered_tables().unwrap();
    assert!(created.iter().any(|class| class.name() == "Gizmo"));

    let mut gizmo = Gizmo::construct([("name", Value::from("g1"))]).unwrap();
    assert_eq!(gizmo.set_count(150).unwrap_err().kind(), ErrorKind::AssertFailed);
    gizmo.set_count(50).unwrap();
    gizmo.set_tags(vec!["x".to_string(), "y".to_string()]).unwrap();
    gizmo.save(&store).unwrap();

    let loaded = Gizmo::load(&store, gizmo.entity().id().clone()).unwrap();
    assert_eq!(loaded.count().unwrap(), 50);
    assert_eq!(loaded.tags().unwrap(), vec!["x".to_string(), "y".to_string()]);
    assert_eq!(Gizmo::load_by_name(&store, "g1").unwrap(), loaded);

    let spawned = Gizmo::spawn(&store, "fresh").unwrap();
    assert!(spawned.entity().id().is_null());
    assert_eq!(spawned.count().unwrap(), 0);

    let mut doomed = loaded;
    doomed.remove(&store).unwrap();
    assert!(Gizmo::ids(&store).unwrap().is_empty());
}

#[test]
fn round_robin_rows_keep_their_collections() {
    let store = store();
    let class = Class::builder("Trace")
        .attribute("tags", Assertion::array(Assertion::str()))
        .round_robin(3)
        .build()
        .unwrap();
    store.create_table(&class).unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let tags = Value::from(vec![format!("t{i}"), "x".to_string()]);
        let mut trace = Entity::construct(&class, [("tags", tags.clone())]).unwrap();
        store.save(&mut trace).unwrap();
        assert_eq!(store.load(&class, trace.id()).unwrap().get("tags").unwrap(), &tags);
        ids.push(trace.id().clone());
    }
    assert_eq!(store.ids(&class).unwrap(), ids[2..].to_vec());
    let first_kept = store.load(&class, &ids[2]).unwrap();
    assert_eq!(first_kept.get("tags").unwrap(), &Value::from(vec!["t2", "x"]));
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM trace_tags"), 6);
}

#[test]
fn flat_file_classes_assign_ids_on_first_save() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(file_config(&dir)).unwrap();
    let tickets = Class::builder("Ticket")
        .attribute("id", Assertion::int().serial().optional())
        .relational(false)
        .flat_file(true)
        .build()
        .unwrap();
    let mut first = Entity::construct(&tickets, [("name", Value::from("one"))]).unwrap();
    store.save(&mut first).unwrap();
    let mut second = Entity::construct(&tickets, [("name", Value::from("two"))]).unwrap();
    store.save(&mut second).unwrap();
    assert_eq!(first.id(), &Value::Int(1));
    assert_eq!(second.id(), &Value::Int(2));
    assert_eq!(store.load(&tickets, &Value::Int(2)).unwrap(), second);

    let labels = Class::builder("Label")
        .attribute("id", Assertion::str().optional())
        .relational(false)
        .flat_file(true)
        .build()
        .unwrap();
    let mut label = Entity::construct(&labels, [("name", Value::from("red"))]).unwrap();
    store.save(&mut label).unwrap();
    let id = label.id().as_str().unwrap().to_string();
    assert_eq!(id.len(), 36);
    assert_eq!(store.load(&labels, label.id()).unwrap(), label);
    assert_eq!(store.ids(&labels).unwrap(), vec![Value::from(id)]);
}

//! End-to-end scenarios through the public `redmap` surface

use chrono::{Duration, TimeZone, Utc};
use redmap::{
    EngineConfig, EntitySchema, Error, FieldDescriptor, ManualClock, MemoryStore,
    PersistenceEngine, Record, ScalarType, Value, CONFIG_FILE_NAME,
};
use std::sync::Arc;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn player_schema() -> EntitySchema {
    EntitySchema::builder("player")
        .generated_ids()
        .field(FieldDescriptor::scalar("handle", ScalarType::String).unique())
        .field(FieldDescriptor::scalar("score", ScalarType::I64).sorted(3, true))
        .field(FieldDescriptor::scalar("guild", ScalarType::String).indexed())
        .field(FieldDescriptor::set("badges", ScalarType::String))
        .field(FieldDescriptor::map("stats", ScalarType::String, ScalarType::F64))
        .field(FieldDescriptor::scalar("motto", ScalarType::String).nullable())
        .build()
        .unwrap()
}

fn player(handle: &str, score: i64, guild: &str) -> Record {
    Record::new("player")
        .with("handle", handle)
        .with("score", score)
        .with("guild", guild)
        .with("badges", Value::Set(vec!["new".into()]))
        .with("stats", Value::Map(vec![("kd".into(), 1.5f64.into())]))
}

#[test]
fn test_engine_from_config_file() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "default_generator = \"uuid\"\n\n[cache]\nenabled = true\ntimes_cache_clear = 10\nretain = 2\n",
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert!(config.cache.enabled);
    assert_eq!(config.cache.retain, 2);

    let engine = PersistenceEngine::open(MemoryStore::new().connect(), config).unwrap();
    engine.register(player_schema()).unwrap();

    let saved = engine.save(player("neo", 10, "zion")).unwrap();
    assert_eq!(saved.id().unwrap().len(), 36);
    let hit = engine.get("player", saved.id().unwrap()).unwrap().unwrap();
    assert!(Arc::ptr_eq(&hit, &saved));
    assert_eq!(engine.cache_stats().unwrap().hits, 1);
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[cache]\ntimes_cache_clear = 0\n").unwrap();
    assert!(matches!(EngineConfig::from_file(&path), Err(Error::Config(_))));
}

#[test]
fn test_leaderboard_lifecycle() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let engine = PersistenceEngine::builder(store.connect())
        .shared_clock(clock.clone())
        .schema(player_schema())
        .build()
        .unwrap();

    for (handle, score, guild) in [
        ("ann", 40, "red"),
        ("bob", 10, "blue"),
        ("cid", 30, "red"),
        ("dee", 50, "blue"),
        ("eve", 20, "red"),
    ] {
        engine.save(player(handle, score, guild)).unwrap();
        clock.advance(1_000);
    }

    // Top three survive the rank cap, best first
    let top = engine.range("player", "score", 0, -1).unwrap();
    let handles: Vec<&Value> = top.iter().map(|p| p.value("handle")).collect();
    assert_eq!(handles, vec![&Value::from("dee"), &Value::from("ann"), &Value::from("cid")]);
    assert_eq!(engine.rank("player", "score", "2").unwrap(), None);

    // Guild membership in join order
    assert_eq!(
        engine.index_ids("player", "guild", "red", 0, -1).unwrap(),
        vec!["1", "3", "5"]
    );

    // Handles are unique
    assert!(matches!(
        engine.save(player("ann", 99, "blue")),
        Err(Error::UniquenessConflict { .. })
    ));
    let ann = engine.unique("player", "handle", "ann").unwrap().unwrap();
    assert_eq!(ann.value("score"), &Value::I64(40));

    // Scores move in place; guilds do not
    engine.write_field("player", "1", "score", 5i64).unwrap();
    assert_eq!(engine.rank("player", "score", "1").unwrap(), Some(2));
    assert!(matches!(
        engine.write_field("player", "1", "guild", "blue"),
        Err(Error::ImmutableField { .. })
    ));
    engine
        .write_field("player", "1", "motto", "follow the white rabbit")
        .unwrap();
    assert_eq!(
        engine.get_field("player", "1", "motto").unwrap(),
        Some(Value::from("follow the white rabbit"))
    );

    // Timeline windows
    let first = engine.create_time("player", "1").unwrap().unwrap();
    assert_eq!(first, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
    let window = engine
        .created_between("player", first, first + Duration::seconds(3))
        .unwrap();
    assert_eq!(window.len(), 3);
    assert_eq!(engine.all_size("player").unwrap(), 5);

    // Leaving the game removes every trace
    engine.delete_by_id("player", "3").unwrap();
    assert_eq!(
        engine.index_ids("player", "guild", "red", 0, -1).unwrap(),
        vec!["1", "5"]
    );
    assert!(!engine.unique_exists("player", "handle", "cid").unwrap());
    assert_eq!(engine.all_size("player").unwrap(), 4);
    assert_eq!(engine.pending_writes(), 0);

    let removed = engine.delete_table("player").unwrap();
    assert!(removed > 0);
    assert!(store.keys().is_empty());
}

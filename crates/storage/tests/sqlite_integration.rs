use chrono::Duration;
use studio_core::model::{Session, SessionId, SessionStatus, TrainingConfig, TrainingConfigPatch};
use studio_core::time::fixed_now;
use storage::repository::{SessionRepository, SettingsRepository, StorageError};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn completed_session(offset_secs: i64, config: TrainingConfig) -> Session {
    let started = fixed_now() + Duration::seconds(offset_secs);
    let mut session = Session::begin(SessionId::generate(), config, started);
    session.mark_training().unwrap();
    session.complete(started + Duration::seconds(45)).unwrap();
    session
}

#[tokio::test]
async fn sqlite_roundtrip_preserves_config_and_times() {
    let repo = connect("memdb_session_roundtrip").await;

    let patch: TrainingConfigPatch = serde_json::from_str(
        r#"{ "training": { "epochs": 7 }, "dashboardLayout": { "columns": 3 } }"#,
    )
    .unwrap();
    let config = TrainingConfig::default().merged(&patch);
    let session = completed_session(0, config);

    repo.persist_session(&session).await.unwrap();
    let fetched = repo.get_session(session.id()).await.expect("fetch");

    assert_eq!(fetched.status(), SessionStatus::Completed);
    assert_eq!(fetched.started_at(), session.started_at());
    assert_eq!(fetched.ended_at(), session.ended_at());
    assert_eq!(fetched.config().training.epochs, 7);
    assert_eq!(
        fetched.config().extra.get("dashboardLayout"),
        session.config().extra.get("dashboardLayout")
    );
}

#[tokio::test]
async fn sqlite_persist_is_an_upsert_and_lists_newest_first() {
    let repo = connect("memdb_session_list").await;

    let first = completed_session(0, TrainingConfig::default());
    let second = completed_session(600, TrainingConfig::default());
    repo.persist_session(&first).await.unwrap();
    repo.persist_session(&second).await.unwrap();
    repo.persist_session(&second).await.unwrap();

    let listed = repo.list_sessions(10).await.unwrap();
    let ids: Vec<_> = listed.iter().map(Session::id).collect();
    assert_eq!(ids, vec![second.id(), first.id()]);

    let limited = repo.list_sessions(1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn sqlite_missing_session_is_not_found() {
    let repo = connect("memdb_session_missing").await;
    let err = repo.get_session(SessionId::generate()).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn sqlite_settings_are_key_value() {
    let repo = connect("memdb_settings").await;

    assert_eq!(repo.get_value("ai_training_config").await.unwrap(), None);
    repo.set_value("ai_training_config", "{}").await.unwrap();
    repo.set_value("ai_training_config", r#"{"training":{"epochs":3}}"#)
        .await
        .unwrap();

    let value = repo.get_value("ai_training_config").await.unwrap();
    assert_eq!(value.as_deref(), Some(r#"{"training":{"epochs":3}}"#));
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");
}

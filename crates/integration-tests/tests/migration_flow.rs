//! Migration applier end to end
//!
//! Real migration directory (tempdir) + real journal (SQLite file), wired the
//! way the CLI wires them.

use keel_core::application::Migrator;
use keel_core::domain::JournalTable;
use keel_core::error::{AppError, ErrorKind};
use keel_core::port::{MigrationJournal, UuidProvider};
use keel_infra_fs::FsMigrationSource;
use keel_infra_sql::{create_pool, Dialect, QueryRunner, Row, SqlMigrationJournal};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const USERS: (&str, &str) = (
    "20200511072746-create-users.sql",
    "CREATE TABLE users (\n  id INTEGER PRIMARY KEY,\n  email TEXT NOT NULL UNIQUE\n);\n",
);
const POSTS: (&str, &str) = (
    "20200511073348-create-posts.sql",
    "CREATE TABLE posts (\n  id INTEGER PRIMARY KEY,\n  user_id INTEGER NOT NULL REFERENCES users (id)\n);\n",
);
const INDEX: (&str, &str) = (
    "20200511073458-index-posts.sql",
    "CREATE INDEX posts_user_id ON posts (user_id);\n",
);
const BROKEN: (&str, &str) = (
    "20200511080000-broken.sql",
    "CREATE TABLE comments (id INTEGER PRIMARY KEY);\nINSERT INTO missing_table (id) VALUES (1);\n",
);

struct Fixture {
    tmp: TempDir,
    migrations: std::path::PathBuf,
    runner: Arc<QueryRunner>,
    journal: Arc<SqlMigrationJournal>,
}

impl Fixture {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let migrations = tmp.path().join("migrations");
        std::fs::create_dir(&migrations).unwrap();

        let url = format!("sqlite://{}?mode=rwc", tmp.path().join("app.db").display());
        let pool = create_pool(&url, 2).await.unwrap();
        let runner = Arc::new(QueryRunner::from_pool(pool, Dialect::Sqlite));
        let journal = Arc::new(SqlMigrationJournal::new(
            runner.clone(),
            JournalTable::default(),
        ));

        Self {
            tmp,
            migrations,
            runner,
            journal,
        }
    }

    fn write(&self, (name, body): (&str, &str)) {
        std::fs::write(self.migrations.join(name), body).unwrap();
    }

    fn migrator(&self) -> Migrator {
        Migrator::new(
            self.journal.clone(),
            Arc::new(FsMigrationSource::new(&self.migrations)),
            Arc::new(UuidProvider),
        )
    }

    async fn journal_versions(&self) -> Vec<String> {
        self.journal
            .journal_rows()
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.version.to_string())
            .collect()
    }

    async fn table_exists(&self, name: &str) -> bool {
        let rows = self
            .runner
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = $1",
                &[name.into()],
            )
            .await
            .unwrap();
        rows.iter()
            .any(|row| row.try_get::<String, _>("name").unwrap() == name)
    }
}

fn read(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name)).unwrap()
}

/// Scenario: three files, empty journal
#[tokio::test]
async fn test_three_files_apply_in_order() {
    let fx = Fixture::new().await;
    fx.write(USERS);
    fx.write(POSTS);
    fx.write(INDEX);

    let report = fx.migrator().migrate().await.unwrap();

    assert_eq!(report.applied.len(), 3);
    assert_eq!(
        fx.journal_versions().await,
        vec!["20200511072746", "20200511073348", "20200511073458"]
    );
    assert!(fx.table_exists("users").await);
    assert!(fx.table_exists("posts").await);
}

/// Scenario: a fourth, invalid file halts with the driver's message
#[tokio::test]
async fn test_invalid_fourth_file_halts() {
    let fx = Fixture::new().await;
    fx.write(USERS);
    fx.write(POSTS);
    fx.write(INDEX);
    fx.migrator().migrate().await.unwrap();

    fx.write(BROKEN);
    let err = fx.migrator().migrate().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transaction);
    assert_eq!(err.root().kind(), ErrorKind::Driver);
    assert_eq!(err.driver_message(), Some("no such table: missing_table"));
    assert_eq!(fx.journal_versions().await.len(), 3);
    // The part of the script that ran before the failure was rolled back too
    assert!(!fx.table_exists("comments").await);
}

/// Idempotence: a second run adds nothing
#[tokio::test]
async fn test_migrate_twice_adds_no_rows() {
    let fx = Fixture::new().await;
    fx.write(USERS);
    fx.write(POSTS);

    let first = fx.migrator().migrate().await.unwrap();
    let second = fx.migrator().migrate().await.unwrap();

    assert_eq!(first.applied.len(), 2);
    assert!(second.applied.is_empty());
    assert_eq!(fx.journal_versions().await.len(), 2);
}

/// Round trip: journal with A only, pending = {B}, B's body recorded verbatim
#[tokio::test]
async fn test_pending_then_apply_round_trip() {
    let fx = Fixture::new().await;
    fx.write(USERS);
    fx.migrator().migrate().await.unwrap();

    fx.write(POSTS);
    let pending = fx.migrator().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].version.as_str(), "20200511073348");

    fx.migrator().migrate().await.unwrap();

    let rows = fx.journal.journal_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].file_name, POSTS.0);
    assert_eq!(rows[1].body, read(&fx.migrations, POSTS.0));
}

/// Dry run: validated, rolled back, nothing but the journal table left
#[tokio::test]
async fn test_dry_run_leaves_no_trace() {
    let fx = Fixture::new().await;
    fx.write(USERS);
    fx.write(POSTS);

    let report = fx.migrator().dry_run().await.unwrap();

    let validated: Vec<&str> = report.validated.iter().map(|v| v.as_str()).collect();
    assert_eq!(validated, vec!["20200511072746", "20200511073348"]);
    assert!(report.rolled_back);
    assert!(fx.journal_versions().await.is_empty());
    assert!(!fx.table_exists("users").await);
    assert!(fx.table_exists("migrations").await);

    // The real run afterwards is unaffected
    assert_eq!(fx.migrator().migrate().await.unwrap().applied.len(), 2);
}

/// Dry run over a broken batch: error after rollback, nothing persisted
#[tokio::test]
async fn test_dry_run_failure_propagates() {
    let fx = Fixture::new().await;
    fx.write(USERS);
    fx.write(BROKEN);

    let err = fx.migrator().dry_run().await.unwrap_err();

    assert!(matches!(err, AppError::Transaction(_)));
    assert_eq!(err.driver_message(), Some("no such table: missing_table"));
    assert!(!fx.table_exists("users").await);
    assert!(fx.journal_versions().await.is_empty());
}

/// Two files with one version are refused before anything runs
#[tokio::test]
async fn test_duplicate_versions_refused() {
    let fx = Fixture::new().await;
    fx.write(USERS);
    fx.write(("20200511072746-also-users.sql", "CREATE TABLE other (id INTEGER);"));

    let err = fx.migrator().migrate().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Domain);
    assert!(!fx.table_exists("users").await);
    assert!(!fx.table_exists("other").await);
}

/// Migrations applied through a sandbox vanish when it closes
#[tokio::test]
async fn test_migrate_inside_sandbox() {
    let fx = Fixture::new().await;
    fx.write(USERS);
    fx.write(POSTS);

    let url = format!(
        "sqlite://{}?mode=rwc",
        fx.tmp.path().join("app.db").display()
    );
    let pool = create_pool(&url, 2).await.unwrap();
    let sandbox = Arc::new(QueryRunner::sandbox(&pool, Dialect::Sqlite).await.unwrap());
    let journal = Arc::new(SqlMigrationJournal::new(
        sandbox.clone(),
        JournalTable::default(),
    ));
    let migrator = Migrator::new(
        journal.clone(),
        Arc::new(FsMigrationSource::new(&fx.migrations)),
        Arc::new(UuidProvider),
    );

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.applied.len(), 2);
    assert_eq!(journal.journal_rows().await.unwrap().len(), 2);

    sandbox.close().await.unwrap();

    assert!(!fx.table_exists("users").await);
    assert!(!fx.table_exists("migrations").await);
}

/// Postgres: the classified error carries the driver's own message
///
/// Runs only when `KEEL_TEST_POSTGRES_URL` points at a scratch database.
/// Everything happens inside a sandbox, so the database is left untouched.
#[tokio::test]
async fn test_postgres_unknown_type_message() {
    let Ok(url) = std::env::var("KEEL_TEST_POSTGRES_URL") else {
        return;
    };

    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join(USERS.0), USERS.1).unwrap();
    std::fs::write(
        tmp.path().join("20200511080000-bad-type.sql"),
        "CREATE TABLE widgets (id INTEGER, kind no_such_type);",
    )
    .unwrap();

    let pool = create_pool(&url, 2).await.unwrap();
    let sandbox = Arc::new(QueryRunner::sandbox(&pool, Dialect::Postgres).await.unwrap());
    let journal = Arc::new(SqlMigrationJournal::new(
        sandbox.clone(),
        JournalTable::new("keel_test_journal").unwrap(),
    ));
    let migrator = Migrator::new(
        journal.clone(),
        Arc::new(FsMigrationSource::new(tmp.path())),
        Arc::new(UuidProvider),
    );

    let err = migrator.migrate().await.unwrap_err();

    assert_eq!(
        err.driver_message(),
        Some("type \"no_such_type\" does not exist")
    );
    assert_eq!(journal.journal_rows().await.unwrap().len(), 1);

    sandbox.close().await.unwrap();
}

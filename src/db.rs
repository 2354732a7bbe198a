use std::path::Path;
use std::time::Duration;

use anyhow::Result as AnyResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool, Transaction};
use tracing::{error, info, warn};

pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    let path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("database path is not valid UTF-8"))?;
    info!(target = "mealwise", event = "db_path", path = %db_path.display());

    let opts: SqliteConnectOptions = path_str
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "mealwise",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0,
        busy_timeout_ms = %busy.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target = "mealwise",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Readiness probe: a bounded number of pings with a fixed inter-ping delay.
/// Returns `true` once a ping succeeds; never blocks indefinitely.
pub async fn wait_until_ready(pool: &SqlitePool, max_pings: u32, ping_interval: Duration) -> bool {
    for attempt in 0..max_pings {
        match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => {
                info!(target = "mealwise", event = "db_ready", attempt);
                return true;
            }
            Err(e) => {
                warn!(target = "mealwise", event = "db_ping_failed", attempt, error = %e);
            }
        }
        if attempt + 1 < max_pings {
            tokio::time::sleep(ping_interval).await;
        }
    }
    false
}

/// Roll a transaction back, logging the rollback error rather than masking
/// whatever error put us on this path.
pub(crate) async fn rollback_quietly(tx: Transaction<'_, Sqlite>) {
    if let Err(rb) = tx.rollback().await {
        error!(target = "mealwise", event = "db_tx_rollback_failed", error = %rb);
    } else {
        warn!(target = "mealwise", event = "db_tx_rollback");
    }
}

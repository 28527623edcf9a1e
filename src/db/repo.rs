use super::model::{BookingRow, CacheStats, CategoryRow, ParticipantRow, ProductRow, RosterRow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url)
        .with_context(|| format!("failed to prepare database location {database_url}"))?;
    let in_memory = normalized.starts_with("sqlite::memory");

    // Foreign keys drive the participant cascade when a booking is pruned.
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(if in_memory {
            SqliteJournalMode::Memory
        } else {
            SqliteJournalMode::Wal
        })
        .synchronous(SqliteSynchronous::Full);

    let mut pool_options = SqlitePoolOptions::new();
    if in_memory {
        // Every connection to `sqlite::memory:` is its own database.
        pool_options = pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    let pool = pool_options.connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory and non-sqlite URLs untouched.
fn prepare_sqlite_url(url: &str) -> std::io::Result<String> {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return Ok(url.to_string());
    };
    if rest.starts_with(":memory") {
        return Ok(url.to_string());
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return Ok(url.to_string());
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    Ok(rebuilt)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// --- bookings & participants -------------------------------------------------

pub async fn upsert_booking_tx(
    tx: &mut Transaction<'_, Sqlite>,
    row: &BookingRow,
    window_key: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO bookings (id, eventId, startTime, endTime, customerId, title, canceled, \
             accepted, privateEvent, noShow, sourceIp, creationTime, creationAgent, productId, syncWindow) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
             eventId = excluded.eventId, startTime = excluded.startTime, endTime = excluded.endTime, \
             customerId = excluded.customerId, title = excluded.title, canceled = excluded.canceled, \
             accepted = excluded.accepted, privateEvent = excluded.privateEvent, noShow = excluded.noShow, \
             sourceIp = excluded.sourceIp, creationTime = excluded.creationTime, \
             creationAgent = excluded.creationAgent, productId = excluded.productId, \
             syncWindow = excluded.syncWindow",
    )
    .bind(&row.id)
    .bind(&row.event_id)
    .bind(&row.start_time)
    .bind(&row.end_time)
    .bind(&row.customer_id)
    .bind(&row.title)
    .bind(row.canceled)
    .bind(row.accepted)
    .bind(row.private_event)
    .bind(row.no_show)
    .bind(&row.source_ip)
    .bind(&row.creation_time)
    .bind(&row.creation_agent)
    .bind(&row.product_id)
    .bind(window_key)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to upsert booking {}", row.id))?;
    Ok(())
}

/// Participants carry no identity of their own; they are re-derived per booking.
pub async fn replace_participants_tx(
    tx: &mut Transaction<'_, Sqlite>,
    booking_id: &str,
    rows: &[ParticipantRow],
) -> Result<()> {
    sqlx::query("DELETE FROM participants WHERE bookingId = ?")
        .bind(booking_id)
        .execute(&mut **tx)
        .await?;
    for p in rows {
        sqlx::query(
            "INSERT INTO participants (bookingId, firstName, lastName, peopleCategory, pid) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(booking_id)
        .bind(&p.first_name)
        .bind(&p.last_name)
        .bind(&p.people_category)
        .bind(&p.pid)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Drop cached bookings the provider no longer returns anywhere in the synced
/// span. Their participants go with them through the foreign-key cascade.
pub async fn prune_unseen_tx(tx: &mut Transaction<'_, Sqlite>, keep_ids: &[String]) -> Result<u64> {
    let keep = serde_json::to_string(keep_ids)?;
    let res = sqlx::query("DELETE FROM bookings WHERE id NOT IN (SELECT value FROM json_each(?))")
        .bind(keep)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

/// Cached booking count per sync window key, oldest window first.
pub async fn bookings_per_window(pool: &Pool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT syncWindow, COUNT(*) FROM bookings GROUP BY syncWindow ORDER BY syncWindow",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// --- settings mirrors ----------------------------------------------------------

#[instrument(skip_all)]
pub async fn replace_people_categories(pool: &Pool, rows: &[CategoryRow]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM peopleCategories")
        .execute(&mut *tx)
        .await?;
    let mut inserted = 0;
    for c in rows {
        inserted += sqlx::query("INSERT OR REPLACE INTO peopleCategories (id, name) VALUES (?, ?)")
            .bind(&c.id)
            .bind(&c.name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

#[instrument(skip_all)]
pub async fn replace_products(pool: &Pool, rows: &[ProductRow]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM products").execute(&mut *tx).await?;
    let mut inserted = 0;
    for p in rows {
        inserted += sqlx::query("INSERT OR REPLACE INTO products (id, productCode, name) VALUES (?, ?, ?)")
            .bind(&p.id)
            .bind(&p.product_code)
            .bind(&p.name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

pub async fn list_product_names(pool: &Pool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT name FROM products WHERE name IS NOT NULL ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

pub async fn list_category_names(pool: &Pool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT name FROM peopleCategories ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

/// Resolve product display names to provider ids. Unknown names are ignored.
pub async fn product_ids_for_names(pool: &Pool, names: &[String]) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM products WHERE name IN (SELECT value FROM json_each(?)) ORDER BY id",
    )
    .bind(serde_json::to_string(names)?)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

pub async fn category_ids_for_names(pool: &Pool, names: &[String]) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM peopleCategories WHERE name IN (SELECT value FROM json_each(?)) ORDER BY id",
    )
    .bind(serde_json::to_string(names)?)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

// --- roster ------------------------------------------------------------------

/// Replace the roster; rows repeating an already inserted PID are ignored.
/// Returns the number of rows actually stored.
#[instrument(skip_all)]
pub async fn replace_roster(pool: &Pool, rows: &[RosterRow]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM onCampusPids")
        .execute(&mut *tx)
        .await?;
    let mut inserted = 0;
    for r in rows {
        inserted += sqlx::query(
            "INSERT OR IGNORE INTO onCampusPids (pid, firstName, lastName) VALUES (?, ?, ?)",
        )
        .bind(&r.pid)
        .bind(&r.first_name)
        .bind(&r.last_name)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

// --- refresh log -------------------------------------------------------------

pub async fn get_refreshed_at(pool: &Pool, source: &str) -> Result<Option<DateTime<Utc>>> {
    let at = sqlx::query_scalar::<_, DateTime<Utc>>("SELECT refreshedAt FROM refreshLog WHERE source = ?")
        .bind(source)
        .fetch_optional(pool)
        .await?;
    Ok(at)
}

pub async fn set_refreshed_at(pool: &Pool, source: &str, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "INSERT INTO refreshLog (source, refreshedAt) VALUES (?, ?) \
         ON CONFLICT(source) DO UPDATE SET refreshedAt = excluded.refreshedAt",
    )
    .bind(source)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn clear_refreshed_at(pool: &Pool, source: &str) -> Result<()> {
    sqlx::query("DELETE FROM refreshLog WHERE source = ?")
        .bind(source)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn clear_refresh_log(pool: &Pool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM refreshLog").execute(pool).await?;
    Ok(res.rows_affected())
}

// --- stats -------------------------------------------------------------------

async fn count_rows(pool: &Pool, sql: &'static str) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await?;
    Ok(n)
}

#[instrument(skip_all)]
pub async fn cache_stats(pool: &Pool) -> Result<CacheStats> {
    Ok(CacheStats {
        bookings: count_rows(pool, "SELECT COUNT(*) FROM bookings").await?,
        participants: count_rows(pool, "SELECT COUNT(*) FROM participants").await?,
        people_categories: count_rows(pool, "SELECT COUNT(*) FROM peopleCategories").await?,
        products: count_rows(pool, "SELECT COUNT(*) FROM products").await?,
        roster: count_rows(pool, "SELECT COUNT(*) FROM onCampusPids").await?,
    })
}

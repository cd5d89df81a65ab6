//! Optimization session persistence

use chrono::{DateTime, Utc};
use polish_common::api::OwnerId;
use polish_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::models::{Segment, Session};

fn parse_time(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptRecord(format!("{}: {}", column, e)))
}

async fn upsert_session_row(tx: &mut Transaction<'_, Sqlite>, session: &Session) -> Result<()> {
    let options = serde_json::to_string(&session.options)
        .map_err(|e| Error::Internal(format!("Failed to serialize options: {}", e)))?;
    let export = session
        .export
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize export: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO optimization_sessions (
            session_id, owner, title, options, status,
            created_at, updated_at, ended_at, export
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            status = excluded.status,
            updated_at = excluded.updated_at,
            ended_at = excluded.ended_at,
            export = excluded.export
        "#,
    )
    .bind(session.session_id.to_string())
    .bind(session.owner.as_str())
    .bind(&session.title)
    .bind(options)
    .bind(session.status.as_str())
    .bind(session.created_at.to_rfc3339())
    .bind(session.updated_at.to_rfc3339())
    .bind(session.ended_at.map(|dt| dt.to_rfc3339()))
    .bind(export)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn upsert_segment_row(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: Uuid,
    segment: &Segment,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO optimization_segments (
            session_id, segment_index, source, separator, status,
            result, error, attempts, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id, segment_index) DO UPDATE SET
            status = excluded.status,
            result = excluded.result,
            error = excluded.error,
            attempts = excluded.attempts,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(session_id.to_string())
    .bind(segment.index as i64)
    .bind(&segment.source)
    .bind(&segment.separator)
    .bind(segment.status.as_str())
    .bind(&segment.result)
    .bind(&segment.error)
    .bind(segment.attempts as i64)
    .bind(segment.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Save a session with every segment
pub async fn save_session(pool: &SqlitePool, session: &Session) -> Result<()> {
    let mut tx = pool.begin().await?;
    upsert_session_row(&mut tx, session).await?;
    for segment in &session.segments {
        upsert_segment_row(&mut tx, session.session_id, segment).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Save the session row and the listed segments only
pub async fn save_segments(pool: &SqlitePool, session: &Session, indices: &[usize]) -> Result<()> {
    let mut tx = pool.begin().await?;
    upsert_session_row(&mut tx, session).await?;
    for segment in indices.iter().filter_map(|&i| session.segments.get(i)) {
        upsert_segment_row(&mut tx, session.session_id, segment).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Load every session with its segments
pub async fn load_sessions(pool: &SqlitePool) -> Result<Vec<Session>> {
    let rows = sqlx::query(
        r#"
        SELECT session_id, owner, title, options, status,
               created_at, updated_at, ended_at, export
        FROM optimization_sessions
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        let session_id: String = row.get("session_id");
        let session_id = Uuid::parse_str(&session_id)
            .map_err(|e| Error::CorruptRecord(format!("session_id: {}", e)))?;

        let options: String = row.get("options");
        let options = serde_json::from_str(&options)
            .map_err(|e| Error::CorruptRecord(format!("options: {}", e)))?;

        let status: String = row.get("status");
        let status = status.parse().map_err(Error::CorruptRecord)?;

        let export: Option<String> = row.get("export");
        let export = export
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| Error::CorruptRecord(format!("export: {}", e)))?;

        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        let ended_at: Option<String> = row.get("ended_at");

        let segments = load_segments(pool, session_id).await?;

        sessions.push(Session::restored(
            session_id,
            OwnerId::from_digest(row.get::<String, _>("owner")),
            row.get("title"),
            options,
            status,
            segments,
            parse_time(&created_at, "created_at")?,
            parse_time(&updated_at, "updated_at")?,
            ended_at
                .map(|value| parse_time(&value, "ended_at"))
                .transpose()?,
            export,
        ));
    }

    Ok(sessions)
}

async fn load_segments(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<Segment>> {
    let rows = sqlx::query(
        r#"
        SELECT segment_index, source, separator, status, result, error, attempts, updated_at
        FROM optimization_segments
        WHERE session_id = ?
        ORDER BY segment_index
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let status: String = row.get("status");
            let updated_at: String = row.get("updated_at");
            Ok(Segment {
                index: row.get::<i64, _>("segment_index") as usize,
                source: row.get("source"),
                separator: row.get("separator"),
                status: status.parse().map_err(Error::CorruptRecord)?,
                result: row.get("result"),
                error: row.get("error"),
                attempts: row.get::<i64, _>("attempts") as u32,
                updated_at: parse_time(&updated_at, "updated_at")?,
            })
        })
        .collect()
}

/// Delete a session and its segments
pub async fn delete_session(pool: &SqlitePool, session_id: Uuid) -> Result<()> {
    let session_id = session_id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM optimization_segments WHERE session_id = ?")
        .bind(&session_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM optimization_sessions WHERE session_id = ?")
        .bind(&session_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

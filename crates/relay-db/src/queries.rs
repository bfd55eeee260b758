use crate::models::{MessageRow, SessionRow};
use crate::{Database, format_timestamp};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, created_at";

impl Database {
    // -- Sessions --

    /// Insert a new session owned by `user_id`. The id is generated here.
    pub fn create_session(&self, user_id: &str, title: &str) -> Result<SessionRow> {
        let now = format_timestamp(Utc::now());
        let row = SessionRow {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_sessions (id, user_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (&row.id, &row.user_id, &row.title, &row.created_at, &row.updated_at),
            )?;
            Ok(())
        })?;

        Ok(row)
    }

    /// Look up a session only if it belongs to `user_id`.
    pub fn get_session_for_user(&self, chat_id: &str, user_id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1 AND user_id = ?2");
            conn.query_row(&sql, [chat_id, user_id], session_from_row)
                .optional()
        })
    }

    /// The caller's most recently updated session, if any.
    pub fn latest_session_for_user(&self, user_id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC LIMIT 1"
            );
            conn.query_row(&sql, [user_id], session_from_row).optional()
        })
    }

    pub fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| query_sessions(conn, user_id))
    }

    /// Move `updated_at` forward to `now`. An older `now` leaves the row
    /// unchanged so the column never goes backwards.
    pub fn touch_session(&self, chat_id: &str, now: DateTime<Utc>) -> Result<()> {
        let ts = format_timestamp(now);
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE chat_sessions SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
                (chat_id, &ts),
            )?;
            if updated == 0 {
                return Err(anyhow!("Session not found: {}", chat_id));
            }
            Ok(())
        })
    }

    /// Delete a session row. When `user_id` is given, only a session owned by
    /// that user is removed. Returns the number of rows deleted.
    pub fn delete_session(&self, chat_id: &str, user_id: Option<&str>) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM chat_sessions WHERE id = ?1 AND (?2 IS NULL OR user_id = ?2)",
                rusqlite::params![chat_id, user_id],
            )?;
            Ok(deleted)
        })
    }

    // -- Messages --

    /// Append a message to an existing session. Fails if the session does not exist.
    pub fn insert_message(
        &self,
        chat_id: &str,
        role: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MessageRow> {
        let row = MessageRow {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: format_timestamp(created_at),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (id, chat_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (&row.id, &row.chat_id, &row.role, &row.content, &row.created_at),
            )?;
            Ok(())
        })?;

        Ok(row)
    }

    /// All messages of a session, oldest first. Ties keep insertion order.
    pub fn get_messages(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE chat_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([chat_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The `limit` most recent messages of a session, returned oldest first.
    /// `exclude_id` skips one message, typically the one just written.
    pub fn get_recent_messages(
        &self,
        chat_id: &str,
        limit: u32,
        exclude_id: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                     SELECT {MESSAGE_COLUMNS}, rowid AS seq FROM chat_messages
                     WHERE chat_id = ?1 AND (?3 IS NULL OR id != ?3)
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?2
                 )
                 ORDER BY created_at ASC, seq ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![chat_id, limit, exclude_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete every message of a session. With `user_id`, nothing is removed
    /// unless that user owns the session.
    pub fn delete_messages_for_session(&self, chat_id: &str, user_id: Option<&str>) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM chat_messages WHERE chat_id = ?1 AND (
                     ?2 IS NULL
                     OR EXISTS (SELECT 1 FROM chat_sessions WHERE id = ?1 AND user_id = ?2)
                 )",
                rusqlite::params![chat_id, user_id],
            )?;
            Ok(deleted)
        })
    }
}

fn query_sessions(conn: &Connection, user_id: &str) -> Result<Vec<SessionRow>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE user_id = ?1
         ORDER BY updated_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([user_id], session_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

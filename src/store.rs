//! Read-only access to the local message database.

use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Display name for messages authored by the local user.
pub const SELF_SENDER: &str = "You";
/// Display name when the handle is missing.
pub const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "message database at {path} is unavailable: {source}. \
         Grant Full Disk Access to your terminal so it can read the Messages database."
    )]
    Unavailable {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to query messages: {0}")]
    Query(#[from] rusqlite::Error),
}

/// One message as stored, before any interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRow {
    pub text: Option<String>,
    pub raw_timestamp: Option<i64>,
    pub sender: Option<String>,
    pub attributed_body: Option<Vec<u8>>,
    pub is_from_me: bool,
}

impl MessageRow {
    /// Name recorded against links from this message.
    pub fn sender_display(&self) -> &str {
        if self.is_from_me {
            SELF_SENDER
        } else {
            self.sender.as_deref().filter(|s| !s.is_empty()).unwrap_or(UNKNOWN_SENDER)
        }
    }
}

/// Restrict messages to one author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderFilter {
    /// Messages written by the local user.
    Me,
    /// Messages received from this exact handle.
    Handle(String),
}

impl SenderFilter {
    /// `me` and `you` (any case) select the local user; anything else is a handle.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.eq_ignore_ascii_case("me") || raw.eq_ignore_ascii_case("you") {
            Some(SenderFilter::Me)
        } else {
            Some(SenderFilter::Handle(raw.to_string()))
        }
    }
}

/// Default database location: `~/Library/Messages/chat.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Library")
        .join("Messages")
        .join("chat.db")
}

pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let unavailable = |source| StoreError::Unavailable {
            path: path.display().to_string(),
            source,
        };

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(unavailable)?;

        // Opening is lazy; touch the table so permission problems surface here
        conn.execute_batch("SELECT count(*) FROM message LIMIT 1;")
            .map_err(unavailable)?;

        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Messages at or after `cutoff` (store nanoseconds), newest first.
    pub fn fetch_rows(
        &self,
        cutoff: i64,
        filter: Option<&SenderFilter>,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let base = "SELECT message.text, message.date, handle.id, message.attributedBody, message.is_from_me
             FROM message
             LEFT JOIN handle ON message.handle_id = handle.ROWID
             WHERE message.date >= ?1";

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<MessageRow> {
            let is_from_me: Option<i64> = row.get(4)?;
            Ok(MessageRow {
                text: row.get(0)?,
                raw_timestamp: row.get(1)?,
                sender: row.get(2)?,
                attributed_body: row.get(3)?,
                is_from_me: is_from_me.unwrap_or(0) != 0,
            })
        };

        let rows = match filter {
            None => {
                let sql = format!("{} ORDER BY message.date DESC", base);
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![cutoff], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            Some(SenderFilter::Me) => {
                let sql = format!("{} AND message.is_from_me = 1 ORDER BY message.date DESC", base);
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![cutoff], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            Some(SenderFilter::Handle(handle)) => {
                let sql = format!(
                    "{} AND message.is_from_me = 0 AND handle.id = ?2 ORDER BY message.date DESC",
                    base
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![cutoff, handle], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        tracing::debug!(count = rows.len(), cutoff, "fetched message rows");
        Ok(rows)
    }
}

use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{Conversation, ConversationMessage, Hold, InboundMessage};

fn ts(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|_| Utc::now().naive_utc())
}

// ── Conversations ──

pub fn get_conversation(
    conn: &Connection,
    user_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<Conversation>> {
    let row = conn
        .query_row(
            "SELECT user_id, messages, last_activity, expires_at
             FROM conversations WHERE user_id = ?1 AND expires_at > ?2",
            params![user_id, ts(now)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((user_id, messages_json, last_activity, expires_at)) = row else {
        return Ok(None);
    };

    let messages: Vec<ConversationMessage> =
        serde_json::from_str(&messages_json).unwrap_or_default();

    Ok(Some(Conversation {
        user_id,
        messages,
        last_activity: parse_ts(&last_activity),
        expires_at: parse_ts(&expires_at),
    }))
}

pub fn save_conversation(conn: &Connection, conv: &Conversation) -> anyhow::Result<()> {
    let messages_json = serde_json::to_string(&conv.messages)?;
    conn.execute(
        "INSERT INTO conversations (user_id, messages, last_activity, expires_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
           messages = excluded.messages,
           last_activity = excluded.last_activity,
           expires_at = excluded.expires_at",
        params![
            conv.user_id,
            messages_json,
            ts(&conv.last_activity),
            ts(&conv.expires_at)
        ],
    )?;
    Ok(())
}

// ── Slot holds ──

fn parse_hold_row(row: &rusqlite::Row) -> rusqlite::Result<Hold> {
    Ok(Hold {
        slot_key: row.get(0)?,
        holder: row.get(1)?,
        token: row.get(2)?,
        created_at: parse_ts(&row.get::<_, String>(3)?),
        expires_at: parse_ts(&row.get::<_, String>(4)?),
    })
}

pub fn get_hold_by_slot(
    conn: &Connection,
    slot_key: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<Hold>> {
    let hold = conn
        .query_row(
            "SELECT slot_key, holder, token, created_at, expires_at
             FROM holds WHERE slot_key = ?1 AND expires_at > ?2",
            params![slot_key, ts(now)],
            parse_hold_row,
        )
        .optional()?;
    Ok(hold)
}

pub fn get_hold_by_token(
    conn: &Connection,
    token: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<Hold>> {
    let hold = conn
        .query_row(
            "SELECT slot_key, holder, token, created_at, expires_at
             FROM holds WHERE token = ?1 AND expires_at > ?2",
            params![token, ts(now)],
            parse_hold_row,
        )
        .optional()?;
    Ok(hold)
}

/// Drop an expired hold occupying `slot_key`, if any, so the key is free
/// for a conditional insert.
pub fn delete_expired_hold(
    conn: &Connection,
    slot_key: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM holds WHERE slot_key = ?1 AND expires_at <= ?2",
        params![slot_key, ts(now)],
    )?;
    Ok(())
}

/// Conditional insert: succeeds only when no row occupies the slot key.
/// Combined with the connection mutex this is the test-and-set that makes
/// hold creation race-free.
pub fn try_insert_hold(conn: &Connection, hold: &Hold) -> anyhow::Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO holds (slot_key, holder, token, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(slot_key) DO NOTHING",
        params![
            hold.slot_key,
            hold.holder,
            hold.token,
            ts(&hold.created_at),
            ts(&hold.expires_at)
        ],
    )?;
    Ok(inserted > 0)
}

/// Overwrite a hold unconditionally (same-holder refresh).
pub fn replace_hold(conn: &Connection, hold: &Hold) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO holds (slot_key, holder, token, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            hold.slot_key,
            hold.holder,
            hold.token,
            ts(&hold.created_at),
            ts(&hold.expires_at)
        ],
    )?;
    Ok(())
}

pub fn delete_hold_by_token(conn: &Connection, token: &str) -> anyhow::Result<usize> {
    let count = conn.execute("DELETE FROM holds WHERE token = ?1", params![token])?;
    Ok(count)
}

// ── Message queue ──

pub fn enqueue_message(
    conn: &Connection,
    user_id: &str,
    message: &InboundMessage,
    received_at: &NaiveDateTime,
    expires_at: &NaiveDateTime,
) -> anyhow::Result<()> {
    let payload = serde_json::to_string(message)?;
    conn.execute(
        "INSERT INTO message_queue (user_id, payload, received_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, payload, ts(received_at), ts(expires_at)],
    )?;
    Ok(())
}

pub fn queued_messages(
    conn: &Connection,
    user_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<InboundMessage>> {
    let mut stmt = conn.prepare(
        "SELECT payload FROM message_queue
         WHERE user_id = ?1 AND expires_at > ?2
         ORDER BY received_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![user_id, ts(now)], |row| row.get::<_, String>(0))?;

    let mut messages = vec![];
    for row in rows {
        if let Ok(msg) = serde_json::from_str::<InboundMessage>(&row?) {
            messages.push(msg);
        }
    }
    Ok(messages)
}

pub fn clear_queue(conn: &Connection, user_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM message_queue WHERE user_id = ?1",
        params![user_id],
    )?;
    Ok(())
}

// ── Flags (mutes, locks, scheduled markers, counters) ──

pub fn set_flag(
    conn: &Connection,
    key: &str,
    value: &str,
    expires_at: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO flags (key, value, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        params![key, value, ts(expires_at)],
    )?;
    Ok(())
}

pub fn get_flag(
    conn: &Connection,
    key: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM flags WHERE key = ?1 AND expires_at > ?2",
            params![key, ts(now)],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

/// Test-and-set: claim `key` only if no live row holds it. Used for the
/// per-user processing lock and the scheduled marker.
pub fn try_set_flag(
    conn: &Connection,
    key: &str,
    value: &str,
    expires_at: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    conn.execute(
        "DELETE FROM flags WHERE key = ?1 AND expires_at <= ?2",
        params![key, ts(now)],
    )?;
    let inserted = conn.execute(
        "INSERT INTO flags (key, value, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO NOTHING",
        params![key, value, ts(expires_at)],
    )?;
    Ok(inserted > 0)
}

pub fn delete_flag(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM flags WHERE key = ?1", params![key])?;
    Ok(())
}

/// Adjust an integer counter stored as a flag. Positive deltas refresh the
/// expiry; negative deltas keep it. The counter never goes below zero.
pub fn bump_counter(
    conn: &Connection,
    key: &str,
    delta: i64,
    expires_at: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<i64> {
    let current: i64 = get_flag(conn, key, now)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let next = (current + delta).max(0);

    if delta > 0 {
        set_flag(conn, key, &next.to_string(), expires_at)?;
    } else {
        conn.execute(
            "UPDATE flags SET value = ?2 WHERE key = ?1",
            params![key, next.to_string()],
        )?;
    }
    Ok(next)
}

// ── Image analysis notes ──

pub fn push_image_note(
    conn: &Connection,
    user_id: &str,
    content: &str,
    now: &NaiveDateTime,
    expires_at: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO image_notes (user_id, content, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, content, ts(now), ts(expires_at)],
    )?;
    Ok(())
}

pub fn image_notes(
    conn: &Connection,
    user_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT content FROM image_notes
         WHERE user_id = ?1 AND expires_at > ?2
         ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![user_id, ts(now)], |row| row.get::<_, String>(0))?;

    let mut notes = vec![];
    for row in rows {
        notes.push(row?);
    }
    Ok(notes)
}

pub fn clear_image_notes(conn: &Connection, user_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM image_notes WHERE user_id = ?1",
        params![user_id],
    )?;
    Ok(())
}

// ── Opportunistic cleanup ──

/// Delete expired rows everywhere. Called from the webhook path on live
/// traffic; there is no background sweeper.
pub fn purge_expired(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let now = ts(now);
    let mut total = 0;
    for table in ["conversations", "holds", "message_queue", "flags", "image_notes"] {
        total += conn.execute(
            &format!("DELETE FROM {table} WHERE expires_at <= ?1"),
            params![now],
        )?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Duration;

    fn setup() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    fn hold(slot_key: &str, holder: &str, token: &str, ttl_secs: i64) -> Hold {
        Hold {
            slot_key: slot_key.to_string(),
            holder: holder.to_string(),
            token: token.to_string(),
            created_at: now(),
            expires_at: now() + Duration::seconds(ttl_secs),
        }
    }

    #[test]
    fn test_hold_conditional_insert() {
        let conn = setup();
        let n = now();

        assert!(try_insert_hold(&conn, &hold("2025-06-16T14:00", "alice", "t1", 60)).unwrap());
        assert!(!try_insert_hold(&conn, &hold("2025-06-16T14:00", "bob", "t2", 60)).unwrap());

        let stored = get_hold_by_slot(&conn, "2025-06-16T14:00", &n).unwrap().unwrap();
        assert_eq!(stored.holder, "alice");
    }

    #[test]
    fn test_expired_hold_frees_slot() {
        let conn = setup();
        let n = now();

        assert!(try_insert_hold(&conn, &hold("2025-06-16T15:00", "alice", "t1", -1)).unwrap());
        assert!(get_hold_by_slot(&conn, "2025-06-16T15:00", &n).unwrap().is_none());

        delete_expired_hold(&conn, "2025-06-16T15:00", &n).unwrap();
        assert!(try_insert_hold(&conn, &hold("2025-06-16T15:00", "bob", "t2", 60)).unwrap());
    }

    #[test]
    fn test_flag_test_and_set() {
        let conn = setup();
        let n = now();
        let exp = n + Duration::seconds(30);

        assert!(try_set_flag(&conn, "lock:u1", "1", &exp, &n).unwrap());
        assert!(!try_set_flag(&conn, "lock:u1", "1", &exp, &n).unwrap());

        delete_flag(&conn, "lock:u1").unwrap();
        assert!(try_set_flag(&conn, "lock:u1", "1", &exp, &n).unwrap());
    }

    #[test]
    fn test_counter_bump() {
        let conn = setup();
        let n = now();
        let exp = n + Duration::hours(1);

        assert_eq!(bump_counter(&conn, "images_pending:u1", 2, &exp, &n).unwrap(), 2);
        assert_eq!(bump_counter(&conn, "images_pending:u1", -1, &exp, &n).unwrap(), 1);
        assert_eq!(bump_counter(&conn, "images_pending:u1", -5, &exp, &n).unwrap(), 0);
    }

    #[test]
    fn test_queue_roundtrip_in_order() {
        let conn = setup();
        let n = now();
        let exp = n + Duration::minutes(10);

        for i in 0..3 {
            let msg = InboundMessage {
                text: Some(format!("msg {i}")),
                image_count: 0,
            };
            enqueue_message(&conn, "u1", &msg, &(n + Duration::seconds(i)), &exp).unwrap();
        }

        let drained = queued_messages(&conn, "u1", &n).unwrap();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].text.as_deref(), Some("msg 0"));
        assert_eq!(drained[2].text.as_deref(), Some("msg 2"));

        clear_queue(&conn, "u1").unwrap();
        assert!(queued_messages(&conn, "u1", &n).unwrap().is_empty());
    }

    #[test]
    fn test_conversation_roundtrip_and_expiry() {
        let conn = setup();
        let n = now();

        let mut conv = Conversation::new("u1", n, Duration::days(7));
        conv.push(ConversationMessage::user("hello"), 20);
        save_conversation(&conn, &conv).unwrap();

        let loaded = get_conversation(&conn, "u1", &n).unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);

        // collapse the ttl and confirm check-on-read hides the row
        conv.expires_at = n - Duration::seconds(1);
        save_conversation(&conn, &conv).unwrap();
        assert!(get_conversation(&conn, "u1", &n).unwrap().is_none());
    }

    #[test]
    fn test_purge_expired() {
        let conn = setup();
        let n = now();

        try_insert_hold(&conn, &hold("2025-06-16T16:00", "a", "t1", -10)).unwrap();
        set_flag(&conn, "mute:u1", "1", &(n - Duration::seconds(1))).unwrap();
        assert_eq!(purge_expired(&conn, &n).unwrap(), 2);
    }
}

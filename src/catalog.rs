//! The local catalog: a persistent record of accounts, mailboxes and
//! message GUIDs, used to tell new messages from already-copied ones
//! between runs.
//!
//! Backed by SQLite. Writes are grouped per scan block or flag batch so a
//! crash leaves the stored UIDNEXT watermark consistent with the rows that
//! actually made it in.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

/// Accounts untouched for this long are dropped during maintenance.
const ACCOUNT_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// Migrations, applied in order; `PRAGMA user_version` records how many
/// have run.
const MIGRATIONS: &[&str] = &[
    "
    CREATE TABLE accounts (
        id          INTEGER PRIMARY KEY,
        hostname    TEXT NOT NULL,
        username    TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL,
        UNIQUE (hostname, username)
    );

    CREATE TABLE mailboxes (
        id          INTEGER PRIMARY KEY,
        account_id  INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        name        TEXT NOT NULL,
        delim       TEXT,
        attr        TEXT NOT NULL DEFAULT '',
        subscribed  INTEGER NOT NULL DEFAULT 0,
        uidvalidity INTEGER,
        uidnext     INTEGER,
        UNIQUE (account_id, name, uidvalidity)
    );

    CREATE TABLE messages (
        id          INTEGER PRIMARY KEY,
        mailbox_id  INTEGER NOT NULL REFERENCES mailboxes(id) ON DELETE CASCADE,
        uid         INTEGER NOT NULL,
        guid        TEXT NOT NULL,
        message_id  TEXT,
        rfc822_size INTEGER NOT NULL,
        internaldate INTEGER NOT NULL,
        flags       TEXT NOT NULL DEFAULT '',
        UNIQUE (mailbox_id, uid)
    );

    CREATE INDEX idx_messages_guid ON messages (guid);
    CREATE INDEX idx_messages_mailbox ON messages (mailbox_id);
    ",
];

/// One `mailboxes` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxRow {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub delim: Option<String>,
    pub attr: String,
    pub subscribed: bool,
    pub uidvalidity: Option<u32>,
    pub uidnext: Option<u32>,
}

/// One `messages` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRow {
    pub id: i64,
    pub mailbox_id: i64,
    pub uid: u32,
    pub guid: String,
    pub message_id: Option<String>,
    pub rfc822_size: u32,
    pub internaldate: i64,
    pub flags: String,
}

/// A message about to be catalogued by a scan.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub uid: u32,
    pub guid: String,
    pub message_id: Option<String>,
    pub rfc822_size: u32,
    pub internaldate: i64,
    pub flags: String,
}

pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Catalog> {
        let conn = Connection::open(path)?;
        // journal_mode replies with the resulting mode, so it cannot go
        // through execute()
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
        Self::setup(conn)
    }

    pub fn open_in_memory() -> Result<Catalog> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> Result<Catalog> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let version: i64 =
            conn.query_row("SELECT user_version FROM pragma_user_version", [], |r| {
                r.get(0)
            })?;
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            if (i as i64) < version {
                continue;
            }
            conn.execute_batch(migration)?;
        }
        conn.pragma_update(None, "user_version", MIGRATIONS.len() as i64)?;
        Ok(Catalog {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Find or create the account row for (hostname, username) and touch
    /// its last-used timestamp.
    pub fn intern_account(&self, hostname: &str, username: &str) -> Result<i64> {
        let conn = self.lock();
        let now = Utc::now().timestamp();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM accounts WHERE hostname = ?1 AND username = ?2",
                params![hostname, username],
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE accounts SET updated_at = ?1 WHERE id = ?2",
                    params![now, id],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO accounts (hostname, username, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![hostname, username, now],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    /// Post-run maintenance: drop accounts unused for more than 30 days,
    /// with everything hanging off them.
    pub fn maintenance(&self) -> Result<usize> {
        self.expire_accounts_before(Utc::now().timestamp() - ACCOUNT_MAX_AGE_SECS)
    }

    fn expire_accounts_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM accounts WHERE updated_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    /// Find or create the mailbox row for (account, name), refreshing the
    /// attributes the server just reported.
    pub fn upsert_mailbox(
        &self,
        account_id: i64,
        name: &str,
        delim: Option<&str>,
        attr: &str,
        subscribed: bool,
    ) -> Result<MailboxRow> {
        {
            let conn = self.lock();
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM mailboxes WHERE account_id = ?1 AND name = ?2
                     ORDER BY id DESC LIMIT 1",
                    params![account_id, name],
                    |r| r.get(0),
                )
                .optional()?;
            match existing {
                Some(id) => {
                    conn.execute(
                        "UPDATE mailboxes SET delim = ?1, attr = ?2, subscribed = ?3
                         WHERE id = ?4",
                        params![delim, attr, subscribed as i64, id],
                    )?;
                }
                None => {
                    conn.execute(
                        "INSERT INTO mailboxes (account_id, name, delim, attr, subscribed)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![account_id, name, delim, attr, subscribed as i64],
                    )?;
                }
            }
        }
        self.mailbox_by_name(account_id, name)?
            .ok_or_else(|| rusqlite::Error::QueryReturnedNoRows.into())
    }

    pub fn mailbox_by_name(&self, account_id: i64, name: &str) -> Result<Option<MailboxRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, account_id, name, delim, attr, subscribed, uidvalidity, uidnext
             FROM mailboxes WHERE account_id = ?1 AND name = ?2
             ORDER BY id DESC LIMIT 1",
            params![account_id, name],
            mailbox_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn mailbox(&self, mailbox_id: i64) -> Result<Option<MailboxRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, account_id, name, delim, attr, subscribed, uidvalidity, uidnext
             FROM mailboxes WHERE id = ?1",
            params![mailbox_id],
            mailbox_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Record a new UIDVALIDITY, dropping every cached message for the
    /// mailbox and resetting the UIDNEXT watermark in the same
    /// transaction.
    pub fn reset_mailbox_validity(&self, mailbox_id: i64, uidvalidity: u32) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE mailbox_id = ?1",
            params![mailbox_id],
        )?;
        tx.execute(
            "UPDATE mailboxes SET uidvalidity = ?1, uidnext = NULL WHERE id = ?2",
            params![uidvalidity, mailbox_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_mailbox_subscribed(&self, mailbox_id: i64, subscribed: bool) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE mailboxes SET subscribed = ?1 WHERE id = ?2",
            params![subscribed as i64, mailbox_id],
        )?;
        Ok(())
    }

    /// Drop catalog rows for mailboxes the server no longer lists.
    pub fn remove_mailboxes_except(&self, account_id: i64, keep: &[String]) -> Result<usize> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, name FROM mailboxes WHERE account_id = ?1")?;
        let rows = stmt
            .query_map(params![account_id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut removed = 0;
        for (id, name) in rows {
            if !keep.iter().any(|k| k == &name) {
                conn.execute("DELETE FROM mailboxes WHERE id = ?1", params![id])?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Store one scan block and advance the UIDNEXT watermark atomically,
    /// so a crash-resume skips past everything already catalogued.
    pub fn store_scan_block(
        &self,
        mailbox_id: i64,
        rows: &[NewMessage],
        next_uidnext: u32,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO messages
                 (mailbox_id, uid, guid, message_id, rfc822_size, internaldate, flags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in rows {
                insert.execute(params![
                    mailbox_id,
                    row.uid,
                    row.guid,
                    row.message_id,
                    row.rfc822_size,
                    row.internaldate,
                    row.flags,
                ])?;
            }
        }
        tx.execute(
            "UPDATE mailboxes SET uidnext = ?1 WHERE id = ?2",
            params![next_uidnext, mailbox_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Align cached flags for UIDs in `[lo, hi]` with what the server just
    /// reported. A catalogued UID in the range that the server did not
    /// return has been expunged server-side and is removed. Returns
    /// (updated, removed).
    pub fn apply_flag_refresh(
        &self,
        mailbox_id: i64,
        lo: u32,
        hi: u32,
        server: &[(u32, String)],
    ) -> Result<(usize, usize)> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let cached = {
            let mut stmt = tx.prepare(
                "SELECT uid, flags FROM messages
                 WHERE mailbox_id = ?1 AND uid >= ?2 AND uid <= ?3",
            )?;
            let rows = stmt
                .query_map(params![mailbox_id, lo, hi], |r| {
                    Ok((r.get::<_, u32>(0)?, r.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut updated = 0;
        let mut removed = 0;
        for (uid, old_flags) in cached {
            match server.iter().find(|(s_uid, _)| *s_uid == uid) {
                Some((_, new_flags)) => {
                    if *new_flags != old_flags {
                        tx.execute(
                            "UPDATE messages SET flags = ?1
                             WHERE mailbox_id = ?2 AND uid = ?3",
                            params![new_flags, mailbox_id, uid],
                        )?;
                        updated += 1;
                    }
                }
                None => {
                    tx.execute(
                        "DELETE FROM messages WHERE mailbox_id = ?1 AND uid = ?2",
                        params![mailbox_id, uid],
                    )?;
                    removed += 1;
                }
            }
        }
        tx.commit()?;
        Ok((updated, removed))
    }

    pub fn update_message_flags(&self, mailbox_id: i64, uid: u32, flags: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE messages SET flags = ?1 WHERE mailbox_id = ?2 AND uid = ?3",
            params![flags, mailbox_id, uid],
        )?;
        Ok(())
    }

    pub fn messages(&self, mailbox_id: i64) -> Result<Vec<MessageRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, mailbox_id, uid, guid, message_id, rfc822_size, internaldate, flags
             FROM messages WHERE mailbox_id = ?1 ORDER BY uid",
        )?;
        let rows = stmt
            .query_map(params![mailbox_id], message_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn message_count(&self, mailbox_id: i64) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE mailbox_id = ?1",
            params![mailbox_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn message_by_guid(&self, mailbox_id: i64, guid: &str) -> Result<Option<MessageRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, mailbox_id, uid, guid, message_id, rfc822_size, internaldate, flags
             FROM messages WHERE mailbox_id = ?1 AND guid = ?2
             ORDER BY uid LIMIT 1",
            params![mailbox_id, guid],
            message_row,
        )
        .optional()
        .map_err(Into::into)
    }
}

fn mailbox_row(r: &Row<'_>) -> rusqlite::Result<MailboxRow> {
    Ok(MailboxRow {
        id: r.get(0)?,
        account_id: r.get(1)?,
        name: r.get(2)?,
        delim: r.get(3)?,
        attr: r.get(4)?,
        subscribed: r.get::<_, i64>(5)? != 0,
        uidvalidity: r.get(6)?,
        uidnext: r.get(7)?,
    })
}

fn message_row(r: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: r.get(0)?,
        mailbox_id: r.get(1)?,
        uid: r.get(2)?,
        guid: r.get(3)?,
        message_id: r.get(4)?,
        rfc822_size: r.get(5)?,
        internaldate: r.get(6)?,
        flags: r.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::open_in_memory().unwrap()
    }

    fn sample(uid: u32, guid: &str) -> NewMessage {
        NewMessage {
            uid,
            guid: guid.to_string(),
            message_id: Some(format!("<{}@example.com>", guid)),
            rfc822_size: 1000 + uid,
            internaldate: 1_700_000_000,
            flags: "Seen".to_string(),
        }
    }

    #[test]
    fn accounts_are_unique_per_host_and_user() {
        let cat = catalog();
        let a = cat.intern_account("mail.example.com", "bob").unwrap();
        let b = cat.intern_account("mail.example.com", "bob").unwrap();
        let c = cat.intern_account("mail.example.com", "alice").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn mailbox_upsert_and_lookup() {
        let cat = catalog();
        let account = cat.intern_account("h", "u").unwrap();
        let mb = cat
            .upsert_mailbox(account, "INBOX", Some("/"), "", false)
            .unwrap();
        assert_eq!(mb.name, "INBOX");
        assert_eq!(mb.uidvalidity, None);

        let again = cat
            .upsert_mailbox(account, "INBOX", Some("/"), "Hasnochildren", true)
            .unwrap();
        assert_eq!(again.id, mb.id);
        assert!(again.subscribed);
        assert_eq!(again.attr, "Hasnochildren");
    }

    #[test]
    fn scan_block_moves_the_watermark() {
        let cat = catalog();
        let account = cat.intern_account("h", "u").unwrap();
        let mb = cat.upsert_mailbox(account, "INBOX", None, "", false).unwrap();
        cat.reset_mailbox_validity(mb.id, 7).unwrap();

        cat.store_scan_block(mb.id, &[sample(1, "g1"), sample(2, "g2")], 3)
            .unwrap();
        let row = cat.mailbox(mb.id).unwrap().unwrap();
        assert_eq!(row.uidvalidity, Some(7));
        assert_eq!(row.uidnext, Some(3));
        assert_eq!(cat.message_count(mb.id).unwrap(), 2);
        assert!(cat.message_by_guid(mb.id, "g1").unwrap().is_some());
        assert!(cat.message_by_guid(mb.id, "nope").unwrap().is_none());
    }

    #[test]
    fn validity_change_drops_every_row() {
        let cat = catalog();
        let account = cat.intern_account("h", "u").unwrap();
        let mb = cat.upsert_mailbox(account, "INBOX", None, "", false).unwrap();
        cat.reset_mailbox_validity(mb.id, 1).unwrap();
        cat.store_scan_block(mb.id, &[sample(1, "g1"), sample(2, "g2")], 3)
            .unwrap();

        cat.reset_mailbox_validity(mb.id, 2).unwrap();
        assert_eq!(cat.message_count(mb.id).unwrap(), 0);
        let row = cat.mailbox(mb.id).unwrap().unwrap();
        assert_eq!(row.uidvalidity, Some(2));
        assert_eq!(row.uidnext, None);
    }

    #[test]
    fn flag_refresh_updates_and_reaps() {
        let cat = catalog();
        let account = cat.intern_account("h", "u").unwrap();
        let mb = cat.upsert_mailbox(account, "INBOX", None, "", false).unwrap();
        cat.store_scan_block(
            mb.id,
            &[sample(1, "g1"), sample(2, "g2"), sample(3, "g3")],
            4,
        )
        .unwrap();

        // uid 1 unchanged, uid 2 gained a flag, uid 3 vanished server-side
        let server = vec![
            (1, "Seen".to_string()),
            (2, "Seen,Answered".to_string()),
        ];
        let (updated, removed) = cat.apply_flag_refresh(mb.id, 1, 3, &server).unwrap();
        assert_eq!((updated, removed), (1, 1));

        let messages = cat.messages(mb.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].flags, "Seen,Answered");
    }

    #[test]
    fn vanished_mailboxes_are_pruned() {
        let cat = catalog();
        let account = cat.intern_account("h", "u").unwrap();
        let inbox = cat.upsert_mailbox(account, "INBOX", None, "", false).unwrap();
        cat.upsert_mailbox(account, "Old", None, "", false).unwrap();
        cat.store_scan_block(inbox.id, &[sample(1, "g1")], 2).unwrap();

        let removed = cat
            .remove_mailboxes_except(account, &["INBOX".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(cat.mailbox_by_name(account, "Old").unwrap().is_none());
        assert!(cat.mailbox_by_name(account, "INBOX").unwrap().is_some());
    }

    #[test]
    fn stale_accounts_expire_with_their_data() {
        let cat = catalog();
        let account = cat.intern_account("h", "u").unwrap();
        let mb = cat.upsert_mailbox(account, "INBOX", None, "", false).unwrap();
        cat.store_scan_block(mb.id, &[sample(1, "g1")], 2).unwrap();

        // Not stale yet.
        assert_eq!(cat.maintenance().unwrap(), 0);

        // Age the account past the 30-day horizon.
        {
            let conn = cat.lock();
            conn.execute(
                "UPDATE accounts SET updated_at = ?1",
                params![Utc::now().timestamp() - ACCOUNT_MAX_AGE_SECS - 60],
            )
            .unwrap();
        }
        assert_eq!(cat.maintenance().unwrap(), 1);
        assert_eq!(cat.message_count(mb.id).unwrap(), 0);
        assert!(cat.mailbox(mb.id).unwrap().is_none());
    }
}

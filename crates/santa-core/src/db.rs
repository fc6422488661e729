// SQLite persistence layer for lists, participants, blacklists, and draws.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::draw::Blacklist;
use crate::model::{DrawItem, DrawRecord, Participant, SantaList};

/// SQLite-backed storage for everything the draw service keeps.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS lists (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                name    TEXT NOT NULL,
                created TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS participants (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                name    TEXT NOT NULL,
                list_id INTEGER NOT NULL REFERENCES lists(id)
            );

            CREATE TABLE IF NOT EXISTS blacklist_links (
                owner_id  INTEGER NOT NULL REFERENCES participants(id),
                target_id INTEGER NOT NULL REFERENCES participants(id),
                PRIMARY KEY (owner_id, target_id)
            );

            CREATE TABLE IF NOT EXISTS draws (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                list_id INTEGER NOT NULL REFERENCES lists(id),
                created TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS draw_items (
                draw_id     INTEGER NOT NULL REFERENCES draws(id),
                giver_id    INTEGER NOT NULL REFERENCES participants(id),
                receiver_id INTEGER NOT NULL REFERENCES participants(id),
                PRIMARY KEY (draw_id, giver_id)
            );

            CREATE INDEX IF NOT EXISTS idx_participants_list_id ON participants(list_id);
            CREATE INDEX IF NOT EXISTS idx_draws_created ON draws(created);
            CREATE INDEX IF NOT EXISTS idx_draws_list_id ON draws(list_id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Lists
    // ------------------------------------------------------------------

    pub fn create_list(&self, name: &str, created: DateTime<Utc>) -> Result<SantaList> {
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO lists (name, created) VALUES (?1, ?2) RETURNING id",
                params![name, format_timestamp(created)],
                |row| row.get(0),
            )
            .context("failed to insert list")?;
        Ok(SantaList {
            id,
            name: name.to_string(),
            created: truncate_timestamp(created),
        })
    }

    /// All lists, oldest first.
    pub fn lists(&self) -> Result<Vec<SantaList>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, created FROM lists ORDER BY id")
            .context("failed to prepare lists query")?;
        let lists = stmt
            .query_map([], list_from_row)
            .context("failed to query lists")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map list rows")?;
        Ok(lists)
    }

    pub fn get_list(&self, id: i64) -> Result<Option<SantaList>> {
        let conn = self.conn();
        query_list(&conn, id)
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    pub fn add_participant(&self, list_id: i64, name: &str) -> Result<Participant> {
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO participants (name, list_id) VALUES (?1, ?2) RETURNING id",
                params![name, list_id],
                |row| row.get(0),
            )
            .context("failed to insert participant")?;
        Ok(Participant {
            id,
            name: name.to_string(),
            list_id,
        })
    }

    /// Participants of a list ordered by id.
    pub fn participants(&self, list_id: i64) -> Result<Vec<Participant>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, list_id FROM participants WHERE list_id = ?1 ORDER BY id")
            .context("failed to prepare participants query")?;
        let participants = stmt
            .query_map(params![list_id], participant_from_row)
            .context("failed to query participants")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map participant rows")?;
        Ok(participants)
    }

    pub fn get_participant(&self, id: i64) -> Result<Option<Participant>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, list_id FROM participants WHERE id = ?1",
            params![id],
            participant_from_row,
        )
        .optional()
        .context("failed to query participant")
    }

    // ------------------------------------------------------------------
    // Blacklists
    // ------------------------------------------------------------------

    /// Participants `owner_id` must not give to, ordered by id.
    pub fn blacklist(&self, owner_id: i64) -> Result<Vec<Participant>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT p.id, p.name, p.list_id
                 FROM blacklist_links b JOIN participants p ON p.id = b.target_id
                 WHERE b.owner_id = ?1 ORDER BY p.id",
            )
            .context("failed to prepare blacklist query")?;
        let targets = stmt
            .query_map(params![owner_id], participant_from_row)
            .context("failed to query blacklist")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map blacklist rows")?;
        Ok(targets)
    }

    pub fn has_blacklist_link(&self, owner_id: i64, target_id: i64) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM blacklist_links WHERE owner_id = ?1 AND target_id = ?2)",
                params![owner_id, target_id],
                |row| row.get(0),
            )
            .context("failed to check blacklist link")?;
        Ok(exists)
    }

    /// Add `target_id` to the blacklist of `owner_id`. Re-adding an existing
    /// link is a no-op.
    pub fn add_blacklist_link(&self, owner_id: i64, target_id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO blacklist_links (owner_id, target_id) VALUES (?1, ?2)",
            params![owner_id, target_id],
        )
        .context("failed to insert blacklist link")?;
        Ok(())
    }

    /// Snapshot of what the draw generator needs for a list: participant ids
    /// in id order and each participant's exclusions. Participants without
    /// exclusions have no blacklist entry.
    pub fn draw_constraints(&self, list_id: i64) -> Result<(Vec<i64>, Blacklist<i64>)> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare("SELECT id FROM participants WHERE list_id = ?1 ORDER BY id")
            .context("failed to prepare participant id query")?;
        let ids = stmt
            .query_map(params![list_id], |row| row.get::<_, i64>(0))
            .context("failed to query participant ids")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map participant id rows")?;

        let mut stmt = conn
            .prepare(
                "SELECT b.owner_id, b.target_id
                 FROM blacklist_links b JOIN participants p ON p.id = b.owner_id
                 WHERE p.list_id = ?1",
            )
            .context("failed to prepare blacklist links query")?;
        let links = stmt
            .query_map(params![list_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })
            .context("failed to query blacklist links")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map blacklist link rows")?;

        let mut blacklist = Blacklist::new();
        for (owner, target) in links {
            blacklist
                .entry(owner)
                .or_insert_with(HashSet::new)
                .insert(target);
        }

        Ok((ids, blacklist))
    }

    // ------------------------------------------------------------------
    // Draws
    // ------------------------------------------------------------------

    /// Store a draw and all of its pairs in a single transaction. Either the
    /// whole draw is stored or nothing is.
    pub fn record_draw(
        &self,
        list_id: i64,
        created: DateTime<Utc>,
        pairs: &[(i64, i64)],
    ) -> Result<DrawRecord> {
        let mut conn = self.conn();
        let list = query_list(&conn, list_id)?
            .with_context(|| format!("list {list_id} does not exist"))?;

        let tx = conn.transaction().context("failed to begin draw transaction")?;
        let draw_id: i64 = tx
            .query_row(
                "INSERT INTO draws (list_id, created) VALUES (?1, ?2) RETURNING id",
                params![list_id, format_timestamp(created)],
                |row| row.get(0),
            )
            .context("failed to insert draw")?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO draw_items (draw_id, giver_id, receiver_id) VALUES (?1, ?2, ?3)",
                )
                .context("failed to prepare draw item insert")?;
            for (giver_id, receiver_id) in pairs {
                stmt.execute(params![draw_id, giver_id, receiver_id])
                    .context("failed to insert draw item")?;
            }
        }
        tx.commit().context("failed to commit draw")?;

        let mut items: Vec<DrawItem> = pairs
            .iter()
            .map(|&(giver_id, receiver_id)| DrawItem {
                draw_id,
                giver_id,
                receiver_id,
            })
            .collect();
        items.sort_by_key(|item| item.giver_id);

        Ok(DrawRecord {
            id: draw_id,
            created: truncate_timestamp(created),
            list_id,
            list,
            items,
        })
    }

    /// Up to `limit` draws of a list, newest first. Draws created at the same
    /// instant come back in reverse insertion order.
    pub fn latest_draws(&self, list_id: i64, limit: usize) -> Result<Vec<DrawRecord>> {
        let conn = self.conn();
        let Some(list) = query_list(&conn, list_id)? else {
            return Ok(vec![]);
        };

        let mut stmt = conn
            .prepare(
                "SELECT id, created FROM draws WHERE list_id = ?1
                 ORDER BY created DESC, id DESC LIMIT ?2",
            )
            .context("failed to prepare latest draws query")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let headers = stmt
            .query_map(params![list_id, limit], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query draws")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map draw rows")?;

        let mut items_stmt = conn
            .prepare(
                "SELECT draw_id, giver_id, receiver_id FROM draw_items
                 WHERE draw_id = ?1 ORDER BY giver_id",
            )
            .context("failed to prepare draw items query")?;

        let mut draws = Vec::with_capacity(headers.len());
        for (id, created) in headers {
            let items = items_stmt
                .query_map(params![id], |row| {
                    Ok(DrawItem {
                        draw_id: row.get(0)?,
                        giver_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                    })
                })
                .context("failed to query draw items")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map draw item rows")?;
            draws.push(DrawRecord {
                id,
                created: parse_timestamp(&created)?,
                list_id,
                list: list.clone(),
                items,
            });
        }

        Ok(draws)
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn query_list(conn: &Connection, id: i64) -> Result<Option<SantaList>> {
    conn.query_row(
        "SELECT id, name, created FROM lists WHERE id = ?1",
        params![id],
        list_from_row,
    )
    .optional()
    .context("failed to query list")
}

fn list_from_row(row: &Row<'_>) -> rusqlite::Result<SantaList> {
    let created: String = row.get(2)?;
    let created = DateTime::parse_from_rfc3339(&created)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(SantaList {
        id: row.get(0)?,
        name: row.get(1)?,
        created,
    })
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        name: row.get(1)?,
        list_id: row.get(2)?,
    })
}

/// Fixed-width UTC timestamps so lexical order matches chronological order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp {text:?}"))
}

/// The value a timestamp reads back as after a round trip through storage.
fn truncate_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    parse_timestamp(&format_timestamp(ts)).unwrap_or(ts)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory db should open")
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    /// A list with four participants, returning (list, participant ids).
    fn seeded_list(db: &Database) -> (SantaList, Vec<i64>) {
        let list = db.create_list("Family", at(0)).unwrap();
        let ids = ["Pierre", "Paul", "Jacques", "Michel"]
            .iter()
            .map(|name| db.add_participant(list.id, name).unwrap().id)
            .collect();
        (list, ids)
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        for expected in ["blacklist_links", "draw_items", "draws", "lists", "participants"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn create_and_load_lists() {
        let db = test_db();
        let first = db.create_list("Family", at(0)).unwrap();
        let second = db.create_list("Office", at(10)).unwrap();
        assert!(second.id > first.id);

        let lists = db.lists().unwrap();
        assert_eq!(lists, vec![first.clone(), second]);
        assert_eq!(db.get_list(first.id).unwrap(), Some(first));
        assert_eq!(db.get_list(999).unwrap(), None);
    }

    #[test]
    fn created_timestamp_round_trips() {
        let db = test_db();
        let created = at(0) + Duration::microseconds(123_456);
        let list = db.create_list("Family", created).unwrap();
        assert_eq!(list.created, created);
        assert_eq!(db.get_list(list.id).unwrap().unwrap().created, created);
    }

    #[test]
    fn participants_scoped_to_list() {
        let db = test_db();
        let (family, ids) = seeded_list(&db);
        let office = db.create_list("Office", at(1)).unwrap();
        db.add_participant(office.id, "Alice").unwrap();

        let members = db.participants(family.id).unwrap();
        assert_eq!(members.iter().map(|p| p.id).collect::<Vec<_>>(), ids);
        assert_eq!(members[0].name, "Pierre");
        assert!(members.iter().all(|p| p.list_id == family.id));
        assert_eq!(db.participants(office.id).unwrap().len(), 1);
    }

    #[test]
    fn get_participant_missing_is_none() {
        let db = test_db();
        assert_eq!(db.get_participant(42).unwrap(), None);
    }

    #[test]
    fn participant_requires_existing_list() {
        let db = test_db();
        assert!(db.add_participant(42, "Nobody").is_err());
    }

    #[test]
    fn blacklist_links_round_trip() {
        let db = test_db();
        let (_, ids) = seeded_list(&db);

        assert!(!db.has_blacklist_link(ids[0], ids[1]).unwrap());
        db.add_blacklist_link(ids[0], ids[1]).unwrap();
        db.add_blacklist_link(ids[0], ids[2]).unwrap();
        assert!(db.has_blacklist_link(ids[0], ids[1]).unwrap());
        // Links are directed.
        assert!(!db.has_blacklist_link(ids[1], ids[0]).unwrap());

        let blacklist = db.blacklist(ids[0]).unwrap();
        assert_eq!(
            blacklist.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![ids[1], ids[2]]
        );
        assert!(db.blacklist(ids[3]).unwrap().is_empty());
    }

    #[test]
    fn add_blacklist_link_is_idempotent() {
        let db = test_db();
        let (_, ids) = seeded_list(&db);
        db.add_blacklist_link(ids[0], ids[1]).unwrap();
        db.add_blacklist_link(ids[0], ids[1]).unwrap();
        assert_eq!(db.blacklist(ids[0]).unwrap().len(), 1);
    }

    #[test]
    fn draw_constraints_snapshot() {
        let db = test_db();
        let (list, ids) = seeded_list(&db);
        db.add_blacklist_link(ids[0], ids[1]).unwrap();
        db.add_blacklist_link(ids[2], ids[3]).unwrap();

        // Another list's links must not leak in.
        let other = db.create_list("Other", at(1)).unwrap();
        let a = db.add_participant(other.id, "A").unwrap();
        let b = db.add_participant(other.id, "B").unwrap();
        db.add_blacklist_link(a.id, b.id).unwrap();

        let (participants, blacklist) = db.draw_constraints(list.id).unwrap();
        assert_eq!(participants, ids);
        assert_eq!(blacklist.len(), 2);
        assert_eq!(blacklist[&ids[0]], HashSet::from([ids[1]]));
        assert_eq!(blacklist[&ids[2]], HashSet::from([ids[3]]));
    }

    #[test]
    fn draw_constraints_for_empty_list() {
        let db = test_db();
        let list = db.create_list("Empty", at(0)).unwrap();
        let (participants, blacklist) = db.draw_constraints(list.id).unwrap();
        assert!(participants.is_empty());
        assert!(blacklist.is_empty());
    }

    #[test]
    fn record_draw_stores_all_items() {
        let db = test_db();
        let (list, ids) = seeded_list(&db);
        let pairs = vec![(ids[3], ids[0]), (ids[0], ids[2]), (ids[2], ids[1]), (ids[1], ids[3])];

        let draw = db.record_draw(list.id, at(60), &pairs).unwrap();
        assert_eq!(draw.list, list);
        assert_eq!(draw.list_id, list.id);
        assert_eq!(draw.created, at(60));
        assert_eq!(draw.items.len(), 4);
        assert!(draw.items.windows(2).all(|w| w[0].giver_id < w[1].giver_id));
        assert_eq!(draw.receiver_of(ids[0]), Some(ids[2]));

        let stored = db.latest_draws(list.id, 5).unwrap();
        assert_eq!(stored, vec![draw]);
    }

    #[test]
    fn record_draw_is_atomic() {
        let db = test_db();
        let (list, ids) = seeded_list(&db);
        // Second pair repeats a giver, violating the primary key.
        let pairs = vec![(ids[0], ids[1]), (ids[0], ids[2])];

        assert!(db.record_draw(list.id, at(5), &pairs).is_err());
        assert!(db.latest_draws(list.id, 5).unwrap().is_empty());

        let conn = db.conn();
        let items: i64 = conn
            .query_row("SELECT COUNT(*) FROM draw_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(items, 0);
    }

    #[test]
    fn record_draw_for_missing_list_fails() {
        let db = test_db();
        assert!(db.record_draw(7, at(0), &[]).is_err());
    }

    #[test]
    fn latest_draws_newest_first_and_limited() {
        let db = test_db();
        let (list, ids) = seeded_list(&db);
        let pairs = vec![(ids[0], ids[1]), (ids[1], ids[0])];

        let mut recorded = Vec::new();
        for minute in 0..7 {
            recorded.push(db.record_draw(list.id, at(minute * 60), &pairs).unwrap().id);
        }

        let latest = db.latest_draws(list.id, 5).unwrap();
        let latest_ids: Vec<i64> = latest.iter().map(|d| d.id).collect();
        let expected: Vec<i64> = recorded.iter().rev().take(5).copied().collect();
        assert_eq!(latest_ids, expected);
        assert!(latest.windows(2).all(|w| w[0].created >= w[1].created));
    }

    #[test]
    fn latest_draws_same_instant_ordered_by_id() {
        let db = test_db();
        let (list, ids) = seeded_list(&db);
        let pairs = vec![(ids[0], ids[1]), (ids[1], ids[0])];
        let first = db.record_draw(list.id, at(0), &pairs).unwrap();
        let second = db.record_draw(list.id, at(0), &pairs).unwrap();

        let latest = db.latest_draws(list.id, 5).unwrap();
        assert_eq!(latest[0].id, second.id);
        assert_eq!(latest[1].id, first.id);
    }

    #[test]
    fn latest_draws_unknown_list_is_empty() {
        let db = test_db();
        assert!(db.latest_draws(99, 5).unwrap().is_empty());
    }

    #[test]
    fn latest_draws_scoped_to_list() {
        let db = test_db();
        let (family, ids) = seeded_list(&db);
        let office = db.create_list("Office", at(1)).unwrap();
        db.record_draw(family.id, at(2), &[(ids[0], ids[1]), (ids[1], ids[0])])
            .unwrap();

        assert!(db.latest_draws(office.id, 5).unwrap().is_empty());
        assert_eq!(db.latest_draws(family.id, 5).unwrap().len(), 1);
    }

    #[test]
    fn foreign_keys_enforced() {
        let db = test_db();
        let (_, ids) = seeded_list(&db);
        assert!(db.add_blacklist_link(ids[0], 9999).is_err());
    }
}

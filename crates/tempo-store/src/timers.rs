use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tempo_core::ids::{TimerId, UserId};
use tempo_core::protocol::TimerPayload;
use tempo_core::timer::TimerStatus;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One stored timer. `started_at` is present only while the timer is
/// running; a stopped timer always has it cleared.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimerRow {
    pub id: TimerId,
    pub user_id: UserId,
    pub status: TimerStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TimerRow> for TimerPayload {
    fn from(row: &TimerRow) -> Self {
        Self {
            id: row.id.clone(),
            status: row.status,
            started_at: row.started_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct TimerRepo {
    db: Database,
}

impl TimerRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write the canonical state for a timer. Last writer wins: the whole
    /// row is overwritten, keyed by timer id, in a single statement, so
    /// two concurrent writers can never interleave a hybrid row.
    /// `updated_at` is always server time.
    #[instrument(skip(self), fields(timer_id = %id, user_id = %user_id, status = %status))]
    pub fn upsert(
        &self,
        id: &TimerId,
        user_id: &UserId,
        status: TimerStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<TimerRow, StoreError> {
        let updated_at = Utc::now();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO timers (id, user_id, status, started_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    user_id = excluded.user_id,
                    status = excluded.status,
                    started_at = excluded.started_at,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    id.as_str(),
                    user_id.as_str(),
                    status.to_string(),
                    started_at.map(|t| t.to_rfc3339()),
                    updated_at.to_rfc3339(),
                ],
            )?;

            Ok(TimerRow {
                id: id.clone(),
                user_id: user_id.clone(),
                status,
                started_at,
                updated_at,
            })
        })
    }

    /// Read one timer by id.
    #[instrument(skip(self), fields(timer_id = %id))]
    pub fn get(&self, id: &TimerId) -> Result<Option<TimerRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, status, started_at, updated_at
                 FROM timers WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_timer(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Most recently updated timer for a user, if any.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn latest_for_user(&self, user_id: &UserId) -> Result<Option<TimerRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, status, started_at, updated_at
                 FROM timers WHERE user_id = ?1
                 ORDER BY updated_at DESC LIMIT 1",
            )?;
            let mut rows = stmt.query([user_id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_timer(row)?)),
                None => Ok(None),
            }
        })
    }
}

fn row_to_timer(row: &rusqlite::Row<'_>) -> Result<TimerRow, StoreError> {
    let status_str: String = row_helpers::get(row, 2, "timers", "status")?;
    let started_raw: Option<String> = row_helpers::get_opt(row, 3, "timers", "started_at")?;
    let updated_raw: String = row_helpers::get(row, 4, "timers", "updated_at")?;

    Ok(TimerRow {
        id: TimerId::from_raw(row_helpers::get::<String>(row, 0, "timers", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "timers", "user_id")?),
        status: row_helpers::parse_enum(&status_str, "timers", "status")?,
        started_at: started_raw
            .map(|raw| row_helpers::parse_timestamp(&raw, "timers", "started_at"))
            .transpose()?,
        updated_at: row_helpers::parse_timestamp(&updated_raw, "timers", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (TimerRepo, TimerId, UserId) {
        let db = Database::in_memory().unwrap();
        (
            TimerRepo::new(db),
            TimerId::from_raw("t1"),
            UserId::from_raw("u1"),
        )
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    #[test]
    fn upsert_creates_row() {
        let (repo, t1, u1) = setup();
        let started = ts("2024-01-01T00:00:00Z");

        let row = repo.upsert(&t1, &u1, TimerStatus::Running, Some(started)).unwrap();
        assert_eq!(row.id, t1);
        assert_eq!(row.status, TimerStatus::Running);
        assert_eq!(row.started_at, Some(started));

        let fetched = repo.get(&t1).unwrap().unwrap();
        assert_eq!(fetched.user_id, u1);
        assert_eq!(fetched.status, TimerStatus::Running);
        assert_eq!(fetched.started_at, Some(started));
    }

    #[test]
    fn upsert_overwrites_whole_row() {
        let (repo, t1, u1) = setup();
        repo.upsert(&t1, &u1, TimerStatus::Running, Some(ts("2024-01-01T00:00:00Z")))
            .unwrap();
        repo.upsert(&t1, &u1, TimerStatus::Running, Some(ts("2024-06-01T12:00:00Z")))
            .unwrap();

        let fetched = repo.get(&t1).unwrap().unwrap();
        assert_eq!(fetched.started_at, Some(ts("2024-06-01T12:00:00Z")));
    }

    #[test]
    fn stop_clears_started_at() {
        let (repo, t1, u1) = setup();
        repo.upsert(&t1, &u1, TimerStatus::Running, Some(ts("2024-01-01T00:00:00Z")))
            .unwrap();
        repo.upsert(&t1, &u1, TimerStatus::Stopped, None).unwrap();

        let fetched = repo.get(&t1).unwrap().unwrap();
        assert_eq!(fetched.status, TimerStatus::Stopped);
        assert!(fetched.started_at.is_none());
    }

    #[test]
    fn repeated_stop_is_idempotent() {
        let (repo, t1, u1) = setup();
        repo.upsert(&t1, &u1, TimerStatus::Stopped, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        repo.upsert(&t1, &u1, TimerStatus::Stopped, None).unwrap();

        let fetched = repo.get(&t1).unwrap().unwrap();
        assert_eq!(fetched.status, TimerStatus::Stopped);
        assert!(fetched.started_at.is_none());
    }

    #[test]
    fn updated_at_advances_across_writes() {
        let (repo, t1, u1) = setup();
        let first = repo.upsert(&t1, &u1, TimerStatus::Running, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = repo.upsert(&t1, &u1, TimerStatus::Stopped, None).unwrap();

        assert!(second.updated_at > first.updated_at);
        let fetched = repo.get(&t1).unwrap().unwrap();
        assert_eq!(fetched.updated_at, second.updated_at);
    }

    #[test]
    fn get_missing_returns_none() {
        let (repo, _, _) = setup();
        assert!(repo.get(&TimerId::from_raw("missing")).unwrap().is_none());
    }

    #[test]
    fn latest_for_user_empty() {
        let (repo, _, u1) = setup();
        assert!(repo.latest_for_user(&u1).unwrap().is_none());
    }

    #[test]
    fn latest_for_user_picks_most_recent() {
        let (repo, _, u1) = setup();
        repo.upsert(&TimerId::from_raw("t-old"), &u1, TimerStatus::Stopped, None)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        repo.upsert(&TimerId::from_raw("t-new"), &u1, TimerStatus::Running, None)
            .unwrap();

        let latest = repo.latest_for_user(&u1).unwrap().unwrap();
        assert_eq!(latest.id.as_str(), "t-new");
    }

    #[test]
    fn latest_for_user_ignores_other_users() {
        let (repo, t1, u1) = setup();
        repo.upsert(&t1, &u1, TimerStatus::Running, None).unwrap();

        let other = UserId::from_raw("u2");
        assert!(repo.latest_for_user(&other).unwrap().is_none());
    }

    #[test]
    fn payload_from_row() {
        let (repo, t1, u1) = setup();
        let row = repo.upsert(&t1, &u1, TimerStatus::Stopped, None).unwrap();
        let payload = TimerPayload::from(&row);
        assert_eq!(payload.id, t1);
        assert_eq!(payload.status, TimerStatus::Stopped);
        assert!(payload.started_at.is_none());
        assert_eq!(payload.updated_at, row.updated_at);
    }

    #[test]
    fn invalid_status_column_returns_corrupt_row() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO timers (id, user_id, status, started_at, updated_at)
                 VALUES ('t1', 'u1', 'BROKEN', NULL, '2024-01-01T00:00:00+00:00')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let repo = TimerRepo::new(db);
        let result = repo.get(&TimerId::from_raw("t1"));
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "timers", column: "status", .. })
        ));
    }

    #[test]
    fn invalid_timestamp_column_returns_corrupt_row() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO timers (id, user_id, status, started_at, updated_at)
                 VALUES ('t1', 'u1', 'running', 'not-a-time', '2024-01-01T00:00:00+00:00')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let repo = TimerRepo::new(db);
        let result = repo.get(&TimerId::from_raw("t1"));
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "timers", column: "started_at", .. })
        ));
    }
}

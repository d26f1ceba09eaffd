//! Optimistic mutator: the only write path for versioned rows.
//!
//! A write names the version it read. The row is updated, and its version
//! bumped, only while the stored version still matches.

use colony_core::{Building, Resource};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection};

use crate::{to_millis, StoreError};

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// A row guarded by a version column.
///
/// `UPDATE_SQL` binds the changed fields first, then the key columns, then
/// the expected version as its last parameter.
pub trait Versioned: Sized {
    const ENTITY: &'static str;
    const UPDATE_SQL: &'static str;

    fn version(&self) -> i64;
    fn with_version(self, version: i64) -> Self;
    fn bind_changes<'q>(&self, q: SqliteQuery<'q>) -> SqliteQuery<'q>;
    fn bind_key<'q>(&self, q: SqliteQuery<'q>) -> SqliteQuery<'q>;
    fn describe_key(&self) -> String;
}

impl Versioned for Building {
    const ENTITY: &'static str = "building";
    const UPDATE_SQL: &'static str = "UPDATE buildings SET level = ?, version = version + 1 \
         WHERE settlement_id = ? AND kind = ? AND version = ?";

    fn version(&self) -> i64 {
        self.version
    }

    fn with_version(self, version: i64) -> Self {
        Building { version, ..self }
    }

    fn bind_changes<'q>(&self, q: SqliteQuery<'q>) -> SqliteQuery<'q> {
        q.bind(self.level as i64)
    }

    fn bind_key<'q>(&self, q: SqliteQuery<'q>) -> SqliteQuery<'q> {
        q.bind(self.settlement_id.0).bind(self.kind.as_str())
    }

    fn describe_key(&self) -> String {
        format!("{}/{}", self.settlement_id, self.kind)
    }
}

impl Versioned for Resource {
    const ENTITY: &'static str = "resource";
    const UPDATE_SQL: &'static str =
        "UPDATE resources SET amount = ?, last_observed_at = ?, version = version + 1 \
         WHERE settlement_id = ? AND kind = ? AND version = ?";

    fn version(&self) -> i64 {
        self.version
    }

    fn with_version(self, version: i64) -> Self {
        Resource { version, ..self }
    }

    fn bind_changes<'q>(&self, q: SqliteQuery<'q>) -> SqliteQuery<'q> {
        q.bind(self.amount.to_string())
            .bind(to_millis(self.last_observed_at))
    }

    fn bind_key<'q>(&self, q: SqliteQuery<'q>) -> SqliteQuery<'q> {
        q.bind(self.settlement_id.0).bind(self.kind.as_str())
    }

    fn describe_key(&self) -> String {
        format!("{}/{}", self.settlement_id, self.kind)
    }
}

/// Writes `next` if the stored version equals `expected_version`.
/// Returns the number of rows written, 0 when another writer got there first.
pub async fn compare_and_swap<T: Versioned>(
    conn: &mut SqliteConnection,
    expected_version: i64,
    next: &T,
) -> Result<u64, StoreError> {
    let q = next.bind_key(next.bind_changes(sqlx::query(T::UPDATE_SQL)));
    let done = q.bind(expected_version).execute(&mut *conn).await?;
    Ok(done.rows_affected())
}

/// Compare-and-swap from `current` to `next`, returning `next` with its new
/// version. A lost race is a [`StoreError::Conflict`].
pub async fn persist_versioned<T: Versioned>(
    conn: &mut SqliteConnection,
    current: &T,
    next: T,
) -> Result<T, StoreError> {
    let expected = current.version();
    if compare_and_swap(conn, expected, &next).await? == 0 {
        tracing::warn!(entity = T::ENTITY, key = %next.describe_key(), expected, "stale version");
        return Err(StoreError::Conflict {
            entity: T::ENTITY,
            key: next.describe_key(),
        });
    }
    Ok(next.with_version(expected + 1))
}

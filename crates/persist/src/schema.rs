//! Table layout. Column names for `resources` must stay in line with
//! `fleet_search::fields::columns`, which emits SQL against them.
//!
//! Uniqueness only covers live rows (`deleted_time IS NULL`), so a soft
//! deleted key can be created again.

use rusqlite::Connection;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS resources (
    id                TEXT PRIMARY KEY,
    kind              TEXT NOT NULL,
    name              TEXT NOT NULL,
    labels            TEXT NOT NULL DEFAULT '{}',
    spec              TEXT NOT NULL DEFAULT '{}',
    generation        INTEGER NOT NULL DEFAULT 1,
    status_conditions TEXT NOT NULL DEFAULT '[]',
    created_time      TEXT NOT NULL,
    updated_time      TEXT NOT NULL,
    deleted_time      TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_resources_kind_name
    ON resources(kind, name) WHERE deleted_time IS NULL;
CREATE INDEX IF NOT EXISTS idx_resources_kind_created
    ON resources(kind, created_time, id);

CREATE TABLE IF NOT EXISTS adapter_statuses (
    id                  TEXT PRIMARY KEY,
    resource_type       TEXT NOT NULL,
    resource_id         TEXT NOT NULL,
    adapter             TEXT NOT NULL,
    observed_generation INTEGER NOT NULL,
    conditions          TEXT NOT NULL DEFAULT '[]',
    data                TEXT,
    metadata            TEXT,
    created_time        TEXT NOT NULL,
    last_report_time    TEXT NOT NULL,
    deleted_time        TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_adapter_statuses_key
    ON adapter_statuses(resource_type, resource_id, adapter) WHERE deleted_time IS NULL;
";

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('resources', 'adapter_statuses')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn uniqueness_ignores_deleted_rows() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let insert = "INSERT INTO adapter_statuses(id, resource_type, resource_id, adapter, observed_generation, created_time, last_report_time, deleted_time)
                      VALUES (?1, 'Cluster', 'c1', 'a1', 1, 't', 't', ?2)";
        conn.execute(insert, rusqlite::params!["r1", "t"]).unwrap();
        conn.execute(insert, rusqlite::params!["r2", None::<String>]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["r3", None::<String>]).is_err());
    }
}

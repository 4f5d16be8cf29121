use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use fleet_core::{to_storage_time, ConditionDocument, NewResource, Resource, ResourceRef};
use fleet_search::{SqlParam, StorageQuery};

use crate::{decode_json, decode_time, is_constraint_violation, Page, PageRequest, StoreError};

const COLUMNS: &str = "id, kind, name, labels, spec, generation, status_conditions, created_time, updated_time";

fn read_row(row: &Row<'_>) -> rusqlite::Result<[Value; 9]> {
    Ok([
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ])
}

fn text(v: Value, what: &str) -> Result<String, StoreError> {
    match v {
        Value::Text(s) => Ok(s),
        other => Err(StoreError::Corrupt(format!("resource {what}: expected text, got {:?}", other.data_type()))),
    }
}

fn decode(cols: [Value; 9]) -> Result<Resource, StoreError> {
    let [id, kind, name, labels, spec, generation, conditions, created, updated] = cols;
    let id = text(id, "id")?;
    let generation = match generation {
        Value::Integer(g) => g,
        other => return Err(StoreError::Corrupt(format!("resource generation: {:?}", other.data_type()))),
    };
    let conditions = text(conditions, "status_conditions")?;
    Ok(Resource {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("resource id {id:?}: {e}")))?,
        kind: text(kind, "kind")?,
        name: text(name, "name")?,
        labels: decode_json::<BTreeMap<String, String>>(&text(labels, "labels")?, "resource labels")?,
        spec: decode_json(&text(spec, "spec")?, "resource spec")?,
        generation,
        status_conditions: ConditionDocument::from_json(&conditions)
            .map_err(|e| StoreError::Corrupt(format!("resource {id} status_conditions: {e}")))?,
        created_time: decode_time(&text(created, "created_time")?, "resource created_time")?,
        updated_time: decode_time(&text(updated, "updated_time")?, "resource updated_time")?,
    })
}

fn bind(p: &SqlParam) -> Value {
    match p {
        SqlParam::Text(s) => Value::Text(s.clone()),
        SqlParam::Integer(i) => Value::Integer(*i),
    }
}

pub(crate) fn insert(conn: &Connection, kind: &str, new: &NewResource, now: DateTime<Utc>) -> Result<Resource, StoreError> {
    let id = Uuid::new_v4();
    let labels = serde_json::to_string(&new.labels).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let spec = serde_json::to_string(&new.spec).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let ts = to_storage_time(now);
    let res = conn.execute(
        "INSERT INTO resources(id, kind, name, labels, spec, generation, status_conditions, created_time, updated_time)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, '[]', ?6, ?6)",
        params![id.to_string(), kind, new.name, labels, spec, ts],
    );
    match res {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(StoreError::Conflict(format!("{kind} named {:?} already exists", new.name)));
        }
        Err(e) => return Err(e.into()),
    }
    find_live(conn, &ResourceRef::new(kind, id.to_string()))?
        .ok_or_else(|| StoreError::NotFound(format!("{kind} {id}")))
}

pub(crate) fn find_live(conn: &Connection, resource: &ResourceRef) -> Result<Option<Resource>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM resources WHERE kind = ?1 AND id = ?2 AND deleted_time IS NULL");
    let raw = conn.query_row(&sql, params![resource.kind, resource.id], read_row).optional()?;
    raw.map(decode).transpose()
}

pub(crate) fn exists_live(conn: &Connection, resource: &ResourceRef) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM resources WHERE kind = ?1 AND id = ?2 AND deleted_time IS NULL",
            params![resource.kind, resource.id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn search(
    conn: &Connection,
    kind: &str,
    filter: Option<&StorageQuery>,
    page: PageRequest,
) -> Result<Page<Resource>, StoreError> {
    let mut where_sql = String::from("kind = ? AND deleted_time IS NULL");
    let mut values = vec![Value::Text(kind.to_string())];
    if let Some(q) = filter {
        where_sql.push_str(" AND (");
        where_sql.push_str(&q.where_sql);
        where_sql.push(')');
        values.extend(q.params.iter().map(bind));
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM resources WHERE {where_sql}"),
        params_from_iter(values.iter()),
        |r| r.get(0),
    )?;

    values.push(Value::Integer(page.limit()));
    values.push(Value::Integer(page.offset()));
    let mut stmt =
        conn.prepare(&format!("SELECT {COLUMNS} FROM resources WHERE {where_sql} ORDER BY created_time, id LIMIT ? OFFSET ?"))?;
    let mut rows = stmt.query(params_from_iter(values.iter()))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(decode(read_row(row)?)?);
    }
    Ok(Page { items, page: page.page, page_size: page.page_size, total: total.max(0) as u64 })
}

pub(crate) fn soft_delete(conn: &Connection, resource: &ResourceRef, now: DateTime<Utc>) -> Result<bool, StoreError> {
    let n = conn.execute(
        "UPDATE resources SET deleted_time = ?3 WHERE kind = ?1 AND id = ?2 AND deleted_time IS NULL",
        params![resource.kind, resource.id, to_storage_time(now)],
    )?;
    Ok(n > 0)
}

pub(crate) fn raw_conditions(conn: &Connection, resource: &ResourceRef) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT status_conditions FROM resources WHERE kind = ?1 AND id = ?2 AND deleted_time IS NULL",
            params![resource.kind, resource.id],
            |r| r.get(0),
        )
        .optional()?)
}

pub(crate) fn set_conditions(
    conn: &Connection,
    resource: &ResourceRef,
    conditions: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE resources SET status_conditions = ?3, updated_time = ?4
         WHERE kind = ?1 AND id = ?2 AND deleted_time IS NULL",
        params![resource.kind, resource.id, conditions, to_storage_time(now)],
    )?;
    Ok(())
}

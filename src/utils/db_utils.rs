use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use sqlx::MySqlConnection;

use crate::error::AppError;

fn bad(msg: impl Into<String>) -> AppError {
    AppError::BadRequest(msg.into())
}

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Null,
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

fn to_sql_value(value: &Value) -> Result<SqlValue, AppError> {
    Ok(match value {
        Value::String(s) => {
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                SqlValue::Date(d)
            } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                SqlValue::DateTime(dt)
            } else if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
                SqlValue::Time(t)
            } else if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M") {
                SqlValue::Time(t)
            } else {
                SqlValue::String(s.clone())
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::I64(i)
            } else if let Some(u) = n.as_u64() {
                SqlValue::U64(u)
            } else if let Some(f) = n.as_f64() {
                SqlValue::F64(f)
            } else {
                return Err(bad("Unsupported number"));
            }
        }
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Null => SqlValue::Null,
        _ => return Err(bad("Unsupported JSON value type")),
    })
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
/// Only keys listed in `allowed` may be written; anything else is a 400.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[&str],
    id_column: &str,
    id_value: u64,
) -> Result<SqlUpdate, AppError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| bad("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(bad("No fields provided for update"));
    }

    if let Some(key) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(bad(format!("Field '{key}' cannot be updated")));
    }

    let set_clause = obj
        .keys()
        .map(|k| format!("{} = ?", k))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!("UPDATE {} SET {} WHERE {} = ?", table, set_clause, id_column);

    let mut values = Vec::with_capacity(obj.len() + 1);
    for value in obj.values() {
        values.push(to_sql_value(value)?);
    }

    // WHERE id = ?
    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(
    conn: &mut MySqlConnection,
    update: SqlUpdate,
) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::F64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::Time(v) => query.bind(v),
            SqlValue::DateTime(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(conn).await?;
    Ok(result.rows_affected())
}

/// LIMIT/OFFSET for a 1-based page request
#[derive(Debug, PartialEq)]
pub struct Paging {
    pub page: u64,
    pub per_page: u64,
    pub offset: u64,
}

impl Paging {
    pub fn new(page: Option<u64>, per_page: Option<u64>) -> Self {
        let per_page = per_page.unwrap_or(10).clamp(1, 100);
        let page = page.unwrap_or(1).max(1);
        Self {
            page,
            per_page,
            offset: (page - 1).saturating_mul(per_page),
        }
    }

    pub fn page_u32(&self) -> u32 {
        u32::try_from(self.page).unwrap_or(u32::MAX)
    }

    pub fn per_page_u32(&self) -> u32 {
        u32::try_from(self.per_page).unwrap_or(u32::MAX)
    }
}

/// Whether a database error is a unique/foreign key violation (SQLSTATE 23000).
pub fn is_constraint_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23000"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALLOWED: &[&str] = &["name", "work_start", "approve_levels", "group_id"];

    #[test]
    fn builds_set_clause_in_payload_order() {
        let payload = json!({"name": "Ops", "work_start": "09:30", "group_id": null});
        let update = build_update_sql("groups", &payload, ALLOWED, "id", 4).unwrap();
        assert!(update.sql.starts_with("UPDATE groups SET "));
        assert!(update.sql.ends_with(" WHERE id = ?"));
        assert_eq!(update.values.len(), 4);
        assert_eq!(update.values.last(), Some(&SqlValue::U64(4)));
        assert!(update.values.contains(&SqlValue::Time(
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        )));
        assert!(update.values.contains(&SqlValue::Null));
    }

    #[test]
    fn rejects_columns_outside_whitelist() {
        let payload = json!({"password": "x"});
        assert!(build_update_sql("users", &payload, ALLOWED, "id", 1).is_err());
        let payload = json!({"name = 'x'; --": "x"});
        assert!(build_update_sql("users", &payload, ALLOWED, "id", 1).is_err());
    }

    #[test]
    fn rejects_empty_and_non_objects() {
        assert!(build_update_sql("groups", &json!({}), ALLOWED, "id", 1).is_err());
        assert!(build_update_sql("groups", &json!([1, 2]), ALLOWED, "id", 1).is_err());
        assert!(build_update_sql("groups", &json!({"name": ["a"]}), ALLOWED, "id", 1).is_err());
    }

    #[test]
    fn converts_dates_and_numbers() {
        assert_eq!(
            to_sql_value(&json!("2024-05-01")).unwrap(),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
        assert_eq!(to_sql_value(&json!(3)).unwrap(), SqlValue::I64(3));
        assert_eq!(to_sql_value(&json!(true)).unwrap(), SqlValue::Bool(true));
        assert_eq!(
            to_sql_value(&json!("plain")).unwrap(),
            SqlValue::String("plain".to_string())
        );
    }

    #[test]
    fn paging_clamps_and_saturates() {
        let first = Paging::new(None, None);
        assert_eq!((first.page, first.per_page, first.offset), (1, 10, 0));

        let third = Paging::new(Some(3), Some(500));
        assert_eq!((third.per_page, third.offset), (100, 200));

        let huge = Paging::new(Some(u64::MAX), Some(100));
        assert_eq!(huge.offset, u64::MAX);
        assert_eq!(huge.page_u32(), u32::MAX);
        assert_eq!(Paging::new(Some(0), Some(0)).offset, 0);
    }
}

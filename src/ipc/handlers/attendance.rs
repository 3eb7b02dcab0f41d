use crate::attendance::{
    build_lookup, is_valid_status, month_skeleton, parse_iso_date, AttendanceEntry, STATUSES,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

// The create-vs-update decision for the (class, date) record and the
// per-student status both ride on ON CONFLICT upserts inside one
// transaction, so two concurrent recordings for the same key cannot
// produce duplicate records; the later write wins per student field.
fn attendance_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_str(params, "date")?;
    let student_id = get_required_str(params, "studentId")?;
    let status = get_required_str(params, "status")?;
    let recorded_by = params
        .get("recordedBy")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    if parse_iso_date(&date).is_none() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "date must be YYYY-MM-DD".to_string(),
            details: None,
        });
    }
    if !is_valid_status(&status) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("status must be one of {}", STATUSES.join(", ")),
            details: None,
        });
    }
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute(
        "INSERT INTO attendance_days(class_id, date, recorded_by)
         VALUES(?, ?, ?)
         ON CONFLICT(class_id, date) DO UPDATE SET
           recorded_by = excluded.recorded_by",
        (&class_id, &date, &recorded_by),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_days" })),
    })?;
    tx.execute(
        "INSERT INTO attendance_entries(class_id, date, student_id, status)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(class_id, date, student_id) DO UPDATE SET
           status = excluded.status",
        (&class_id, &date, &student_id, &status),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_entries" })),
    })?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true }))
}

fn attendance_year_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing year".to_string(),
            details: None,
        })?;
    let year = i32::try_from(year).map_err(|_| HandlerErr {
        code: "bad_params",
        message: "year out of range".to_string(),
        details: None,
    })?;
    let class_id = params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Some(cid) = class_id.as_deref() {
        if !class_exists(conn, cid)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "class not found".to_string(),
                details: None,
            });
        }
    }

    // The indexer expects records already scoped to the year; the date range
    // filter lives here, in the query.
    let start = format!("{:04}-01-01", year);
    let end = format!("{:04}-12-31", year);
    let mut sql = String::from(
        "SELECT class_id, date, student_id, status
         FROM attendance_entries
         WHERE date >= ? AND date <= ?",
    );
    if class_id.is_some() {
        sql.push_str(" AND class_id = ?");
    }
    let mut stmt = conn.prepare(&sql).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<AttendanceEntry> {
        Ok(AttendanceEntry {
            class_id: r.get(0)?,
            date: r.get(1)?,
            student_id: r.get(2)?,
            status: r.get(3)?,
        })
    };
    let entries = if let Some(cid) = class_id.as_deref() {
        stmt.query_map((&start, &end, cid), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map((&start, &end), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    }
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;

    let lookup = build_lookup(&entries);
    let months = month_skeleton(year);

    Ok(json!({
        "year": year,
        "months": months,
        "lookup": lookup,
    }))
}

fn handle_attendance_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_record(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_year_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_year_open(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(handle_attendance_record(state, req)),
        "attendance.yearOpen" => Some(handle_attendance_year_open(state, req)),
        _ => None,
    }
}

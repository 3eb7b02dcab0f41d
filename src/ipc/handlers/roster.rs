use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn required_name(params: &serde_json::Value, key: &str) -> Result<String, String> {
    let v = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if v.is_empty() {
        Err(format!("missing {}", key))
    } else {
        Ok(v)
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = match required_name(&req.params, "firstName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let last_name = match required_name(&req.params, "lastName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let grade_level = req
        .params
        .get("gradeLevel")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let student_number = req
        .params
        .get("studentNumber")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, first_name, last_name, grade_level, student_number, points, active)
         VALUES(?, ?, ?, ?, ?, 0, 1)",
        (&student_id, &first_name, &last_name, &grade_level, &student_number),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, grade_level, points, active
         FROM students
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            let grade_level: Option<String> = row.get(3)?;
            let points: i64 = row.get(4)?;
            let active: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "displayName": format!("{}, {}", last, first),
                "gradeLevel": grade_level,
                "points": points,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_parents_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = match required_name(&req.params, "firstName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let last_name = match required_name(&req.params, "lastName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let parent_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO parents(id, first_name, last_name) VALUES(?, ?, ?)",
        (&parent_id, &first_name, &last_name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "parents" })),
        );
    }

    ok(&req.id, json!({ "parentId": parent_id }))
}

// Membership is checked by stable id via the link table's primary key, never
// by positional assumptions; re-linking the same pair is reported, not
// duplicated.
fn handle_parents_link_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let parent_id = match req.params.get("parentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing parentId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let relationship = req
        .params
        .get("relationship")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    let parent_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM parents WHERE id = ?", [&parent_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if parent_exists.is_none() {
        return err(&req.id, "not_found", "parent not found", None);
    }

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let changed = match conn.execute(
        "INSERT INTO parent_links(parent_id, student_id, relationship)
         VALUES(?, ?, ?)
         ON CONFLICT(parent_id, student_id) DO NOTHING",
        (&parent_id, &student_id, &relationship),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "parent_links" })),
            )
        }
    };

    ok(&req.id, json!({ "linked": true, "alreadyLinked": changed == 0 }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "parents.create" => Some(handle_parents_create(state, req)),
        "parents.linkStudent" => Some(handle_parents_link_student(state, req)),
        _ => None,
    }
}

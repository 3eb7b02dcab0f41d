use crate::calc::{subject_average, Category, GradeRow, WeightTable};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const QUARTERS: [&str; 4] = ["Q1", "Q2", "Q3", "Q4"];

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if v.is_empty() {
        Err(HandlerErr::bad_params(format!("missing {}", key)))
    } else {
        Ok(v)
    }
}

fn grades_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject = get_required_str(params, "subject")?;
    let quarter = get_required_str(params, "quarter")?;
    let title = get_required_str(params, "title")?;
    let category = get_required_str(params, "category")?;

    if !QUARTERS.contains(&quarter.as_str()) {
        return Err(HandlerErr::bad_params("quarter must be one of Q1..Q4"));
    }
    let score = params
        .get("score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("missing score"))?;
    let max_score = match params.get("maxScore") {
        None => 100.0,
        Some(v) if v.is_null() => 100.0,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params("maxScore must be a number"))?,
    };
    let feedback = params
        .get("feedback")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let Some(student_ids_json) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing studentIds"));
    };
    let student_ids: Vec<String> = student_ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("studentIds must not be empty"));
    }

    let class_exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !class_exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    // All referenced students must exist before anything is written.
    for student_id in &student_ids {
        let exists = conn
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(|e| HandlerErr {
                code: "db_query_failed",
                message: e.to_string(),
                details: None,
            })?
            .is_some();
        if !exists {
            return Err(HandlerErr {
                code: "not_found",
                message: "student not found".to_string(),
                details: Some(json!({ "studentId": student_id })),
            });
        }
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let grade_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO grades(id, class_id, subject, quarter, title, category, score, max_score, feedback)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id, &class_id, &subject, &quarter, &title, &category, score, max_score,
            &feedback,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "grades" })),
    })?;
    for student_id in &student_ids {
        tx.execute(
            "INSERT INTO grade_students(grade_id, student_id)
             VALUES(?, ?)
             ON CONFLICT(grade_id, student_id) DO NOTHING",
            (&grade_id, student_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grade_students" })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "gradeId": grade_id }))
}

fn load_subject_rows(conn: &Connection, subject: &str) -> Result<Vec<GradeRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT g.id, g.subject, g.category, g.score, g.max_score, gs.student_id
             FROM grades g
             JOIN grade_students gs ON gs.grade_id = g.id
             WHERE g.subject = ?",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let flat = stmt
        .query_map([subject], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    // Re-fold join rows into one GradeRow per grade document.
    let mut by_grade: HashMap<String, GradeRow> = HashMap::new();
    for (grade_id, subject, category, score, max_score, student_id) in flat {
        by_grade
            .entry(grade_id)
            .or_insert_with(|| GradeRow {
                subject,
                student_ids: Vec::new(),
                category,
                score,
                max_score,
            })
            .student_ids
            .push(student_id);
    }
    Ok(by_grade.into_values().collect())
}

fn parse_weight_override(params: &serde_json::Value) -> Result<WeightTable, HandlerErr> {
    let Some(raw) = params.get("weights") else {
        return Ok(WeightTable::standard());
    };
    if raw.is_null() {
        return Ok(WeightTable::standard());
    }
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::bad_params("weights must be an object"));
    };
    let mut entries: Vec<(Category, f64)> = Vec::with_capacity(obj.len());
    for (name, value) in obj {
        let Some(category) = Category::parse(name) else {
            return Err(HandlerErr::bad_params(format!(
                "unknown weight category: {}",
                name
            )));
        };
        let Some(weight) = value.as_f64() else {
            return Err(HandlerErr::bad_params(format!(
                "weight for {} must be a number",
                name
            )));
        };
        entries.push((category, weight));
    }
    WeightTable::new(&entries).map_err(|e| HandlerErr::bad_params(e.message))
}

fn grades_subject_average(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject = get_required_str(params, "subject")?;
    let weights = parse_weight_override(params)?;

    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !student_exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let rows = load_subject_rows(conn, &subject)?;
    let average = subject_average(&rows, &student_id, &subject, &weights);

    Ok(json!({
        "studentId": student_id,
        "subject": subject,
        "average": average.display,
        "percent": average.percent,
        "categories": average.categories,
    }))
}

fn handle_grades_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_record(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_grades_subject_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_subject_average(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.record" => Some(handle_grades_record(state, req)),
        "grades.subjectAverage" => Some(handle_grades_subject_average(state, req)),
        _ => None,
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::missions::{can_transition, MissionStatus, PointsAward};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn db(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    fn not_eligible(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_eligible",
            message: message.into(),
            details: None,
        }
    }

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

fn mission_points(conn: &Connection, mission_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT points_xp FROM missions WHERE id = ?",
        [mission_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "mission not found".to_string(),
        details: None,
    })
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    let found = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if found {
        Ok(())
    } else {
        Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        })
    }
}

fn progress_status(
    conn: &Connection,
    mission_id: &str,
    student_id: &str,
) -> Result<Option<MissionStatus>, HandlerErr> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM mission_progress WHERE mission_id = ? AND student_id = ?",
            (mission_id, student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    match raw {
        None => Ok(None),
        Some(s) => MissionStatus::parse(&s).map(Some).ok_or_else(|| HandlerErr {
            code: "conflict",
            message: format!("unrecognized progress status: {}", s),
            details: None,
        }),
    }
}

fn missions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let description = params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let created_by = params
        .get("createdBy")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let points_xp = params
        .get("pointsXP")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing pointsXP".to_string(),
            details: None,
        })?;
    if points_xp < 0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "pointsXP must not be negative".to_string(),
            details: None,
        });
    }

    let mission_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO missions(id, title, description, points_xp, created_by)
         VALUES(?, ?, ?, ?, ?)",
        (&mission_id, &title, &description, points_xp, &created_by),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "missions" })),
    })?;

    Ok(json!({ "missionId": mission_id }))
}

fn missions_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, title, description, points_xp FROM missions ORDER BY title")
        .map_err(HandlerErr::db)?;
    let missions = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let description: Option<String> = r.get(2)?;
            let points_xp: i64 = r.get(3)?;
            Ok(json!({
                "id": id,
                "title": title,
                "description": description,
                "pointsXP": points_xp
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "missions": missions }))
}

fn missions_progress(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mission_id = get_required_str(params, "missionId")?;
    let _ = mission_points(conn, &mission_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT student_id, status FROM mission_progress
             WHERE mission_id = ?
             ORDER BY student_id",
        )
        .map_err(HandlerErr::db)?;
    let progress = stmt
        .query_map([&mission_id], |r| {
            let student_id: String = r.get(0)?;
            let status: String = r.get(1)?;
            Ok(json!({ "studentId": student_id, "status": status }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "missionId": mission_id, "progress": progress }))
}

fn missions_leaderboard(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, points
             FROM students
             WHERE active = 1
             ORDER BY points DESC, last_name, first_name",
        )
        .map_err(HandlerErr::db)?;
    let students = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let points: i64 = r.get(3)?;
            Ok(json!({
                "studentId": id,
                "displayName": format!("{}, {}", last, first),
                "points": points
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "students": students }))
}

fn missions_begin(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mission_id = get_required_str(params, "missionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let _ = mission_points(conn, &mission_id)?;
    student_exists(conn, &student_id)?;

    let current = progress_status(conn, &mission_id, &student_id)?
        .unwrap_or(MissionStatus::NotStarted);
    if current == MissionStatus::Started {
        return Ok(json!({ "status": "started", "alreadyStarted": true }));
    }
    if !can_transition(current, MissionStatus::Started) {
        // A completed mission never regresses to started.
        return Err(HandlerErr::not_eligible(format!(
            "cannot begin a mission in state {}",
            current.as_str()
        )));
    }

    // Guarded upsert: the WHERE clause keeps a concurrent completion from
    // being overwritten between the read above and this write.
    conn.execute(
        "INSERT INTO mission_progress(mission_id, student_id, status)
         VALUES(?, ?, 'started')
         ON CONFLICT(mission_id, student_id) DO UPDATE SET
           status = 'started'
         WHERE mission_progress.status = 'not-started'",
        (&mission_id, &student_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "mission_progress" })),
    })?;

    Ok(json!({ "status": "started" }))
}

fn missions_complete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mission_id = get_required_str(params, "missionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let points = mission_points(conn, &mission_id)?;
    student_exists(conn, &student_id)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    // Compare-and-set: the transition commits only if the stored status is
    // still 'started'. Two completions can both read 'started', but only
    // one update changes a row.
    let changed = tx
        .execute(
            "UPDATE mission_progress SET status = 'complete'
             WHERE mission_id = ? AND student_id = ? AND status = 'started'",
            (&mission_id, &student_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "mission_progress" })),
        })?;

    if changed == 0 {
        // No award, no state change; report why.
        let current = progress_status(&tx, &mission_id, &student_id)?;
        let _ = tx.rollback();
        let reason = match current {
            Some(MissionStatus::Complete) => "mission already complete",
            _ => "mission not started",
        };
        return Err(HandlerErr::not_eligible(reason));
    }

    let award = PointsAward {
        mission_id: mission_id.clone(),
        student_id: student_id.clone(),
        points,
    };
    tx.execute(
        "INSERT INTO mission_awards(mission_id, student_id, points, awarded_at)
         VALUES(?, ?, ?, datetime('now'))",
        (&award.mission_id, &award.student_id, award.points),
    )
    .map_err(|e| HandlerErr {
        code: "conflict",
        message: e.to_string(),
        details: Some(json!({ "table": "mission_awards" })),
    })?;
    tx.execute(
        "UPDATE students SET points = points + ? WHERE id = ?",
        (award.points, &award.student_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    let new_balance: i64 = tx
        .query_row(
            "SELECT points FROM students WHERE id = ?",
            [&award.student_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "status": "complete",
        "award": award,
        "newBalance": new_balance
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "missions.create" => Some(with_conn(state, req, missions_create)),
        "missions.list" => Some(with_conn(state, req, |c, _| missions_list(c))),
        "missions.progress" => Some(with_conn(state, req, missions_progress)),
        "missions.leaderboard" => Some(with_conn(state, req, |c, _| missions_leaderboard(c))),
        "missions.begin" => Some(with_conn(state, req, missions_begin)),
        "missions.complete" => Some(with_conn(state, req, missions_complete)),
        _ => None,
    }
}

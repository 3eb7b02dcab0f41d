use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoolportald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolportald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        stdin,
        reader,
        "s1",
        "students.create",
        json!({ "firstName": "Noor", "lastName": "Haddad" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let class = request_ok(
        stdin,
        reader,
        "c1",
        "classes.create",
        json!({ "name": "Science 8" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "e1",
        "classes.enrollStudent",
        json!({ "classId": class_id, "studentId": student_id }),
    );
    (class_id, student_id)
}

#[test]
fn year_grid_lookup_hits_recorded_key_and_misses_others() {
    let workspace = temp_dir("schoolportal-att");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, student_id) = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "attendance.record",
        json!({
            "classId": class_id,
            "date": "2025-09-03",
            "studentId": student_id,
            "status": "present",
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "y1",
        "attendance.yearOpen",
        json!({ "year": 2025, "classId": class_id }),
    );
    let lookup = result.get("lookup").and_then(|v| v.as_object()).expect("lookup");
    let key = format!("{}_2025-09-03_{}", class_id, student_id);
    assert_eq!(
        lookup.get(&key).and_then(|v| v.as_str()),
        Some("present")
    );
    // An unindexed key is absent, not defaulted.
    let other_key = format!("{}_2025-09-04_{}", class_id, student_id);
    assert!(lookup.get(&other_key).is_none());

    // A different year excludes the record entirely.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "y2",
        "attendance.yearOpen",
        json!({ "year": 2024, "classId": class_id }),
    );
    let lookup = result.get("lookup").and_then(|v| v.as_object()).expect("lookup");
    assert!(lookup.is_empty());

    let _ = child.kill();
}

#[test]
fn month_skeleton_tracks_leap_years() {
    let workspace = temp_dir("schoolportal-att-months");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let leap = request_ok(
        &mut stdin,
        &mut reader,
        "y1",
        "attendance.yearOpen",
        json!({ "year": 2024 }),
    );
    let months = leap.get("months").and_then(|v| v.as_array()).expect("months");
    assert_eq!(months.len(), 12);
    assert_eq!(months[1].get("name").and_then(|v| v.as_str()), Some("February"));
    assert_eq!(months[1].get("index").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(months[1].get("days").and_then(|v| v.as_i64()), Some(29));

    let common = request_ok(
        &mut stdin,
        &mut reader,
        "y2",
        "attendance.yearOpen",
        json!({ "year": 2025 }),
    );
    let months = common.get("months").and_then(|v| v.as_array()).expect("months");
    assert_eq!(months[1].get("days").and_then(|v| v.as_i64()), Some(28));
    assert_eq!(months[11].get("days").and_then(|v| v.as_i64()), Some(31));

    let _ = child.kill();
}

#[test]
fn recording_same_key_twice_updates_in_place() {
    let workspace = temp_dir("schoolportal-att-upsert");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, student_id) = seed(&mut stdin, &mut reader, &workspace);

    for (i, status) in ["absent", "late"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "attendance.record",
            json!({
                "classId": class_id,
                "date": "2025-10-01",
                "studentId": student_id,
                "status": status,
            }),
        );
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "y1",
        "attendance.yearOpen",
        json!({ "year": 2025 }),
    );
    let lookup = result.get("lookup").and_then(|v| v.as_object()).expect("lookup");
    let key = format!("{}_2025-10-01_{}", class_id, student_id);
    assert_eq!(lookup.get(&key).and_then(|v| v.as_str()), Some("late"));

    // Exactly one day record and one entry row for the key.
    let conn = Connection::open(workspace.join("schoolportal.sqlite3")).expect("open db");
    let day_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance_days WHERE class_id = ? AND date = '2025-10-01'",
            [&class_id],
            |r| r.get(0),
        )
        .expect("count days");
    assert_eq!(day_count, 1);
    let entry_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance_entries WHERE class_id = ? AND date = '2025-10-01'",
            [&class_id],
            |r| r.get(0),
        )
        .expect("count entries");
    assert_eq!(entry_count, 1);

    let _ = child.kill();
}

#[test]
fn invalid_dates_and_statuses_are_rejected() {
    let workspace = temp_dir("schoolportal-att-validate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, student_id) = seed(&mut stdin, &mut reader, &workspace);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "b1",
        "attendance.record",
        json!({
            "classId": class_id,
            "date": "2025-02-30",
            "studentId": student_id,
            "status": "present",
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "b2",
        "attendance.record",
        json!({
            "classId": class_id,
            "date": "2025-09-03",
            "studentId": student_id,
            "status": "tardy",
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "b3",
        "attendance.record",
        json!({
            "classId": "no-such-class",
            "date": "2025-09-03",
            "studentId": student_id,
            "status": "present",
        }),
    );
    assert_eq!(code, "not_found");

    let _ = child.kill();
}

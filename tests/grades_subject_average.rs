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

struct Fixture {
    class_id: String,
    student_id: String,
}

fn seed_class_with_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Fixture {
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
        json!({ "firstName": "Ada", "lastName": "Ibrahim", "gradeLevel": "7" }),
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
        json!({ "name": "Grade 7 Homeroom" }),
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
    Fixture {
        class_id,
        student_id,
    }
}

fn average_for(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    subject: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "grades.subjectAverage",
        json!({ "studentId": student_id, "subject": subject }),
    );
    result
        .get("average")
        .and_then(|v| v.as_str())
        .expect("average string")
        .to_string()
}

#[test]
fn weighted_average_defaults_missing_categories_to_full_credit() {
    let workspace = temp_dir("schoolportal-avg");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_class_with_student(&mut stdin, &mut reader, &workspace);

    // No grades at all: every category defaults to 100.
    assert_eq!(
        average_for(&mut stdin, &mut reader, "a0", &fx.student_id, "Math"),
        "100.00"
    );

    // One Homework at 80/100 costs 20% of the 20-point homework weight.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.record",
        json!({
            "classId": fx.class_id,
            "subject": "Math",
            "quarter": "Q1",
            "title": "Fractions worksheet",
            "category": "Homework",
            "score": 80,
            "studentIds": [fx.student_id],
        }),
    );
    assert_eq!(
        average_for(&mut stdin, &mut reader, "a1", &fx.student_id, "Math"),
        "96.00"
    );

    // An unrecognized category contributes nothing, even at 0%.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "grades.record",
        json!({
            "classId": fx.class_id,
            "subject": "Math",
            "quarter": "Q1",
            "title": "Bonus puzzle",
            "category": "ExtraCredit",
            "score": 0,
            "studentIds": [fx.student_id],
        }),
    );
    assert_eq!(
        average_for(&mut stdin, &mut reader, "a2", &fx.student_id, "Math"),
        "96.00"
    );

    // Another subject is untouched.
    assert_eq!(
        average_for(&mut stdin, &mut reader, "a3", &fx.student_id, "Science"),
        "100.00"
    );

    let _ = child.kill();
}

#[test]
fn zero_max_score_counts_as_zero_percent_for_that_entry() {
    let workspace = temp_dir("schoolportal-avg-zero");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_class_with_student(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.record",
        json!({
            "classId": fx.class_id,
            "subject": "Math",
            "quarter": "Q2",
            "title": "Misconfigured exam",
            "category": "Exam",
            "score": 50,
            "maxScore": 0,
            "studentIds": [fx.student_id],
        }),
    );
    // Exam bucket is 0%, removing its full 25-point weight.
    assert_eq!(
        average_for(&mut stdin, &mut reader, "a1", &fx.student_id, "Math"),
        "75.00"
    );

    let _ = child.kill();
}

#[test]
fn grade_validation_rejects_bad_quarter_and_missing_fields_without_writing() {
    let workspace = temp_dir("schoolportal-avg-validate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_class_with_student(&mut stdin, &mut reader, &workspace);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "b1",
        "grades.record",
        json!({
            "classId": fx.class_id,
            "subject": "Math",
            "quarter": "Q5",
            "title": "Bad quarter",
            "category": "Quiz",
            "score": 10,
            "studentIds": [fx.student_id],
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "b2",
        "grades.record",
        json!({
            "classId": fx.class_id,
            "subject": "Math",
            "quarter": "Q1",
            "title": "No score",
            "category": "Quiz",
            "studentIds": [fx.student_id],
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "b3",
        "grades.record",
        json!({
            "classId": fx.class_id,
            "subject": "Math",
            "quarter": "Q1",
            "title": "Ghost student",
            "category": "Quiz",
            "score": 10,
            "studentIds": ["no-such-student"],
        }),
    );
    assert_eq!(code, "not_found");

    // Nothing was written: the average is still all defaults.
    assert_eq!(
        average_for(&mut stdin, &mut reader, "a1", &fx.student_id, "Math"),
        "100.00"
    );

    let _ = child.kill();
}

#[test]
fn weight_override_must_sum_to_100() {
    let workspace = temp_dir("schoolportal-avg-weights");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_class_with_student(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.record",
        json!({
            "classId": fx.class_id,
            "subject": "Math",
            "quarter": "Q1",
            "title": "Fractions worksheet",
            "category": "Homework",
            "score": 80,
            "studentIds": [fx.student_id],
        }),
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "w1",
        "grades.subjectAverage",
        json!({
            "studentId": fx.student_id,
            "subject": "Math",
            "weights": {
                "Homework": 50, "Quiz": 15, "Test": 25, "Exam": 25,
                "Behavior": 7.5, "Participation": 7.5
            }
        }),
    );
    assert_eq!(code, "bad_params");

    // A valid override shifts more weight onto the graded homework.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "w2",
        "grades.subjectAverage",
        json!({
            "studentId": fx.student_id,
            "subject": "Math",
            "weights": {
                "Homework": 50, "Quiz": 10, "Test": 10, "Exam": 10,
                "Behavior": 10, "Participation": 10
            }
        }),
    );
    assert_eq!(
        result.get("average").and_then(|v| v.as_str()),
        Some("90.00")
    );

    let _ = child.kill();
}

use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoolportal.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            grade_level TEXT,
            student_number TEXT,
            points INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL
        )",
        [],
    )?;

    // One link row per (parent, student); re-linking is a no-op, never a
    // duplicate.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_links(
            parent_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            relationship TEXT,
            PRIMARY KEY(parent_id, student_id),
            FOREIGN KEY(parent_id) REFERENCES parents(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parent_links_student ON parent_links(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            room TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(class_id, student_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            quarter TEXT NOT NULL,
            title TEXT NOT NULL,
            category TEXT NOT NULL,
            score REAL NOT NULL,
            max_score REAL NOT NULL DEFAULT 100,
            feedback TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_class ON grades(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_subject ON grades(subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_students(
            grade_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(grade_id, student_id),
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_students_student ON grade_students(student_id)",
        [],
    )?;

    // At most one attendance record per (class, day); the day table keys the
    // record, the entries table holds one status row per student.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_days(
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            recorded_by TEXT,
            PRIMARY KEY(class_id, date),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_entries(
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(class_id, date, student_id),
            FOREIGN KEY(class_id, date) REFERENCES attendance_days(class_id, date),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_entries_student ON attendance_entries(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_entries_date ON attendance_entries(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS missions(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            points_xp INTEGER NOT NULL,
            created_by TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mission_progress(
            mission_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(mission_id, student_id),
            FOREIGN KEY(mission_id) REFERENCES missions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mission_progress_student ON mission_progress(student_id)",
        [],
    )?;

    // Award ledger. The primary key makes a second award for the same
    // (mission, student) a constraint violation even if the status guard
    // were ever bypassed.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mission_awards(
            mission_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            points INTEGER NOT NULL,
            awarded_at TEXT NOT NULL,
            PRIMARY KEY(mission_id, student_id),
            FOREIGN KEY(mission_id) REFERENCES missions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mission_awards_student ON mission_awards(student_id)",
        [],
    )?;

    Ok(conn)
}

use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("ssps.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS majors(
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(program_id) REFERENCES programs(id),
            UNIQUE(program_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_majors_program ON majors(program_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS units(
            id TEXT PRIMARY KEY,
            unit_code TEXT NOT NULL UNIQUE,
            unit_name TEXT NOT NULL,
            prerequisites TEXT,
            concurrent_prerequisites TEXT,
            credit_points REAL NOT NULL DEFAULT 12.5,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            program TEXT NOT NULL,
            major TEXT NOT NULL,
            intake_term TEXT NOT NULL,
            intake_year INTEGER NOT NULL,
            student_type TEXT NOT NULL DEFAULT 'malaysian',
            credit_points REAL NOT NULL DEFAULT 0,
            graduated INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    // Workspaces created before the international-intake work lack the
    // student_type column. Add and default if needed.
    ensure_students_student_type(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_intake ON students(intake_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_program ON students(program, major)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_planners(
            id TEXT PRIMARY KEY,
            program TEXT NOT NULL,
            major TEXT NOT NULL,
            intake_year INTEGER NOT NULL,
            intake_semester TEXT NOT NULL,
            created_at TEXT,
            UNIQUE(program, major, intake_year, intake_semester)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_planner_units(
            id TEXT PRIMARY KEY,
            planner_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            year INTEGER NOT NULL,
            semester TEXT NOT NULL,
            unit_code TEXT,
            unit_name TEXT NOT NULL,
            prerequisites TEXT,
            unit_type TEXT NOT NULL,
            replacement_code TEXT,
            replacement_name TEXT,
            FOREIGN KEY(planner_id) REFERENCES study_planners(id)
        )",
        [],
    )?;
    ensure_planner_units_replacement(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_planner_units_planner
         ON study_planner_units(planner_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_units(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            unit_code TEXT,
            unit_name TEXT NOT NULL,
            grade TEXT,
            completed INTEGER NOT NULL,
            unit_type TEXT,
            credit_points REAL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_student_units_credit_points(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_units_student ON student_units(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_units_code ON student_units(unit_code)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_student_type(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "student_type")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN student_type TEXT NOT NULL DEFAULT 'malaysian'",
        [],
    )?;
    Ok(())
}

// Older planners carried the substitution only inside unit_name as a
// "(filled with CODE)" marker; the structured columns are the primary
// channel now.
fn ensure_planner_units_replacement(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "study_planner_units", "replacement_code")? {
        conn.execute(
            "ALTER TABLE study_planner_units ADD COLUMN replacement_code TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "study_planner_units", "replacement_name")? {
        conn.execute(
            "ALTER TABLE study_planner_units ADD COLUMN replacement_name TEXT",
            [],
        )?;
    }
    Ok(())
}

fn ensure_student_units_credit_points(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "student_units", "credit_points")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE student_units ADD COLUMN credit_points REAL", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

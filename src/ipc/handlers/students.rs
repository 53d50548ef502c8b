use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, now_ts, parse_opt_i64, parse_opt_string, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const STUDENT_COLUMNS: &str = "id, student_no, name, email, program, major, intake_term,
    intake_year, student_type, credit_points, graduated, created_at, updated_at";

pub fn student_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let student_no: i64 = row.get(1)?;
    let name: String = row.get(2)?;
    let email: String = row.get(3)?;
    let program: String = row.get(4)?;
    let major: String = row.get(5)?;
    let intake_term: String = row.get(6)?;
    let intake_year: i64 = row.get(7)?;
    let student_type: String = row.get(8)?;
    let credit_points: f64 = row.get(9)?;
    let graduated: i64 = row.get(10)?;
    let created_at: Option<String> = row.get(11)?;
    let updated_at: Option<String> = row.get(12)?;
    Ok(json!({
        "id": id,
        "studentNo": student_no,
        "name": name,
        "email": email,
        "program": program,
        "major": major,
        "intakeTerm": intake_term,
        "intakeYear": intake_year,
        "studentType": student_type,
        "creditPoints": credit_points,
        "graduated": graduated != 0,
        "createdAt": created_at,
        "updatedAt": updated_at
    }))
}

pub fn find_student_json(
    conn: &Connection,
    student_no: i64,
) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE student_no = ?", STUDENT_COLUMNS),
        [student_no],
        student_row_json,
    )
    .optional()
}

pub fn find_student_id(conn: &Connection, student_no: i64) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM students WHERE student_no = ?",
        [student_no],
        |r| r.get(0),
    )
    .optional()
}

fn validate_student_type(raw: &str) -> Option<String> {
    let t = raw.trim().to_ascii_lowercase();
    match t.as_str() {
        "malaysian" | "international" => Some(t),
        _ => None,
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM students ORDER BY student_no",
        STUDENT_COLUMNS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], student_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_no = match required_i64(req, "studentNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match find_student_json(conn, student_no) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_no = match required_i64(req, "studentNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let program = match required_str(req, "program") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let major = match required_str(req, "major") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let intake_term = match required_str(req, "intakeTerm") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let intake_year = match required_i64(req, "intakeYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_type = match parse_opt_string(req.params.get("studentType")) {
        Ok(v) => v.unwrap_or_else(|| "malaysian".to_string()),
        Err(m) => return err(&req.id, "bad_params", format!("studentType {}", m), None),
    };
    let Some(student_type) = validate_student_type(&student_type) else {
        return err(
            &req.id,
            "bad_params",
            "studentType must be 'malaysian' or 'international'",
            None,
        );
    };

    match find_student_id(conn, student_no) {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "already_exists",
                "student number already exists",
                Some(json!({ "studentNo": student_no })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, student_no, name, email, program, major, intake_term,
                              intake_year, student_type, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            student_no,
            &name,
            &email,
            &program,
            &major,
            &intake_term,
            intake_year,
            &student_type,
            &ts,
            &ts,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "studentNo": student_no }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_no = match required_i64(req, "studentNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let existing = match find_student_json(conn, student_no) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let field_str = |key: &str, current: &str| -> Result<String, serde_json::Value> {
        match parse_opt_string(req.params.get(key)) {
            Ok(Some(v)) => Ok(v),
            Ok(None) => Ok(current.to_string()),
            Err(m) => Err(err(&req.id, "bad_params", format!("{} {}", key, m), None)),
        }
    };

    let name = match field_str("name", existing["name"].as_str().unwrap_or_default()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match field_str("email", existing["email"].as_str().unwrap_or_default()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let program = match field_str("program", existing["program"].as_str().unwrap_or_default()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let major = match field_str("major", existing["major"].as_str().unwrap_or_default()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let intake_term = match field_str(
        "intakeTerm",
        existing["intakeTerm"].as_str().unwrap_or_default(),
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let intake_year = match parse_opt_i64(req.params.get("intakeYear")) {
        Ok(v) => v.unwrap_or_else(|| existing["intakeYear"].as_i64().unwrap_or_default()),
        Err(m) => return err(&req.id, "bad_params", format!("intakeYear {}", m), None),
    };
    let student_type = match parse_opt_string(req.params.get("studentType")) {
        Ok(Some(raw)) => match validate_student_type(&raw) {
            Some(v) => v,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "studentType must be 'malaysian' or 'international'",
                    None,
                )
            }
        },
        Ok(None) => existing["studentType"].as_str().unwrap_or("malaysian").to_string(),
        Err(m) => return err(&req.id, "bad_params", format!("studentType {}", m), None),
    };

    if let Err(e) = conn.execute(
        "UPDATE students
         SET name = ?, email = ?, program = ?, major = ?, intake_term = ?,
             intake_year = ?, student_type = ?, updated_at = ?
         WHERE student_no = ?",
        (
            &name,
            &email,
            &program,
            &major,
            &intake_term,
            intake_year,
            &student_type,
            now_ts(),
            student_no,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    match find_student_json(conn, student_no) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_no = match required_i64(req, "studentNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student_id = match find_student_id(conn, student_no) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Unit records first (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM student_units WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_units" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let query = match required_str(req, "query") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let no_prefix = format!("{}%", query);
    let name_fragment = format!("%{}%", query.to_ascii_lowercase());
    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM students
         WHERE CAST(student_no AS TEXT) LIKE ?1 OR LOWER(name) LIKE ?2
         ORDER BY student_no",
        STUDENT_COLUMNS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&no_prefix, &name_fragment), student_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.search" => Some(handle_students_search(state, req)),
        _ => None,
    }
}

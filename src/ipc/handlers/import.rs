use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

struct StudentRow {
    student_no: i64,
    name: String,
    email: String,
    program: String,
    major: String,
    intake_term: String,
    intake_year: i64,
    student_type: String,
}

fn get_i64(obj: &serde_json::Map<String, JsonValue>, key: &str) -> Option<i64> {
    match obj.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64(),
        Some(JsonValue::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn get_str(obj: &serde_json::Map<String, JsonValue>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_student_row(item: &JsonValue) -> Result<StudentRow, String> {
    let Some(obj) = item.as_object() else {
        return Err("row must be an object".to_string());
    };
    let student_no = get_i64(obj, "studentNo").ok_or("studentNo must be an integer")?;
    let name = get_str(obj, "name").ok_or("name must not be empty")?;
    let email = get_str(obj, "email").ok_or("email must not be empty")?;
    let program = get_str(obj, "program").ok_or("program must not be empty")?;
    let major = get_str(obj, "major").ok_or("major must not be empty")?;
    let intake_term = get_str(obj, "intakeTerm").ok_or("intakeTerm must not be empty")?;
    let intake_year = get_i64(obj, "intakeYear").ok_or("intakeYear must be an integer")?;
    let student_type = match get_str(obj, "studentType") {
        None => "malaysian".to_string(),
        Some(raw) => {
            let t = raw.to_ascii_lowercase();
            if t != "malaysian" && t != "international" {
                return Err("studentType must be 'malaysian' or 'international'".to_string());
            }
            t
        }
    };
    Ok(StudentRow {
        student_no,
        name,
        email,
        program,
        major,
        intake_term,
        intake_year,
        student_type,
    })
}

// Bulk sheet upsert: rows that fail validation are reported and skipped so
// one bad line does not sink the rest of the sheet.
fn handle_students_bulk_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(raw_rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut created = 0usize;
    let mut updated = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    let ts = now_ts();

    for (i, item) in raw_rows.iter().enumerate() {
        let row = match parse_student_row(item) {
            Ok(v) => v,
            Err(m) => {
                errors.push(json!({ "row": i, "message": m }));
                continue;
            }
        };

        let update = tx.execute(
            "UPDATE students
             SET name = ?, email = ?, program = ?, major = ?, intake_term = ?,
                 intake_year = ?, student_type = ?, updated_at = ?
             WHERE student_no = ?",
            (
                &row.name,
                &row.email,
                &row.program,
                &row.major,
                &row.intake_term,
                row.intake_year,
                &row.student_type,
                &ts,
                row.student_no,
            ),
        );
        match update {
            Ok(0) => {
                let insert = tx.execute(
                    "INSERT INTO students(id, student_no, name, email, program, major,
                                          intake_term, intake_year, student_type,
                                          created_at, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        row.student_no,
                        &row.name,
                        &row.email,
                        &row.program,
                        &row.major,
                        &row.intake_term,
                        row.intake_year,
                        &row.student_type,
                        &ts,
                        &ts,
                    ),
                );
                match insert {
                    Ok(_) => created += 1,
                    Err(e) => errors.push(json!({ "row": i, "message": e.to_string() })),
                }
            }
            Ok(_) => updated += 1,
            Err(e) => errors.push(json!({ "row": i, "message": e.to_string() })),
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "created": created, "updated": updated, "errors": errors }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.bulkImport" => Some(handle_students_bulk_import(state, req)),
        _ => None,
    }
}

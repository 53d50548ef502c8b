use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_bool, required_i64};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::students::find_student_id;

pub fn student_unit_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let unit_code: Option<String> = row.get(1)?;
    let unit_name: String = row.get(2)?;
    let grade: Option<String> = row.get(3)?;
    let completed: i64 = row.get(4)?;
    let unit_type: Option<String> = row.get(5)?;
    let credit_points: Option<f64> = row.get(6)?;
    Ok(json!({
        "id": id,
        "unitCode": unit_code,
        "unitName": unit_name,
        "grade": grade,
        "completed": completed != 0,
        "unitType": unit_type,
        "creditPoints": credit_points
    }))
}

fn handle_student_units_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT id, unit_code, unit_name, grade, completed, unit_type, credit_points
         FROM student_units
         WHERE student_id = ?
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&student_id], student_unit_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(units) => ok(&req.id, json!({ "studentNo": student_no, "units": units })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct ImportRow {
    unit_code: Option<String>,
    unit_name: String,
    grade: Option<String>,
    completed: bool,
    unit_type: Option<String>,
    credit_points: Option<f64>,
}

// Rows arrive already parsed out of the spreadsheet; this end only checks
// shape. Codes are stored as given and normalized at comparison time.
fn parse_import_row(i: usize, item: &JsonValue) -> Result<ImportRow, String> {
    let Some(obj) = item.as_object() else {
        return Err(format!("rows[{}] must be an object", i));
    };
    let unit_code = obj
        .get("unitCode")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let unit_name = obj
        .get("unitName")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| unit_code.clone())
        .ok_or_else(|| format!("rows[{}] needs a unitName or unitCode", i))?;
    let grade = obj
        .get("grade")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let completed = obj
        .get("completed")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| format!("rows[{}].completed must be a boolean", i))?;
    let unit_type = obj
        .get("unitType")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let credit_points = match obj.get("creditPoints") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => Some(
            v.as_f64()
                .ok_or_else(|| format!("rows[{}].creditPoints must be a number", i))?,
        ),
    };
    Ok(ImportRow {
        unit_code,
        unit_name,
        grade,
        completed,
        unit_type,
        credit_points,
    })
}

fn handle_student_units_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_no = match required_i64(req, "studentNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let overwrite = match parse_bool(req.params.get("overwrite"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("overwrite {}", m), None),
    };
    let Some(raw_rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows", None);
    };

    let mut rows = Vec::with_capacity(raw_rows.len());
    for (i, item) in raw_rows.iter().enumerate() {
        match parse_import_row(i, item) {
            Ok(row) => rows.push(row),
            Err(m) => return err(&req.id, "bad_params", m, None),
        }
    }

    let student_id = match find_student_id(conn, student_no) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if overwrite {
        if let Err(e) = tx.execute("DELETE FROM student_units WHERE student_id = ?", [&student_id])
        {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "student_units" })),
            );
        }
    }

    let ts = now_ts();
    for row in &rows {
        if let Err(e) = tx.execute(
            "INSERT INTO student_units(id, student_id, unit_code, unit_name, grade,
                                       completed, unit_type, credit_points, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &student_id,
                &row.unit_code,
                &row.unit_name,
                &row.grade,
                row.completed as i64,
                &row.unit_type,
                row.credit_points,
                &ts,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "student_units" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "studentNo": student_no, "imported": rows.len() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "studentUnits.list" => Some(handle_student_units_list(state, req)),
        "studentUnits.import" => Some(handle_student_units_import(state, req)),
        _ => None,
    }
}

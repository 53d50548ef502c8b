use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_bool, parse_opt_string, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::normalize_code;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

const UNIT_TYPES: [&str; 6] = ["Core", "Major", "Elective", "MPU", "WIL", "Special"];
const SEMESTERS: [&str; 4] = ["1", "2", "summer", "winter"];

fn canonical_unit_type(raw: &str) -> Option<String> {
    let t = raw.trim();
    UNIT_TYPES
        .iter()
        .find(|u| u.eq_ignore_ascii_case(t))
        .map(|u| u.to_string())
}

fn canonical_semester(raw: &str) -> Option<String> {
    let t = raw.trim().to_ascii_lowercase();
    SEMESTERS.contains(&t.as_str()).then_some(t)
}

struct TemplateRow {
    year: i64,
    semester: String,
    unit_code: Option<String>,
    unit_name: String,
    prerequisites: Option<String>,
    unit_type: String,
}

fn parse_template_rows(raw: Option<&JsonValue>) -> Result<Vec<TemplateRow>, String> {
    let Some(arr) = raw.and_then(|v| v.as_array()) else {
        return Err("missing units".to_string());
    };
    if arr.is_empty() {
        return Err("units must contain at least one row".to_string());
    }

    let mut out = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(format!("units[{}] must be an object", i));
        };
        let year = obj
            .get("year")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| format!("units[{}].year must be an integer", i))?;
        if !(1..=4).contains(&year) {
            return Err(format!("units[{}].year must be 1-4", i));
        }
        let semester = obj
            .get("semester")
            .and_then(|v| v.as_str())
            .and_then(canonical_semester)
            .ok_or_else(|| format!("units[{}].semester must be 1, 2, summer or winter", i))?;
        let unit_code = normalize_code(obj.get("unitCode").and_then(|v| v.as_str()));
        let unit_name = obj
            .get("unitName")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("units[{}].unitName must not be empty", i))?;
        let prerequisites = obj
            .get("prerequisites")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let unit_type = obj
            .get("unitType")
            .and_then(|v| v.as_str())
            .and_then(|s| canonical_unit_type(s))
            .ok_or_else(|| {
                format!("units[{}].unitType must be one of {}", i, UNIT_TYPES.join(", "))
            })?;
        out.push(TemplateRow {
            year,
            semester,
            unit_code,
            unit_name,
            prerequisites,
            unit_type,
        });
    }
    Ok(out)
}

fn find_planner_id(
    conn: &Connection,
    program: &str,
    major: &str,
    intake_year: i64,
    intake_semester: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM study_planners
         WHERE program = ? AND major = ? AND intake_year = ? AND intake_semester = ?",
        (program, major, intake_year, intake_semester),
        |r| r.get(0),
    )
    .optional()
}

fn handle_planners_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
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
    let intake_year = match required_i64(req, "intakeYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let intake_semester = match required_str(req, "intakeSemester") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let overwrite = match parse_bool(req.params.get("overwrite"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("overwrite {}", m), None),
    };
    let rows = match parse_template_rows(req.params.get("units")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let existing = match find_planner_id(conn, &program, &major, intake_year, &intake_semester) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() && !overwrite {
        return err(
            &req.id,
            "already_exists",
            "a planner for this intake already exists",
            Some(json!({ "existing": true })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Some(old_id) = existing {
        // Units first (foreign key).
        if let Err(e) = tx.execute(
            "DELETE FROM study_planner_units WHERE planner_id = ?",
            [&old_id],
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "study_planner_units" })),
            );
        }
        if let Err(e) = tx.execute("DELETE FROM study_planners WHERE id = ?", [&old_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "study_planners" })),
            );
        }
    }

    let planner_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO study_planners(id, program, major, intake_year, intake_semester, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &planner_id,
            &program,
            &major,
            intake_year,
            &intake_semester,
            now_ts(),
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "study_planners" })),
        );
    }

    for (i, row) in rows.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO study_planner_units(id, planner_id, sort_order, year, semester,
                                             unit_code, unit_name, prerequisites, unit_type)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &planner_id,
                i as i64,
                row.year,
                &row.semester,
                &row.unit_code,
                &row.unit_name,
                &row.prerequisites,
                &row.unit_type,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "study_planner_units" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "plannerId": planner_id, "unitCount": rows.len() }),
    )
}

fn handle_planners_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, program, major, intake_year, intake_semester
         FROM study_planners
         ORDER BY program, major, intake_year, intake_semester",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let program: String = row.get(1)?;
            let major: String = row.get(2)?;
            let intake_year: i64 = row.get(3)?;
            let intake_semester: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "program": program,
                "major": major,
                "intakeYear": intake_year,
                "intakeSemester": intake_semester
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(planners) => ok(&req.id, json!({ "planners": planners })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn planner_unit_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let year: i64 = row.get(1)?;
    let semester: String = row.get(2)?;
    let unit_code: Option<String> = row.get(3)?;
    let unit_name: String = row.get(4)?;
    let prerequisites: Option<String> = row.get(5)?;
    let unit_type: String = row.get(6)?;
    let replacement_code: Option<String> = row.get(7)?;
    let replacement_name: Option<String> = row.get(8)?;
    Ok(json!({
        "id": id,
        "year": year,
        "semester": semester,
        "unitCode": unit_code,
        "unitName": unit_name,
        "prerequisites": prerequisites,
        "unitType": unit_type,
        "replacementCode": replacement_code,
        "replacementName": replacement_name
    }))
}

fn handle_planners_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
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
    let intake_year = match required_i64(req, "intakeYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let intake_semester = match required_str(req, "intakeSemester") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let planner_id = match find_planner_id(conn, &program, &major, intake_year, &intake_semester) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "no matching study planner found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, year, semester, unit_code, unit_name, prerequisites, unit_type,
                replacement_code, replacement_name
         FROM study_planner_units
         WHERE planner_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let units = stmt
        .query_map([&planner_id], planner_unit_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match units {
        Ok(units) => ok(
            &req.id,
            json!({
                "planner": {
                    "id": planner_id,
                    "program": program,
                    "major": major,
                    "intakeYear": intake_year,
                    "intakeSemester": intake_semester
                },
                "units": units
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn lookup_catalogue_unit(
    conn: &Connection,
    code: &str,
) -> rusqlite::Result<Option<(String, String, Option<String>)>> {
    conn.query_row(
        "SELECT unit_code, unit_name, prerequisites FROM units WHERE unit_code = ?",
        [code],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()
}

fn handle_planners_update_unit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let field = match required_str(req, "field") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM study_planner_units WHERE id = ?",
            [&unit_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "planner unit not found", None);
    }

    let value = req.params.get("value");

    let result = match field.as_str() {
        "unitCode" => {
            let Some(code) = value.and_then(|v| v.as_str()).and_then(|s| normalize_code(Some(s)))
            else {
                return err(&req.id, "bad_params", "value must be a unit code", None);
            };
            // The catalogue is the source of truth for name and
            // prerequisites; an unknown code is rejected, not guessed at.
            let unit = match lookup_catalogue_unit(conn, &code) {
                Ok(Some(v)) => v,
                Ok(None) => {
                    return err(
                        &req.id,
                        "not_found",
                        format!("unit code '{}' not found in the catalogue", code),
                        None,
                    )
                }
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            conn.execute(
                "UPDATE study_planner_units
                 SET unit_code = ?, unit_name = ?, prerequisites = ?
                 WHERE id = ?",
                (&unit.0, &unit.1, &unit.2, &unit_id),
            )
        }
        "unitType" => {
            let Some(unit_type) = value.and_then(|v| v.as_str()).and_then(canonical_unit_type)
            else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("value must be one of {}", UNIT_TYPES.join(", ")),
                    None,
                );
            };
            conn.execute(
                "UPDATE study_planner_units SET unit_type = ? WHERE id = ?",
                (&unit_type, &unit_id),
            )
        }
        "year" => {
            let year = match value {
                Some(JsonValue::Number(n)) => n.as_i64(),
                Some(JsonValue::String(s)) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            let Some(year) = year.filter(|y| (1..=4).contains(y)) else {
                return err(&req.id, "bad_params", "value must be a year between 1 and 4", None);
            };
            conn.execute(
                "UPDATE study_planner_units SET year = ? WHERE id = ?",
                (year, &unit_id),
            )
        }
        "semester" => {
            let Some(semester) = value.and_then(|v| v.as_str()).and_then(canonical_semester)
            else {
                return err(
                    &req.id,
                    "bad_params",
                    "value must be 1, 2, summer or winter",
                    None,
                );
            };
            conn.execute(
                "UPDATE study_planner_units SET semester = ? WHERE id = ?",
                (&semester, &unit_id),
            )
        }
        "replacementCode" => {
            let code = match parse_opt_string(value) {
                Ok(v) => v.and_then(|s| normalize_code(Some(&s))),
                Err(m) => return err(&req.id, "bad_params", format!("value {}", m), None),
            };
            match code {
                None => conn.execute(
                    "UPDATE study_planner_units
                     SET replacement_code = NULL, replacement_name = NULL
                     WHERE id = ?",
                    [&unit_id],
                ),
                Some(code) => {
                    let name = match lookup_catalogue_unit(conn, &code) {
                        Ok(v) => v.map(|(_, name, _)| name),
                        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                    };
                    conn.execute(
                        "UPDATE study_planner_units
                         SET replacement_code = ?, replacement_name = ?
                         WHERE id = ?",
                        (&code, &name, &unit_id),
                    )
                }
            }
        }
        other => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid field: {}", other),
                None,
            )
        }
    };

    match result {
        Ok(_) => ok(&req.id, json!({ "unitId": unit_id, "field": field })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_planners_delete_unit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let affected = match conn.execute("DELETE FROM study_planner_units WHERE id = ?", [&unit_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "planner unit not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "planners.create" => Some(handle_planners_create(state, req)),
        "planners.list" => Some(handle_planners_list(state, req)),
        "planners.view" => Some(handle_planners_view(state, req)),
        "planners.updateUnit" => Some(handle_planners_update_unit(state, req)),
        "planners.deleteUnit" => Some(handle_planners_delete_unit(state, req)),
        _ => None,
    }
}

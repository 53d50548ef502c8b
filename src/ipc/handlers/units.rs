use crate::graduation::DEFAULT_UNIT_CREDITS;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_opt_f64, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::normalize_code;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn unit_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let unit_code: String = row.get(1)?;
    let unit_name: String = row.get(2)?;
    let prerequisites: Option<String> = row.get(3)?;
    let concurrent: Option<String> = row.get(4)?;
    let credit_points: f64 = row.get(5)?;
    Ok(json!({
        "id": id,
        "unitCode": unit_code,
        "unitName": unit_name,
        "prerequisites": prerequisites,
        "concurrentPrerequisites": concurrent,
        "creditPoints": credit_points
    }))
}

fn handle_units_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, unit_code, unit_name, prerequisites, concurrent_prerequisites, credit_points
         FROM units
         ORDER BY unit_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], unit_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(units) => ok(&req.id, json!({ "units": units })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_units_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let raw_code = match required_str(req, "unitCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Catalogue codes are stored normalized; all lookups join on that form.
    let Some(unit_code) = normalize_code(Some(&raw_code)) else {
        return err(&req.id, "bad_params", "unitCode must not be empty", None);
    };
    let unit_name = match required_str(req, "unitName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let prerequisites = match parse_opt_string(req.params.get("prerequisites")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("prerequisites {}", m), None),
    };
    let concurrent = match parse_opt_string(req.params.get("concurrentPrerequisites")) {
        Ok(v) => v,
        Err(m) => {
            return err(
                &req.id,
                "bad_params",
                format!("concurrentPrerequisites {}", m),
                None,
            )
        }
    };
    let credit_points = match parse_opt_f64(req.params.get("creditPoints")) {
        Ok(v) => v.unwrap_or(DEFAULT_UNIT_CREDITS),
        Err(m) => return err(&req.id, "bad_params", format!("creditPoints {}", m), None),
    };
    if credit_points <= 0.0 {
        return err(&req.id, "bad_params", "creditPoints must be positive", None);
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM units WHERE unit_code = ?", [&unit_code], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(&req.id, "already_exists", "unit code already exists", None);
    }

    let unit_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO units(id, unit_code, unit_name, prerequisites, concurrent_prerequisites,
                           credit_points, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &unit_id,
            &unit_code,
            &unit_name,
            &prerequisites,
            &concurrent,
            credit_points,
            &ts,
            &ts,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "units" })),
        );
    }

    ok(&req.id, json!({ "unitId": unit_id, "unitCode": unit_code }))
}

struct UnitRow {
    unit_name: String,
    prerequisites: Option<String>,
    concurrent: Option<String>,
    credit_points: f64,
}

fn load_unit(conn: &Connection, unit_id: &str) -> rusqlite::Result<Option<UnitRow>> {
    conn.query_row(
        "SELECT unit_name, prerequisites, concurrent_prerequisites, credit_points
         FROM units WHERE id = ?",
        [unit_id],
        |r| {
            Ok(UnitRow {
                unit_name: r.get(0)?,
                prerequisites: r.get(1)?,
                concurrent: r.get(2)?,
                credit_points: r.get(3)?,
            })
        },
    )
    .optional()
}

fn handle_units_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let existing = match load_unit(conn, &unit_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "unit not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let unit_name = match parse_opt_string(req.params.get("unitName")) {
        Ok(v) => v.unwrap_or(existing.unit_name),
        Err(m) => return err(&req.id, "bad_params", format!("unitName {}", m), None),
    };
    let prerequisites = match parse_opt_string(req.params.get("prerequisites")) {
        Ok(Some(v)) => Some(v),
        Ok(None) if req.params.get("prerequisites").is_some() => None,
        Ok(None) => existing.prerequisites,
        Err(m) => return err(&req.id, "bad_params", format!("prerequisites {}", m), None),
    };
    let concurrent = match parse_opt_string(req.params.get("concurrentPrerequisites")) {
        Ok(Some(v)) => Some(v),
        Ok(None) if req.params.get("concurrentPrerequisites").is_some() => None,
        Ok(None) => existing.concurrent,
        Err(m) => {
            return err(
                &req.id,
                "bad_params",
                format!("concurrentPrerequisites {}", m),
                None,
            )
        }
    };
    let credit_points = match parse_opt_f64(req.params.get("creditPoints")) {
        Ok(v) => v.unwrap_or(existing.credit_points),
        Err(m) => return err(&req.id, "bad_params", format!("creditPoints {}", m), None),
    };
    if credit_points <= 0.0 {
        return err(&req.id, "bad_params", "creditPoints must be positive", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE units
         SET unit_name = ?, prerequisites = ?, concurrent_prerequisites = ?,
             credit_points = ?, updated_at = ?
         WHERE id = ?",
        (
            &unit_name,
            &prerequisites,
            &concurrent,
            credit_points,
            now_ts(),
            &unit_id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "unitId": unit_id }))
}

fn handle_units_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let affected = match conn.execute("DELETE FROM units WHERE id = ?", [&unit_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "unit not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "units.list" => Some(handle_units_list(state, req)),
        "units.create" => Some(handle_units_create(state, req)),
        "units.update" => Some(handle_units_update(state, req)),
        "units.delete" => Some(handle_units_delete(state, req)),
        _ => None,
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_programs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Include counts so the admin screens can show a useful overview.
    let mut stmt = match conn.prepare(
        "SELECT
           p.id,
           p.name,
           (SELECT COUNT(*) FROM majors m WHERE m.program_id = p.id) AS major_count,
           (SELECT COUNT(*) FROM students s WHERE s.program = p.name) AS student_count
         FROM programs p
         ORDER BY p.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let major_count: i64 = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "majorCount": major_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(programs) => ok(&req.id, json!({ "programs": programs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_programs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM programs WHERE name = ?", [&name], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(&req.id, "already_exists", "program already exists", None);
    }

    let program_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO programs(id, name, created_at) VALUES(?, ?, ?)",
        (&program_id, &name, now_ts()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "programs" })),
        );
    }

    ok(&req.id, json!({ "programId": program_id, "name": name }))
}

fn handle_programs_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let program_id = match required_str(req, "programId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM programs WHERE id = ?", [&program_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "program not found", None);
    }

    let major_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM majors WHERE program_id = ?",
        [&program_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if major_count > 0 {
        return err(
            &req.id,
            "has_majors",
            "delete the program's majors first",
            Some(json!({ "majorCount": major_count })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM programs WHERE id = ?", [&program_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_majors_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let program_id = match required_str(req, "programId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name FROM majors WHERE program_id = ? ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&program_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(majors) => ok(&req.id, json!({ "majors": majors })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_majors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let program_id = match required_str(req, "programId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let program: Option<i64> = match conn
        .query_row("SELECT 1 FROM programs WHERE id = ?", [&program_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if program.is_none() {
        return err(&req.id, "not_found", "program not found", None);
    }

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM majors WHERE program_id = ? AND name = ?",
            (&program_id, &name),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(&req.id, "already_exists", "major already exists", None);
    }

    let major_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO majors(id, program_id, name, created_at) VALUES(?, ?, ?, ?)",
        (&major_id, &program_id, &name, now_ts()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "majors" })),
        );
    }

    ok(&req.id, json!({ "majorId": major_id, "name": name }))
}

fn handle_majors_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let major_id = match required_str(req, "majorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let affected = match conn.execute("DELETE FROM majors WHERE id = ?", [&major_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "major not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_intake_years_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT DISTINCT intake_year FROM students ORDER BY intake_year DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(years) => ok(&req.id, json!({ "intakeYears": years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programs.list" => Some(handle_programs_list(state, req)),
        "programs.create" => Some(handle_programs_create(state, req)),
        "programs.delete" => Some(handle_programs_delete(state, req)),
        "majors.list" => Some(handle_majors_list(state, req)),
        "majors.create" => Some(handle_majors_create(state, req)),
        "majors.delete" => Some(handle_majors_delete(state, req)),
        "intakeYears.list" => Some(handle_intake_years_list(state, req)),
        _ => None,
    }
}

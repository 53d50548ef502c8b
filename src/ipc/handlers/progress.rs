use crate::graduation::{self, DEFAULT_UNIT_CREDITS};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, effective_replacement, normalize_code, AlignedRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};

use super::students::find_student_json;

struct StudentContext {
    student: serde_json::Value,
    student_id: String,
    malaysian: bool,
}

fn load_student_context(
    conn: &Connection,
    req: &Request,
    student_no: i64,
) -> Result<StudentContext, serde_json::Value> {
    let student = match find_student_json(conn, student_no) {
        Ok(Some(v)) => v,
        Ok(None) => return Err(err(&req.id, "not_found", "student not found", None)),
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let student_id = student["id"].as_str().unwrap_or_default().to_string();
    let malaysian = student["studentType"].as_str() == Some("malaysian");
    Ok(StudentContext {
        student,
        student_id,
        malaysian,
    })
}

/// The template that applies to a student: the planner matching their
/// program, major and intake, with MPU slots dropped for non-Malaysian
/// students (those units do not apply to international intakes). No matching
/// planner is not an error; progress degrades to an all-extras view.
fn load_applicable_planner(
    conn: &Connection,
    req: &Request,
    student: &serde_json::Value,
    malaysian: bool,
) -> Result<Vec<reconcile::PlannerUnit>, serde_json::Value> {
    let planner_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM study_planners
             WHERE program = ? AND major = ? AND intake_year = ? AND intake_semester = ?",
            (
                student["program"].as_str().unwrap_or_default(),
                student["major"].as_str().unwrap_or_default(),
                student["intakeYear"].as_i64().unwrap_or_default(),
                student["intakeTerm"].as_str().unwrap_or_default(),
            ),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let Some(planner_id) = planner_id else {
        return Ok(Vec::new());
    };

    let mut stmt = match conn.prepare(
        "SELECT id, year, semester, unit_code, unit_name, prerequisites, unit_type,
                replacement_code, replacement_name
         FROM study_planner_units
         WHERE planner_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let units = stmt
        .query_map([&planner_id], |row| {
            Ok(reconcile::PlannerUnit {
                id: row.get(0)?,
                year: row.get(1)?,
                semester: row.get(2)?,
                unit_code: row.get(3)?,
                unit_name: row.get(4)?,
                prerequisites: row.get(5)?,
                unit_type: row.get(6)?,
                replacement_code: row.get(7)?,
                replacement_name: row.get(8)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match units {
        Ok(units) => Ok(units
            .into_iter()
            .filter(|u| malaysian || u.unit_type != "MPU")
            .collect()),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

struct StudentUnitRec {
    unit: reconcile::StudentUnit,
    credit_points: Option<f64>,
}

fn load_student_units(
    conn: &Connection,
    req: &Request,
    student_id: &str,
) -> Result<Vec<StudentUnitRec>, serde_json::Value> {
    let mut stmt = match conn.prepare(
        "SELECT id, unit_code, unit_name, grade, completed, unit_type, credit_points
         FROM student_units
         WHERE student_id = ?
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let rows = stmt
        .query_map([student_id], |row| {
            let completed: i64 = row.get(4)?;
            Ok(StudentUnitRec {
                unit: reconcile::StudentUnit {
                    id: row.get(0)?,
                    unit_code: row.get(1)?,
                    unit_name: row.get(2)?,
                    grade: row.get(3)?,
                    completed: completed != 0,
                    unit_type: row.get(5)?,
                },
                credit_points: row.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    rows.map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn planner_view_json(rows: &[AlignedRow]) -> Vec<serde_json::Value> {
    rows.iter()
        .filter_map(|row| {
            let slot = row.planner.as_ref()?;
            let completed = row.matched
                && row.student.as_ref().map(|s| s.completed).unwrap_or(false);
            Some(json!({
                "id": slot.id,
                "year": slot.year,
                "semester": slot.semester,
                "unitCode": slot.unit_code,
                "unitName": slot.unit_name,
                "prerequisites": slot.prerequisites,
                "unitType": slot.unit_type,
                "replacedByCode": effective_replacement(slot),
                "replacedByName": slot.replacement_name,
                "matched": row.matched,
                "matchedUnitCode": row.student.as_ref().and_then(|s| s.unit_code.clone()),
                "grade": row.student.as_ref().and_then(|s| s.grade.clone()),
                "completed": completed
            }))
        })
        .collect()
}

fn handle_students_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_no = match required_i64(req, "studentNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let ctx = match load_student_context(conn, req, student_no) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let planner = match load_applicable_planner(conn, req, &ctx.student, ctx.malaysian) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let records = match load_student_units(conn, req, &ctx.student_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let units: Vec<reconcile::StudentUnit> = records.iter().map(|r| r.unit.clone()).collect();
    let out = reconcile::reconcile(&planner, &units);

    let extra_ids: HashSet<&str> = out
        .rows
        .iter()
        .filter(|r| r.extra)
        .filter_map(|r| r.student.as_ref().map(|s| s.id.as_str()))
        .collect();

    let student_units: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.unit.id,
                "unitCode": r.unit.unit_code,
                "unitName": r.unit.unit_name,
                "grade": r.unit.grade,
                "completed": r.unit.completed,
                "unitType": r.unit.unit_type,
                "creditPoints": r.credit_points,
                "extra": extra_ids.contains(r.unit.id.as_str())
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "student": ctx.student,
            "plannerUnits": planner_view_json(&out.rows),
            "studentUnits": student_units,
            "summary": serde_json::to_value(&out.summary).unwrap_or_else(|_| json!({}))
        }),
    )
}

fn catalogue_credit_map(
    conn: &Connection,
    req: &Request,
) -> Result<HashMap<String, f64>, serde_json::Value> {
    let mut stmt = match conn.prepare("SELECT unit_code, credit_points FROM units") {
        Ok(s) => s,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let rows = stmt
        .query_map([], |row| {
            let code: String = row.get(0)?;
            let credits: f64 = row.get(1)?;
            Ok((code, credits))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(rows) => Ok(rows
            .into_iter()
            .filter_map(|(code, credits)| normalize_code(Some(&code)).map(|c| (c, credits)))
            .collect()),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn handle_students_graduate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_no = match required_i64(req, "studentNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let ctx = match load_student_context(conn, req, student_no) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let planner = match load_applicable_planner(conn, req, &ctx.student, ctx.malaysian) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let records = match load_student_units(conn, req, &ctx.student_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let credit_map = match catalogue_credit_map(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Row credit value wins; the catalogue fills gaps; anything else earns
    // the standard unit weight.
    let total_credits: f64 = records
        .iter()
        .filter(|r| r.unit.completed)
        .map(|r| {
            r.credit_points.unwrap_or_else(|| {
                normalize_code(r.unit.unit_code.as_deref())
                    .and_then(|code| credit_map.get(&code).copied())
                    .unwrap_or(DEFAULT_UNIT_CREDITS)
            })
        })
        .sum();

    let units: Vec<reconcile::StudentUnit> = records.iter().map(|r| r.unit.clone()).collect();
    let out = reconcile::reconcile(&planner, &units);
    let report = graduation::evaluate(&out.rows, total_credits, ctx.malaysian);

    if let Err(e) = conn.execute(
        "UPDATE students SET credit_points = ?, graduated = ?, updated_at = ?
         WHERE student_no = ?",
        (
            report.total_credits,
            report.can_graduate as i64,
            now_ts(),
            student_no,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let student = match find_student_json(conn, student_no) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut result = serde_json::to_value(&report).unwrap_or_else(|_| json!({}));
    result["student"] = student;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.progress" => Some(handle_students_progress(state, req)),
        "students.graduate" => Some(handle_students_graduate(state, req)),
        _ => None,
    }
}

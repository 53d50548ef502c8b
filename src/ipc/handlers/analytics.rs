use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::reconcile::normalize_code;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

const GRADE_BUCKETS: [&str; 7] = ["HD", "D", "C", "P", "N", "TRF", "NAN"];

// Anything outside the recognised scale (and ungraded rows) lands in NAN so
// the distribution always sums to the record count.
fn grade_bucket(grade: Option<&str>) -> &'static str {
    let Some(normalized) = normalize_code(grade) else {
        return "NAN";
    };
    match normalized.as_str() {
        "HD" => "HD",
        "D" => "D",
        "C" => "C",
        "P" => "P",
        "N" => "N",
        "TRF" => "TRF",
        _ => "NAN",
    }
}

// Swinburne grade points; TRF and unrecognised grades carry no points and
// are excluded from averages.
fn grade_points(bucket: &str) -> Option<f64> {
    match bucket {
        "HD" => Some(4.0),
        "D" => Some(3.0),
        "C" => Some(2.0),
        "P" => Some(1.0),
        "N" => Some(0.0),
        _ => None,
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let students_by_year = match query_rows(
        conn,
        "SELECT intake_year, COUNT(*) FROM students GROUP BY intake_year ORDER BY intake_year",
        |row| {
            let year: i64 = row.get(0)?;
            let total: i64 = row.get(1)?;
            Ok(json!({ "intakeYear": year, "totalStudents": total }))
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let graduation_by_year = match query_rows(
        conn,
        "SELECT intake_year,
                SUM(CASE WHEN graduated != 0 THEN 1 ELSE 0 END),
                SUM(CASE WHEN graduated = 0 THEN 1 ELSE 0 END)
         FROM students GROUP BY intake_year ORDER BY intake_year",
        |row| {
            let year: i64 = row.get(0)?;
            let graduated: i64 = row.get(1)?;
            let not_graduated: i64 = row.get(2)?;
            Ok(json!({
                "intakeYear": year,
                "graduated": graduated,
                "notGraduated": not_graduated
            }))
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let students_by_program_major = match query_rows(
        conn,
        "SELECT program, major, COUNT(*) FROM students
         GROUP BY program, major ORDER BY program, major",
        |row| {
            let program: String = row.get(0)?;
            let major: String = row.get(1)?;
            let total: i64 = row.get(2)?;
            Ok(json!({ "program": program, "major": major, "totalStudents": total }))
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    ok(
        &req.id,
        json!({
            "studentsByYear": students_by_year,
            "graduationByYear": graduation_by_year,
            "studentsByProgramMajor": students_by_program_major
        }),
    )
}

fn handle_graduation_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let rows = match query_rows(
        conn,
        "SELECT program,
                COUNT(*),
                SUM(CASE WHEN graduated != 0 THEN 1 ELSE 0 END),
                SUM(CASE WHEN graduated = 0 THEN 1 ELSE 0 END)
         FROM students GROUP BY program ORDER BY program",
        |row| {
            let program: String = row.get(0)?;
            let total: i64 = row.get(1)?;
            let graduated: i64 = row.get(2)?;
            let not_graduated: i64 = row.get(3)?;
            Ok(json!({
                "program": program,
                "totalStudents": total,
                "graduated": graduated,
                "notGraduated": not_graduated
            }))
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    ok(&req.id, json!({ "programs": rows }))
}

fn handle_grade_distribution(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let unit_filter = normalize_code(req.params.get("unitCode").and_then(|v| v.as_str()));

    let grades_rows = match query_rows(
        conn,
        "SELECT unit_code, grade FROM student_units",
        |row| {
            let code: Option<String> = row.get(0)?;
            let grade: Option<String> = row.get(1)?;
            Ok((code, grade))
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let mut counts: BTreeMap<&'static str, i64> = BTreeMap::new();
    for bucket in GRADE_BUCKETS {
        counts.insert(bucket, 0);
    }
    let mut available: Vec<String> = Vec::new();
    for (code, grade) in &grades_rows {
        let code = normalize_code(code.as_deref());
        if let Some(c) = code.as_ref() {
            if !available.contains(c) {
                available.push(c.clone());
            }
        }
        if let Some(filter) = unit_filter.as_ref() {
            if code.as_deref() != Some(filter.as_str()) {
                continue;
            }
        }
        *counts.entry(grade_bucket(grade.as_deref())).or_insert(0) += 1;
    }
    available.sort();

    let mut grades = serde_json::Map::new();
    for bucket in GRADE_BUCKETS {
        grades.insert(
            bucket.to_string(),
            json!(counts.get(bucket).copied().unwrap_or(0)),
        );
    }

    ok(
        &req.id,
        json!({ "grades": grades, "availableUnits": available }),
    )
}

fn handle_unit_performance(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let rows = match query_rows(
        conn,
        "SELECT unit_code, grade, completed FROM student_units WHERE unit_code IS NOT NULL",
        |row| {
            let code: String = row.get(0)?;
            let grade: Option<String> = row.get(1)?;
            let completed: i64 = row.get(2)?;
            Ok((code, grade, completed != 0))
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    struct Perf {
        attempts: i64,
        completed: i64,
        point_sum: f64,
        point_count: i64,
    }
    let mut by_code: BTreeMap<String, Perf> = BTreeMap::new();
    for (code, grade, completed) in rows {
        let Some(code) = normalize_code(Some(&code)) else {
            continue;
        };
        let entry = by_code.entry(code).or_insert(Perf {
            attempts: 0,
            completed: 0,
            point_sum: 0.0,
            point_count: 0,
        });
        entry.attempts += 1;
        if completed {
            entry.completed += 1;
        }
        if let Some(points) = grade_points(grade_bucket(grade.as_deref())) {
            entry.point_sum += points;
            entry.point_count += 1;
        }
    }

    let units: Vec<serde_json::Value> = by_code
        .into_iter()
        .map(|(code, p)| {
            let avg = if p.point_count > 0 {
                round1(p.point_sum / p.point_count as f64)
            } else {
                0.0
            };
            let completion = if p.attempts > 0 {
                round1(100.0 * p.completed as f64 / p.attempts as f64)
            } else {
                0.0
            };
            json!({
                "unitCode": code,
                "avgGradePoints": avg,
                "completionRate": completion,
                "attempts": p.attempts
            })
        })
        .collect();

    ok(&req.id, json!({ "units": units }))
}

fn handle_trends(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let rows = match query_rows(
        conn,
        "SELECT intake_year,
                SUM(CASE WHEN graduated != 0 THEN 1 ELSE 0 END),
                SUM(CASE WHEN graduated = 0 THEN 1 ELSE 0 END)
         FROM students GROUP BY intake_year ORDER BY intake_year",
        |row| {
            let year: i64 = row.get(0)?;
            let graduated: i64 = row.get(1)?;
            let not_graduated: i64 = row.get(2)?;
            Ok(json!({
                "year": year,
                "graduated": graduated,
                "notGraduated": not_graduated
            }))
        },
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    ok(&req.id, json!({ "trends": rows }))
}

fn query_rows<T, F>(conn: &Connection, sql: &str, map: F) -> Result<Vec<T>, String>
where
    F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| map(row))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;
    Ok(rows)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.overview" => Some(handle_overview(state, req)),
        "analytics.graduationSummary" => Some(handle_graduation_summary(state, req)),
        "analytics.gradeDistribution" => Some(handle_grade_distribution(state, req)),
        "analytics.unitPerformance" => Some(handle_unit_performance(state, req)),
        "analytics.trends" => Some(handle_trends(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_bucket_case_insensitively() {
        assert_eq!(grade_bucket(Some("hd")), "HD");
        assert_eq!(grade_bucket(Some(" P ")), "P");
        assert_eq!(grade_bucket(Some("TRF")), "TRF");
    }

    #[test]
    fn unknown_and_missing_grades_fall_to_nan() {
        assert_eq!(grade_bucket(None), "NAN");
        assert_eq!(grade_bucket(Some("")), "NAN");
        assert_eq!(grade_bucket(Some("A+")), "NAN");
    }

    #[test]
    fn only_scored_grades_carry_points() {
        assert_eq!(grade_points("HD"), Some(4.0));
        assert_eq!(grade_points("N"), Some(0.0));
        assert_eq!(grade_points("TRF"), None);
        assert_eq!(grade_points("NAN"), None);
    }
}

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_sspsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sspsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

#[test]
fn bulk_student_import_upserts_and_reports_bad_rows() {
    let workspace = temp_dir("ssps-bulk-students");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.bulkImport",
        json!({
            "rows": [
                { "studentNo": 102334556, "name": "Aisyah Binti Rahman",
                  "email": "aisyah@example.edu", "program": "Bachelor of Computer Science",
                  "major": "Software Development", "intakeTerm": "1", "intakeYear": 2023 },
                { "studentNo": 104455667, "name": "Tan Wei Ming",
                  "email": "weiming@example.edu", "program": "Bachelor of Computer Science",
                  "major": "Data Science", "intakeTerm": "2", "intakeYear": "2024",
                  "studentType": "international" },
                { "studentNo": 105566778, "name": "No Email Given",
                  "program": "Bachelor of Computer Science",
                  "major": "Data Science", "intakeTerm": "1", "intakeYear": 2024 }
            ]
        }),
    );
    assert_eq!(imported["created"], json!(2));
    assert_eq!(imported["updated"], json!(0));
    let errors = imported["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["row"], json!(2));

    // The bad row was skipped, not persisted.
    let listed = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(listed["students"].as_array().map(|a| a.len()), Some(2));

    // A second sheet with the same numbers updates in place.
    let reimported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.bulkImport",
        json!({
            "rows": [
                { "studentNo": 102334556, "name": "Aisyah Rahman",
                  "email": "aisyah@example.edu", "program": "Bachelor of Computer Science",
                  "major": "Software Development", "intakeTerm": "1", "intakeYear": 2023 }
            ]
        }),
    );
    assert_eq!(reimported["created"], json!(0));
    assert_eq!(reimported["updated"], json!(1));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.get",
        json!({ "studentNo": 102334556 }),
    );
    assert_eq!(fetched["student"]["name"], json!("Aisyah Rahman"));
}

#[test]
fn unit_record_import_appends_or_overwrites() {
    let workspace = temp_dir("ssps-unit-import");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "studentNo": 102334556,
            "name": "Aisyah Binti Rahman",
            "email": "aisyah@example.edu",
            "program": "Bachelor of Computer Science",
            "major": "Software Development",
            "intakeTerm": "1",
            "intakeYear": 2023
        }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "studentUnits.import",
        json!({
            "studentNo": 102334556,
            "rows": [
                { "unitCode": "ICT10001", "grade": "P", "completed": true },
                { "unitCode": "COS10009", "grade": "C", "completed": true }
            ]
        }),
    );
    assert_eq!(first["imported"], json!(2));

    // Default is append.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "studentUnits.import",
        json!({
            "studentNo": 102334556,
            "rows": [
                { "unitCode": "COS20007", "grade": "D", "completed": true }
            ]
        }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "studentUnits.list",
        json!({ "studentNo": 102334556 }),
    );
    assert_eq!(listed["units"].as_array().map(|a| a.len()), Some(3));

    // Overwrite replaces the whole transcript.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "studentUnits.import",
        json!({
            "studentNo": 102334556,
            "overwrite": true,
            "rows": [
                { "unitCode": "SWE30003", "grade": "HD", "completed": true }
            ]
        }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "studentUnits.list",
        json!({ "studentNo": 102334556 }),
    );
    let units = listed["units"].as_array().expect("units");
    assert_eq!(units.len(), 1);
    assert_eq!(units[0]["unitCode"], json!("SWE30003"));
    assert_eq!(units[0]["grade"], json!("HD"));
    assert_eq!(units[0]["completed"], json!(true));
}

#[test]
fn unit_record_import_validates_shape() {
    let workspace = temp_dir("ssps-unit-import-bad");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "studentNo": 102334556,
            "name": "Aisyah Binti Rahman",
            "email": "aisyah@example.edu",
            "program": "Bachelor of Computer Science",
            "major": "Software Development",
            "intakeTerm": "1",
            "intakeYear": 2023
        }),
    );

    // completed is mandatory per row; the whole batch is rejected.
    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "studentUnits.import",
        json!({
            "studentNo": 102334556,
            "rows": [
                { "unitCode": "ICT10001", "grade": "P", "completed": true },
                { "unitCode": "COS10009", "grade": "C" }
            ]
        }),
    );
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(error_code(&bad), "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "studentUnits.list",
        json!({ "studentNo": 102334556 }),
    );
    assert_eq!(listed["units"].as_array().map(|a| a.len()), Some(0));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "5",
        "studentUnits.import",
        json!({
            "studentNo": 999999999,
            "rows": [{ "unitCode": "ICT10001", "completed": true }]
        }),
    );
    assert_eq!(error_code(&unknown), "not_found");
}

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

fn new_student(student_no: i64, name: &str) -> serde_json::Value {
    json!({
        "studentNo": student_no,
        "name": name,
        "email": format!("s{}@example.edu", student_no),
        "program": "Bachelor of Computer Science",
        "major": "Software Development",
        "intakeTerm": "1",
        "intakeYear": 2023
    })
}

#[test]
fn student_create_update_search_delete_flow() {
    let workspace = temp_dir("ssps-students-crud");
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
        new_student(102334556, "Aisyah Binti Rahman"),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        new_student(104455667, "Tan Wei Ming"),
    );

    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        new_student(102334556, "Someone Else"),
    );
    assert_eq!(dup["ok"], json!(false));
    assert_eq!(error_code(&dup), "already_exists");

    let listed = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(listed["students"].as_array().map(|a| a.len()), Some(2));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.get",
        json!({ "studentNo": 102334556 }),
    );
    assert_eq!(fetched["student"]["name"], json!("Aisyah Binti Rahman"));
    assert_eq!(fetched["student"]["studentType"], json!("malaysian"));
    assert_eq!(fetched["student"]["graduated"], json!(false));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.update",
        json!({
            "studentNo": 102334556,
            "major": "Data Science",
            "studentType": "international"
        }),
    );
    assert_eq!(updated["student"]["major"], json!("Data Science"));
    assert_eq!(updated["student"]["studentType"], json!("international"));
    // Untouched fields survive a partial update.
    assert_eq!(updated["student"]["name"], json!("Aisyah Binti Rahman"));

    let bad_type = request(
        &mut stdin,
        &mut reader,
        "8",
        "students.update",
        json!({ "studentNo": 102334556, "studentType": "visitor" }),
    );
    assert_eq!(error_code(&bad_type), "bad_params");

    let by_prefix = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.search",
        json!({ "query": "1023" }),
    );
    assert_eq!(by_prefix["students"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(by_prefix["students"][0]["studentNo"], json!(102334556));

    let by_name = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.search",
        json!({ "query": "wei" }),
    );
    assert_eq!(by_name["students"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(by_name["students"][0]["name"], json!("Tan Wei Ming"));

    let years = request_ok(&mut stdin, &mut reader, "11", "intakeYears.list", json!({}));
    assert_eq!(years["intakeYears"], json!([2023]));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "students.delete",
        json!({ "studentNo": 104455667 }),
    );
    let missing = request(
        &mut stdin,
        &mut reader,
        "13",
        "students.get",
        json!({ "studentNo": 104455667 }),
    );
    assert_eq!(error_code(&missing), "not_found");
}

#[test]
fn unit_catalogue_crud_flow() {
    let workspace = temp_dir("ssps-units-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "units.create",
        json!({
            "unitCode": " cos10009 ",
            "unitName": "Introduction to Data Science"
        }),
    );
    // Codes are stored normalized.
    assert_eq!(created["unitCode"], json!("COS10009"));

    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "units.create",
        json!({ "unitCode": "COS10009", "unitName": "Duplicate" }),
    );
    assert_eq!(error_code(&dup), "already_exists");

    let listed = request_ok(&mut stdin, &mut reader, "4", "units.list", json!({}));
    let units = listed["units"].as_array().expect("units");
    assert_eq!(units.len(), 1);
    assert_eq!(units[0]["creditPoints"], json!(12.5));
    let unit_id = units[0]["id"].as_str().expect("unit id").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "units.update",
        json!({
            "unitId": unit_id,
            "prerequisites": "ICT10001",
            "creditPoints": 25.0
        }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "6", "units.list", json!({}));
    assert_eq!(listed["units"][0]["prerequisites"], json!("ICT10001"));
    assert_eq!(listed["units"][0]["creditPoints"], json!(25.0));
    assert_eq!(
        listed["units"][0]["unitName"],
        json!("Introduction to Data Science")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "units.delete",
        json!({ "unitId": unit_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "8", "units.list", json!({}));
    assert_eq!(listed["units"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn programs_and_majors_crud_flow() {
    let workspace = temp_dir("ssps-programs-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let program = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "programs.create",
        json!({ "name": "Bachelor of Computer Science" }),
    );
    let program_id = program["programId"].as_str().expect("program id").to_string();

    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "programs.create",
        json!({ "name": "Bachelor of Computer Science" }),
    );
    assert_eq!(error_code(&dup), "already_exists");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "majors.create",
        json!({ "programId": program_id, "name": "Software Development" }),
    );
    let major = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "majors.create",
        json!({ "programId": program_id, "name": "Data Science" }),
    );
    let major_id = major["majorId"].as_str().expect("major id").to_string();

    let majors = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "majors.list",
        json!({ "programId": program_id }),
    );
    assert_eq!(majors["majors"].as_array().map(|a| a.len()), Some(2));

    let programs = request_ok(&mut stdin, &mut reader, "7", "programs.list", json!({}));
    assert_eq!(programs["programs"][0]["majorCount"], json!(2));

    // A program with majors cannot be deleted out from under them.
    let blocked = request(
        &mut stdin,
        &mut reader,
        "8",
        "programs.delete",
        json!({ "programId": program_id }),
    );
    assert_eq!(error_code(&blocked), "has_majors");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "majors.delete",
        json!({ "majorId": major_id }),
    );
    let majors = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "majors.list",
        json!({ "programId": program_id }),
    );
    assert_eq!(majors["majors"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn methods_require_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(&mut stdin, &mut reader, "1", "students.list", json!({}));
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(error_code(&resp), "no_workspace");

    let resp = request(&mut stdin, &mut reader, "2", "bogus.method", json!({}));
    assert_eq!(error_code(&resp), "not_implemented");
}

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

fn intake_params() -> serde_json::Value {
    json!({
        "program": "Bachelor of Computer Science",
        "major": "Software Development",
        "intakeYear": 2023,
        "intakeSemester": "1"
    })
}

fn planner_payload(units: serde_json::Value, overwrite: bool) -> serde_json::Value {
    let mut payload = intake_params();
    payload["units"] = units;
    payload["overwrite"] = json!(overwrite);
    payload
}

#[test]
fn planner_create_overwrite_update_delete_flow() {
    let workspace = temp_dir("ssps-planner-lifecycle");
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
        "planners.create",
        planner_payload(
            json!([
                { "year": 1, "semester": "1", "unitCode": "ICT10001",
                  "unitName": "Introduction to Programming", "unitType": "Core" },
                { "year": 1, "semester": "2", "unitCode": "COS10009",
                  "unitName": "Introduction to Data Science", "unitType": "Core" }
            ]),
            false,
        ),
    );
    assert_eq!(created["unitCount"], json!(2));

    // Same intake again without overwrite must be refused.
    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "planners.create",
        planner_payload(
            json!([
                { "year": 1, "semester": "1", "unitCode": "ICT10001",
                  "unitName": "Introduction to Programming", "unitType": "Core" }
            ]),
            false,
        ),
    );
    assert_eq!(dup["ok"], json!(false));
    assert_eq!(error_code(&dup), "already_exists");

    // Overwrite replaces the template wholesale.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "planners.create",
        planner_payload(
            json!([
                { "year": 1, "semester": "1", "unitCode": "COS10009",
                  "unitName": "Introduction to Data Science", "unitType": "Core" },
                { "year": 2, "semester": "1", "unitCode": "COS20007",
                  "unitName": "Object Oriented Programming", "unitType": "Core" },
                { "year": 2, "semester": "2", "unitName": "Elective",
                  "unitType": "Elective" }
            ]),
            true,
        ),
    );

    let tabs = request_ok(&mut stdin, &mut reader, "5", "planners.list", json!({}));
    assert_eq!(tabs["planners"].as_array().map(|a| a.len()), Some(1));

    let view = request_ok(&mut stdin, &mut reader, "6", "planners.view", intake_params());
    let units = view["units"].as_array().expect("units").clone();
    assert_eq!(units.len(), 3);
    // Template order survives the round trip.
    assert_eq!(units[0]["unitCode"], json!("COS10009"));
    assert_eq!(units[1]["unitCode"], json!("COS20007"));
    assert_eq!(units[2]["unitCode"], json!(null));

    // unitCode updates resolve name and prerequisites from the catalogue.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "units.create",
        json!({
            "unitCode": "SWE30003",
            "unitName": "Software Architectures and Design",
            "prerequisites": "COS20007"
        }),
    );
    let slot_id = units[1]["id"].as_str().expect("slot id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "planners.updateUnit",
        json!({ "unitId": slot_id, "field": "unitCode", "value": "swe30003" }),
    );
    let view = request_ok(&mut stdin, &mut reader, "9", "planners.view", intake_params());
    assert_eq!(view["units"][1]["unitCode"], json!("SWE30003"));
    assert_eq!(
        view["units"][1]["unitName"],
        json!("Software Architectures and Design")
    );
    assert_eq!(view["units"][1]["prerequisites"], json!("COS20007"));

    // Unknown catalogue code is rejected, not guessed at.
    let unknown = request(
        &mut stdin,
        &mut reader,
        "10",
        "planners.updateUnit",
        json!({ "unitId": view["units"][1]["id"], "field": "unitCode", "value": "NOPE999" }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    let bad_sem = request(
        &mut stdin,
        &mut reader,
        "11",
        "planners.updateUnit",
        json!({ "unitId": view["units"][1]["id"], "field": "semester", "value": "3" }),
    );
    assert_eq!(error_code(&bad_sem), "bad_params");

    let bad_year = request(
        &mut stdin,
        &mut reader,
        "12",
        "planners.updateUnit",
        json!({ "unitId": view["units"][1]["id"], "field": "year", "value": 5 }),
    );
    assert_eq!(error_code(&bad_year), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "planners.updateUnit",
        json!({ "unitId": view["units"][1]["id"], "field": "semester", "value": "Summer" }),
    );

    let elective_id = view["units"][2]["id"].as_str().expect("elective id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "planners.deleteUnit",
        json!({ "unitId": elective_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "15",
        "planners.deleteUnit",
        json!({ "unitId": elective_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let view = request_ok(&mut stdin, &mut reader, "16", "planners.view", intake_params());
    assert_eq!(view["units"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(view["units"][1]["semester"], json!("summer"));
}

#[test]
fn planner_create_validates_template_rows() {
    let workspace = temp_dir("ssps-planner-validate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let empty = request(
        &mut stdin,
        &mut reader,
        "2",
        "planners.create",
        planner_payload(json!([]), false),
    );
    assert_eq!(error_code(&empty), "bad_params");

    let bad_type = request(
        &mut stdin,
        &mut reader,
        "3",
        "planners.create",
        planner_payload(
            json!([
                { "year": 1, "semester": "1", "unitCode": "ICT10001",
                  "unitName": "Introduction to Programming", "unitType": "Optional" }
            ]),
            false,
        ),
    );
    assert_eq!(error_code(&bad_type), "bad_params");

    let bad_year = request(
        &mut stdin,
        &mut reader,
        "4",
        "planners.create",
        planner_payload(
            json!([
                { "year": 0, "semester": "1", "unitCode": "ICT10001",
                  "unitName": "Introduction to Programming", "unitType": "Core" }
            ]),
            false,
        ),
    );
    assert_eq!(error_code(&bad_year), "bad_params");

    // Nothing was persisted along the way.
    let tabs = request_ok(&mut stdin, &mut reader, "5", "planners.list", json!({}));
    assert_eq!(tabs["planners"].as_array().map(|a| a.len()), Some(0));
}

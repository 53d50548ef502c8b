use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value as JsonValue;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    // Accept a numeric string too; the admin screens send both.
    let raw = req
        .params
        .get(key)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    match raw {
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an integer", key), None)),
        JsonValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| err(&req.id, "bad_params", format!("{} must be an integer", key), None)),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an integer", key),
            None,
        )),
    }
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

pub fn parse_opt_f64(v: Option<&JsonValue>) -> Result<Option<f64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or("must be a number or null"),
    }
}

pub fn parse_opt_i64(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v {
            JsonValue::Number(n) => n.as_i64().map(Some).ok_or("must be integer or null"),
            JsonValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| "must be integer or null"),
            _ => Err("must be integer or null"),
        },
    }
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

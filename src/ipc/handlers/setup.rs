use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_actor};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use crate::roster::SchoolProfile;
use crate::stats::SummaryOptions;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    School,
    Dashboard,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "dashboard" => Some(Self::Dashboard),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "setup.school",
            Self::Dashboard => "setup.dashboard",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::School => json!({
            "schoolName": "Secondary School",
            "town": "",
            "schoolYear": "2025/2026"
        }),
        SetupSection::Dashboard => json!({
            "alertThreshold": 3,
            "rankingSize": 3
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::School => match k.as_str() {
                "schoolName" => {
                    let s = parse_string_max(v, k, 120)?;
                    if s.is_empty() {
                        return Err("schoolName must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "town" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "schoolYear" => {
                    let s = parse_string_max(v, k, 16)?;
                    if s.is_empty() {
                        return Err("schoolYear must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SetupSection::Dashboard => match k.as_str() {
                "alertThreshold" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 30)?));
                }
                "rankingSize" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                _ => return Err(format!("unknown dashboard field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn school_profile(conn: &Connection) -> anyhow::Result<SchoolProfile> {
    let section = load_section(conn, SetupSection::School)?;
    Ok(SchoolProfile {
        school_name: section
            .get("schoolName")
            .and_then(|v| v.as_str())
            .unwrap_or("Secondary School")
            .to_string(),
        town: section
            .get("town")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        school_year: section
            .get("schoolYear")
            .and_then(|v| v.as_str())
            .unwrap_or("2025/2026")
            .to_string(),
    })
}

pub fn dashboard_options(conn: &Connection) -> anyhow::Result<SummaryOptions> {
    let section = load_section(conn, SetupSection::Dashboard)?;
    let defaults = SummaryOptions::default();
    Ok(SummaryOptions {
        alert_threshold: section
            .get("alertThreshold")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(defaults.alert_threshold),
        ranking_size: section
            .get("rankingSize")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(defaults.ranking_size),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let school = match load_section(conn, SetupSection::School) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let dashboard = match load_section(conn, SetupSection::Dashboard) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "school": school,
            "dashboard": dashboard
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageSetup) {
        return resp;
    }
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

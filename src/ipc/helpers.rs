use rusqlite::{Connection, OptionalExtension};

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Action, Role};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Missing, null, or blank values all read as None.
pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_str_array(req: &Request, key: &str) -> Result<Vec<String>, serde_json::Value> {
    let Some(raw) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    let mut out = Vec::new();
    for v in raw {
        let Some(s) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must contain only strings", key),
                None,
            ));
        };
        let trimmed = s.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(trimmed.to_string());
    }
    if out.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(out)
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Role gate for mutating methods: resolve params.actorId to a user, then
/// consult the policy table. Read methods skip this entirely.
pub fn require_actor(
    conn: &Connection,
    req: &Request,
    action: Action,
) -> Result<String, serde_json::Value> {
    let actor_id = required_str(req, "actorId")?;
    let role_raw: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&actor_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some(role_raw) = role_raw else {
        return Err(err(&req.id, "not_found", "actor not found", None));
    };
    let Some(role) = Role::parse(&role_raw) else {
        return Err(err(&req.id, "db_query_failed", "actor role is corrupt", None));
    };
    if !policy::allows(role, action) {
        return Err(err(
            &req.id,
            "forbidden",
            "actor role does not permit this action",
            None,
        ));
    }
    Ok(actor_id)
}

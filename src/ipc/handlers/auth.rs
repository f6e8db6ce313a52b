use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::policy::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const ADMIN_NAME: &str = "Administrator";

fn user_json(id: &str, name: &str, role: &str, subject: Option<&str>) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "role": role,
        "subject": subject
    })
}

/// Two-button login: no credentials, by design. ADMIN materializes a
/// singleton admin account; TEACHER resolves an existing teacher.
fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(&req.id, "bad_params", "role must be ADMIN or TEACHER", None);
    };

    match role {
        Role::Admin => {
            let existing: Option<(String, String)> = match conn
                .query_row(
                    "SELECT id, name FROM users WHERE role = 'ADMIN' ORDER BY name LIMIT 1",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if let Some((id, name)) = existing {
                return ok(&req.id, json!({ "user": user_json(&id, &name, "ADMIN", None) }));
            }
            let id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO users(id, name, role, subject) VALUES(?, ?, 'ADMIN', NULL)",
                (&id, ADMIN_NAME),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "users" })),
                );
            }
            ok(
                &req.id,
                json!({ "user": user_json(&id, ADMIN_NAME, "ADMIN", None) }),
            )
        }
        Role::Teacher => {
            let row = if let Some(user_id) = optional_str(req, "userId") {
                conn.query_row(
                    "SELECT id, name, subject FROM users WHERE id = ? AND role = 'TEACHER'",
                    [&user_id],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()
            } else {
                conn.query_row(
                    "SELECT id, name, subject FROM users WHERE role = 'TEACHER' ORDER BY name LIMIT 1",
                    [],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()
            };
            match row {
                Ok(Some((id, name, subject))) => ok(
                    &req.id,
                    json!({ "user": user_json(&id, &name, "TEACHER", subject.as_deref()) }),
                ),
                Ok(None) => err(&req.id, "not_found", "no teacher account available", None),
                Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        _ => None,
    }
}

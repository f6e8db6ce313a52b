use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_actor, required_str, required_str_array};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

fn schedule_count_for(conn: &Connection, teacher_ids: &[String]) -> Result<i64, HandlerErr> {
    let sql = format!(
        "SELECT COUNT(*) FROM schedule_items WHERE teacher_id IN ({})",
        placeholders(teacher_ids.len())
    );
    conn.query_row(&sql, params_from_iter(teacher_ids.iter()), |r| r.get(0))
        .map_err(db_err)
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare(
        "SELECT
           u.id,
           u.name,
           u.subject,
           (SELECT COUNT(*) FROM schedule_items si WHERE si.teacher_id = u.id) AS schedule_count
         FROM users u
         WHERE u.role = 'TEACHER'
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let subject: Option<String> = row.get(2)?;
            let schedule_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "role": "TEACHER",
                "subject": subject,
                "scheduleCount": schedule_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageTeachers) {
        return resp;
    }
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let subject = match required_str(req, "subject") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if subject.is_empty() {
        return err(&req.id, "bad_params", "subject must not be empty", None);
    }

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, name, role, subject) VALUES(?, ?, 'TEACHER', ?)",
        (&teacher_id, &name, &subject),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }
    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageTeachers) {
        return resp;
    }
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'TEACHER'",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    // Role is fixed at creation; only name and subject may change.
    for key in patch.keys() {
        if key != "name" && key != "subject" {
            return err(
                &req.id,
                "bad_params",
                format!("unknown patch field: {}", key),
                None,
            );
        }
    }
    if let Some(name) = patch.get("name").and_then(|v| v.as_str()) {
        let name = name.trim();
        if name.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE users SET name = ? WHERE id = ?",
            (name, &teacher_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(subject) = patch.get("subject").and_then(|v| v.as_str()) {
        let subject = subject.trim();
        if subject.is_empty() {
            return err(&req.id, "bad_params", "subject must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE users SET subject = ? WHERE id = ?",
            (subject, &teacher_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "ok": true }))
}

/// Confirmation-dialog data: how many schedule slots would be emptied.
fn handle_teachers_delete_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_ids = match required_str_array(req, "teacherIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match schedule_count_for(conn, &teacher_ids) {
        Ok(count) => ok(
            &req.id,
            json!({
                "teacherCount": teacher_ids.len(),
                "affectedScheduleItems": count
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageTeachers) {
        return resp;
    }
    let teacher_ids = match required_str_array(req, "teacherIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Deleting a teacher empties every schedule slot assigned to them, and
    // nothing else.
    let sql = format!(
        "DELETE FROM schedule_items WHERE teacher_id IN ({})",
        placeholders(teacher_ids.len())
    );
    let removed_schedule = match tx.execute(&sql, params_from_iter(teacher_ids.iter())) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "schedule_items" })),
            );
        }
    };

    let sql = format!(
        "DELETE FROM users WHERE role = 'TEACHER' AND id IN ({})",
        placeholders(teacher_ids.len())
    );
    let removed_teachers = match tx.execute(&sql, params_from_iter(teacher_ids.iter())) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            );
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({
            "removedTeachers": removed_teachers,
            "removedScheduleItems": removed_schedule
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.deletePreview" => Some(handle_teachers_delete_preview(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}

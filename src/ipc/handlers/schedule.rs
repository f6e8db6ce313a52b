use crate::catalog;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_actor, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const UNASSIGNED_ROOM: &str = "Unassigned room";

fn handle_schedule_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT si.id, si.day, si.session_id, si.room, si.teacher_id, u.name, u.subject
         FROM schedule_items si
         LEFT JOIN users u ON u.id = si.teacher_id
         WHERE si.class_id = ?
         ORDER BY si.day, si.session_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let day: String = r.get(1)?;
            let session_id: i64 = r.get(2)?;
            let room: String = r.get(3)?;
            let teacher_id: String = r.get(4)?;
            let teacher_name: Option<String> = r.get(5)?;
            let subject: Option<String> = r.get(6)?;
            Ok(json!({
                "id": id,
                "classId": class_id,
                "day": day,
                "sessionId": session_id,
                "room": room,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "subject": subject
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(items) => ok(
            &req.id,
            json!({
                "classId": class_id,
                "days": catalog::days_json(),
                "sessions": catalog::sessions_json(),
                "items": items
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn clear_slot(
    conn: &rusqlite::Connection,
    class_id: &str,
    day: &str,
    session_id: i64,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM schedule_items WHERE class_id = ? AND day = ? AND session_id = ?",
        (class_id, day, session_id),
    )
}

fn handle_schedule_set_slot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageSchedule) {
        return resp;
    }
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let day = match required_str(req, "day") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if !catalog::day_is_valid(&day) {
        return err(&req.id, "bad_params", "day is not a teaching day", None);
    }
    let session_id = match required_i64(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !catalog::session_exists(session_id) {
        return err(
            &req.id,
            "bad_params",
            "sessionId is not in the session catalog",
            None,
        );
    }

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    // Saving without a teacher empties the slot, mirroring the editor's
    // save-with-blank-selection behavior.
    let Some(teacher_id) = optional_str(req, "teacherId") else {
        return match clear_slot(conn, &class_id, &day, session_id) {
            Ok(removed) => ok(&req.id, json!({ "cleared": removed > 0 })),
            Err(e) => err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "schedule_items" })),
            ),
        };
    };

    let teacher_exists: Option<i64> = match conn
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
    if teacher_exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let room = optional_str(req, "room").unwrap_or_else(|| UNASSIGNED_ROOM.to_string());
    if let Err(e) = conn.execute(
        "INSERT INTO schedule_items(id, class_id, teacher_id, day, session_id, room)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, day, session_id) DO UPDATE SET
           teacher_id = excluded.teacher_id,
           room = excluded.room",
        (
            Uuid::new_v4().to_string(),
            &class_id,
            &teacher_id,
            &day,
            session_id,
            &room,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_items" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_schedule_clear_slot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageSchedule) {
        return resp;
    }
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let day = match required_str(req, "day") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let session_id = match required_i64(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match clear_slot(conn, &class_id, &day, session_id) {
        Ok(removed) => ok(&req.id, json!({ "cleared": removed > 0 })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_items" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.grid" => Some(handle_schedule_grid(state, req)),
        "schedule.setSlot" => Some(handle_schedule_set_slot(state, req)),
        "schedule.clearSlot" => Some(handle_schedule_clear_slot(state, req)),
        _ => None,
    }
}

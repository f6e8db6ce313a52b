use crate::catalog;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_actor, required_i64, required_str, required_str_array};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use crate::stats::AttendanceStatus;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
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

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| bad_params("date must be YYYY-MM-DD"))
}

fn check_session(session_id: i64) -> Result<(), HandlerErr> {
    if !catalog::session_exists(session_id) {
        return Err(bad_params("sessionId is not in the session catalog"));
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw.trim())
        .ok_or_else(|| bad_params("status must be PRESENT, ABSENT or LATE"))
}

fn student_in_class(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn upsert_record(
    conn: &Connection,
    student_id: &str,
    date: &str,
    session_id: i64,
    status: AttendanceStatus,
    marked_by: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance_records(
           id, student_id, date, session_id, status, marked_by, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(student_id, date, session_id) DO UPDATE SET
           status = excluded.status,
           marked_by = excluded.marked_by,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            date,
            session_id,
            status.as_str(),
            marked_by,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_records" })),
    })?;
    Ok(())
}

fn sheet_open(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(req, "classId").map_err(|_| bad_params("missing classId"))?;
    let date_raw = required_str(req, "date").map_err(|_| bad_params("missing date"))?;
    let date = parse_date(&date_raw)?;
    let session_id = required_i64(req, "sessionId").map_err(|_| bad_params("missing sessionId"))?;
    check_session(session_id)?;

    let class_exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_err)?
        .is_some();
    if !class_exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let date_key = date.format("%Y-%m-%d").to_string();
    let mut status_by_student: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT r.student_id, r.status
             FROM attendance_records r
             JOIN students s ON s.id = r.student_id
             WHERE s.class_id = ? AND r.date = ? AND r.session_id = ?",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map((&class_id, &date_key, session_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    for (student_id, status) in rows {
        status_by_student.insert(student_id, status);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, birth_date
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let students = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let birth_date: Option<String> = r.get(3)?;
            Ok(json!({
                "id": id,
                "displayName": format!("{}, {}", last, first),
                "birthDate": birth_date,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let rows_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let id = s.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            json!({
                "studentId": id,
                // An unmarked student reads as present until told otherwise.
                "status": status_by_student
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| "PRESENT".to_string())
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "date": date_key,
        "sessionId": session_id,
        "students": students,
        "rows": rows_json
    }))
}

fn mark(conn: &Connection, req: &Request, actor_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(req, "studentId").map_err(|_| bad_params("missing studentId"))?;
    let date_raw = required_str(req, "date").map_err(|_| bad_params("missing date"))?;
    let date = parse_date(&date_raw)?;
    let session_id = required_i64(req, "sessionId").map_err(|_| bad_params("missing sessionId"))?;
    check_session(session_id)?;
    let status_raw = required_str(req, "status").map_err(|_| bad_params("missing status"))?;
    let status = parse_status(&status_raw)?;

    if !student_in_class(conn, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let date_key = date.format("%Y-%m-%d").to_string();
    upsert_record(conn, &student_id, &date_key, session_id, status, actor_id)?;
    Ok(json!({ "ok": true }))
}

fn bulk_mark(
    conn: &Connection,
    req: &Request,
    actor_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let student_ids =
        required_str_array(req, "studentIds").map_err(|_| bad_params("missing studentIds"))?;
    let date_raw = required_str(req, "date").map_err(|_| bad_params("missing date"))?;
    let date = parse_date(&date_raw)?;
    let session_id = required_i64(req, "sessionId").map_err(|_| bad_params("missing sessionId"))?;
    check_session(session_id)?;
    let status_raw = required_str(req, "status").map_err(|_| bad_params("missing status"))?;
    let status = parse_status(&status_raw)?;

    let date_key = date.format("%Y-%m-%d").to_string();
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut marked = 0usize;
    for student_id in &student_ids {
        if !student_in_class(&tx, student_id)? {
            continue;
        }
        upsert_record(&tx, student_id, &date_key, session_id, status, actor_id)?;
        marked += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "marked": marked }))
}

fn student_history(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(req, "studentId").map_err(|_| bad_params("missing studentId"))?;
    if !student_in_class(conn, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }
    let mut stmt = conn
        .prepare(
            "SELECT date, session_id, status, marked_by
             FROM attendance_records
             WHERE student_id = ?
             ORDER BY date DESC, session_id",
        )
        .map_err(db_err)?;
    let records = stmt
        .query_map([&student_id], |r| {
            let date: String = r.get(0)?;
            let session_id: i64 = r.get(1)?;
            let status: String = r.get(2)?;
            let marked_by: Option<String> = r.get(3)?;
            Ok(json!({
                "date": date,
                "sessionId": session_id,
                "status": status,
                "markedBy": marked_by
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "studentId": student_id, "records": records }))
}

fn handle_sheet_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match sheet_open(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor_id = match require_actor(conn, req, Action::RecordAttendance) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match mark(conn, req, &actor_id) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_bulk_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor_id = match require_actor(conn, req, Action::RecordAttendance) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match bulk_mark(conn, req, &actor_id) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_student_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match student_history(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.sheetOpen" => Some(handle_sheet_open(state, req)),
        "attendance.mark" => Some(handle_mark(state, req)),
        "attendance.bulkMark" => Some(handle_bulk_mark(state, req)),
        "attendance.studentHistory" => Some(handle_student_history(state, req)),
        _ => None,
    }
}

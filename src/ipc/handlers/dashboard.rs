use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, AttendanceStatus, ClassRow, RecordRow, StudentRow};
use chrono::NaiveDate;
use rusqlite::Connection;

use super::setup;

pub fn load_records(conn: &Connection) -> anyhow::Result<Vec<RecordRow>> {
    let mut stmt =
        conn.prepare("SELECT student_id, date, status FROM attendance_records ORDER BY date")?;
    let raw = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(raw.len());
    for (student_id, date_raw, status_raw) in raw {
        let Ok(date) = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d") else {
            log::warn!("skipping attendance record with bad date: {}", date_raw);
            continue;
        };
        let Some(status) = AttendanceStatus::parse(&status_raw) else {
            log::warn!("skipping attendance record with bad status: {}", status_raw);
            continue;
        };
        records.push(RecordRow {
            student_id,
            date,
            status,
        });
    }
    Ok(records)
}

pub fn load_students(conn: &Connection) -> anyhow::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, class_id FROM students ORDER BY class_id, sort_order",
    )?;
    let students = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let class_id: String = r.get(3)?;
            Ok(StudentRow {
                id,
                display_name: format!("{}, {}", last, first),
                class_id,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn load_classes(conn: &Connection) -> anyhow::Result<Vec<ClassRow>> {
    let mut stmt = conn.prepare("SELECT id, name FROM classes ORDER BY name")?;
    let classes = stmt
        .query_map([], |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(classes)
}

fn handle_dashboard_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let records = match load_records(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match load_students(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let classes = match load_classes(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let opts = match setup::dashboard_options(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let summary = stats::summarize(&records, &students, &classes, opts);
    match serde_json::to_value(&summary) {
        Ok(value) => ok(&req.id, value),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(handle_dashboard_summary(state, req)),
        _ => None,
    }
}

use crate::insight;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn dataset_json(conn: &Connection) -> anyhow::Result<serde_json::Value> {
    let mut stmt = conn.prepare(
        "SELECT student_id, date, session_id, status FROM attendance_records ORDER BY date",
    )?;
    let records = stmt
        .query_map([], |r| {
            let student_id: String = r.get(0)?;
            let date: String = r.get(1)?;
            let session_id: i64 = r.get(2)?;
            let status: String = r.get(3)?;
            Ok(json!({
                "studentId": student_id,
                "date": date,
                "sessionId": session_id,
                "status": status
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!(records))
}

fn handle_insights_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let record_count: i64 =
        match conn.query_row("SELECT COUNT(*) FROM attendance_records", [], |r| r.get(0)) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

    // Nothing recorded yet: publish the static message, touch no network.
    if record_count == 0 {
        let generation = state.insights.publish_no_data();
        return ok(
            &req.id,
            json!({ "status": "ready", "generation": generation }),
        );
    }

    let dataset = match dataset_json(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let prompt = insight::build_prompt(&dataset.to_string());
    let generation = state.insights.begin_refresh();
    state.insights.spawn_request(generation, prompt);
    ok(
        &req.id,
        json!({ "status": "loading", "generation": generation }),
    )
}

fn handle_insights_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snap = state.insights.snapshot();
    ok(
        &req.id,
        json!({
            "status": snap.status.as_str(),
            "narrative": snap.narrative,
            "generation": snap.generation
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "insights.refresh" => Some(handle_insights_refresh(state, req)),
        "insights.get" => Some(handle_insights_get(state, req)),
        _ => None,
    }
}

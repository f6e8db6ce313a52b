use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_actor, required_str};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use crate::roster;
use serde_json::json;
use std::path::PathBuf;

use super::setup;

fn handle_export_workbook(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ExchangeRoster) {
        return resp;
    }
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let profile = match setup::school_profile(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match roster::export_workbook(conn, &profile, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "outPath": out_path.to_string_lossy(),
                "sheetCount": summary.sheet_count
            }),
        ),
        Err(e) => err(&req.id, "bad_file", format!("{e:#}"), None),
    }
}

fn handle_import_workbook(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ExchangeRoster) {
        return resp;
    }
    let in_path = match required_str(req, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    match roster::import_workbook(conn, &in_path) {
        Ok(summary) => {
            let sheets: Vec<serde_json::Value> = summary
                .sheets
                .iter()
                .map(|s| {
                    json!({
                        "sheet": s.sheet,
                        "classId": s.class_id,
                        "imported": s.imported
                    })
                })
                .collect();
            ok(
                &req.id,
                json!({
                    "imported": summary.imported,
                    "sheets": sheets,
                    "warnings": summary.warnings
                }),
            )
        }
        Err(e) => err(&req.id, "bad_file", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.exportWorkbook" => Some(handle_export_workbook(state, req)),
        "roster.importWorkbook" => Some(handle_import_workbook(state, req)),
        _ => None,
    }
}

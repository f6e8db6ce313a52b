use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_actor, required_str, required_str_array};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

fn student_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let class_id: String = row.get(1)?;
    let last_name: String = row.get(2)?;
    let first_name: String = row.get(3)?;
    let birth_date: Option<String> = row.get(4)?;
    let gender: Option<String> = row.get(5)?;
    let birth_place: Option<String> = row.get(6)?;
    let guardian_name: Option<String> = row.get(7)?;
    let address: Option<String> = row.get(8)?;
    let sort_order: i64 = row.get(9)?;
    Ok(json!({
        "id": id,
        "classId": class_id,
        "lastName": last_name,
        "firstName": first_name,
        "birthDate": birth_date,
        "gender": gender,
        "birthPlace": birth_place,
        "guardianName": guardian_name,
        "address": address,
        "sortOrder": sort_order
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let query = optional_str(req, "query").map(|q| q.to_lowercase());

    let mut stmt = match conn.prepare(
        "SELECT id, class_id, last_name, first_name, birth_date, gender,
                birth_place, guardian_name, address, sort_order
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], student_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let students = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // The roster search box filters on name or id, case-insensitively.
    let students: Vec<serde_json::Value> = match query {
        Some(q) => students
            .into_iter()
            .filter(|s| {
                ["firstName", "lastName", "id"].iter().any(|key| {
                    s.get(key)
                        .and_then(|v| v.as_str())
                        .map(|v| v.to_lowercase().contains(&q))
                        .unwrap_or(false)
                })
            })
            .collect(),
        None => students,
    };

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageStudents) {
        return resp;
    }

    // Required fields reject explicitly; the form never silently no-ops.
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if last_name.is_empty() || first_name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "firstName/lastName must not be empty",
            None,
        );
    }

    let birth_date = optional_str(req, "birthDate");
    let gender = optional_str(req, "gender");
    let birth_place = optional_str(req, "birthPlace");
    let guardian_name = optional_str(req, "guardianName");
    let address = optional_str(req, "address");

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

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(
           id, class_id, last_name, first_name, birth_date, gender,
           birth_place, guardian_name, address, sort_order, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &student_id,
            &class_id,
            &last_name,
            &first_name,
            birth_date.as_deref(),
            gender.as_deref(),
            birth_place.as_deref(),
            guardian_name.as_deref(),
            address.as_deref(),
            sort_order,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageStudents) {
        return resp;
    }
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let columns: &[(&str, &str, bool)] = &[
        ("lastName", "last_name", true),
        ("firstName", "first_name", true),
        ("birthDate", "birth_date", false),
        ("gender", "gender", false),
        ("birthPlace", "birth_place", false),
        ("guardianName", "guardian_name", false),
        ("address", "address", false),
        ("classId", "class_id", true),
    ];
    for key in patch.keys() {
        if !columns.iter().any(|(k, _, _)| k == key) {
            return err(
                &req.id,
                "bad_params",
                format!("unknown patch field: {}", key),
                None,
            );
        }
    }

    for (key, column, required) in columns {
        let Some(value) = patch.get(*key) else {
            continue;
        };
        let Some(text) = value.as_str().map(str::trim) else {
            return err(&req.id, "bad_params", format!("{} must be string", key), None);
        };
        if *required && text.is_empty() {
            return err(
                &req.id,
                "bad_params",
                format!("{} must not be empty", key),
                None,
            );
        }
        if *key == "classId" {
            let class_exists: Option<i64> = match conn
                .query_row("SELECT 1 FROM classes WHERE id = ?", [text], |r| r.get(0))
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if class_exists.is_none() {
                return err(&req.id, "not_found", "class not found", None);
            }
        }
        let sql = format!(
            "UPDATE students SET {} = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
            column
        );
        if let Err(e) = conn.execute(&sql, (text, &student_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

/// Confirmation-dialog data: how many attendance records the delete removes.
fn handle_students_delete_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_ids = match required_str_array(req, "studentIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let sql = format!(
        "SELECT COUNT(*) FROM attendance_records WHERE student_id IN ({})",
        placeholders(student_ids.len())
    );
    let count: i64 = match conn.query_row(&sql, params_from_iter(student_ids.iter()), |r| r.get(0))
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "studentCount": student_ids.len(),
            "affectedAttendanceRecords": count
        }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_actor(conn, req, Action::ManageStudents) {
        return resp;
    }
    let student_ids = match required_str_array(req, "studentIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let sql = format!(
        "DELETE FROM attendance_records WHERE student_id IN ({})",
        placeholders(student_ids.len())
    );
    let removed_records = match tx.execute(&sql, params_from_iter(student_ids.iter())) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "attendance_records" })),
            );
        }
    };

    let sql = format!(
        "DELETE FROM students WHERE id IN ({})",
        placeholders(student_ids.len())
    );
    let removed_students = match tx.execute(&sql, params_from_iter(student_ids.iter())) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({
            "removedStudents": removed_students,
            "removedAttendanceRecords": removed_records
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.deletePreview" => Some(handle_students_delete_preview(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}

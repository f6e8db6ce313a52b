use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("attendanced-router-smoke");
    let workbook_out = workspace.join("smoke-roster.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(&mut stdin, &mut reader, "1b", "meta.catalog", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let login = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "role": "ADMIN" }),
    );
    let admin_id = login
        .get("result")
        .and_then(|v| v.get("user"))
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("admin id")
        .to_string();

    let created = request(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "actorId": admin_id, "name": "Smoke Class" }),
    );
    let class_id = created
        .get("result")
        .and_then(|v| v.get("classId"))
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let _ = request(&mut stdin, &mut reader, "5", "classes.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "6", "setup.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "6b",
        "setup.update",
        json!({
            "actorId": admin_id,
            "section": "school",
            "patch": { "schoolName": "Smoke Secondary" }
        }),
    );

    let teacher = request(
        &mut stdin,
        &mut reader,
        "7",
        "teachers.create",
        json!({ "actorId": admin_id, "name": "Smoke Teacher", "subject": "Mathematics" }),
    );
    let teacher_id = teacher
        .get("result")
        .and_then(|v| v.get("teacherId"))
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();
    let _ = request(&mut stdin, &mut reader, "8", "teachers.list", json!({}));

    let student = request(
        &mut stdin,
        &mut reader,
        "9",
        "students.create",
        json!({
            "actorId": admin_id,
            "classId": class_id,
            "lastName": "Smoke",
            "firstName": "Student"
        }),
    );
    let student_id = student
        .get("result")
        .and_then(|v| v.get("studentId"))
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "students.list",
        json!({ "classId": class_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10b",
        "students.update",
        json!({
            "actorId": admin_id,
            "studentId": student_id,
            "patch": { "firstName": "Updated" }
        }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.sheetOpen",
        json!({ "classId": class_id, "date": "2026-01-12", "sessionId": 1 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.mark",
        json!({
            "actorId": admin_id,
            "studentId": student_id,
            "date": "2026-01-12",
            "sessionId": 1,
            "status": "ABSENT"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12b",
        "attendance.studentHistory",
        json!({ "studentId": student_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "schedule.setSlot",
        json!({
            "actorId": admin_id,
            "classId": class_id,
            "day": "Sunday",
            "sessionId": 1,
            "teacherId": teacher_id,
            "room": "Room 5"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "schedule.grid",
        json!({ "classId": class_id }),
    );

    let _ = request(&mut stdin, &mut reader, "15", "dashboard.summary", json!({}));
    let _ = request(&mut stdin, &mut reader, "16", "insights.get", json!({}));
    let _ = request(&mut stdin, &mut reader, "17", "insights.refresh", json!({}));

    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "roster.exportWorkbook",
        json!({ "actorId": admin_id, "outPath": workbook_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "roster.importWorkbook",
        json!({ "actorId": admin_id, "inPath": workbook_out.to_string_lossy() }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "teachers.deletePreview",
        json!({ "teacherIds": [teacher_id] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "teachers.delete",
        json!({ "actorId": admin_id, "teacherIds": [teacher_id] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "students.deletePreview",
        json!({ "studentIds": [student_id] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "students.delete",
        json!({ "actorId": admin_id, "studentIds": [student_id] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "24",
        "classes.delete",
        json!({ "actorId": admin_id, "classId": class_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

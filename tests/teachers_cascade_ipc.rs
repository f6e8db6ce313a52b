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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn deleting_a_teacher_removes_only_their_schedule_items() {
    let workspace = temp_dir("attendanced-teacher-cascade");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "role": "ADMIN" }),
    );
    let admin_id = login
        .get("user")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("admin id")
        .to_string();

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "actorId": admin_id, "name": "2C" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut teacher_ids = Vec::new();
    for (i, (name, subject)) in [("Ahmed Benali", "Mathematics"), ("Sara Mahmoud", "Biology")]
        .iter()
        .enumerate()
    {
        let teacher = request_ok(
            &mut stdin,
            &mut reader,
            &format!("t{}", i),
            "teachers.create",
            json!({ "actorId": admin_id, "name": name, "subject": subject }),
        );
        teacher_ids.push(
            teacher
                .get("teacherId")
                .and_then(|v| v.as_str())
                .expect("teacherId")
                .to_string(),
        );
    }

    // Two slots for the first teacher, one for the second.
    for (i, (day, session, teacher)) in [
        ("Sunday", 1, &teacher_ids[0]),
        ("Monday", 2, &teacher_ids[0]),
        ("Tuesday", 3, &teacher_ids[1]),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "schedule.setSlot",
            json!({
                "actorId": admin_id,
                "classId": class_id,
                "day": day,
                "sessionId": session,
                "teacherId": teacher,
                "room": "Room 1"
            }),
        );
    }

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.deletePreview",
        json!({ "teacherIds": [teacher_ids[0]] }),
    );
    assert_eq!(
        preview
            .get("affectedScheduleItems")
            .and_then(|v| v.as_i64()),
        Some(2)
    );

    // Preview must not mutate anything.
    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.grid",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        grid.get("items").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(3)
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.delete",
        json!({ "actorId": admin_id, "teacherIds": [teacher_ids[0]] }),
    );
    assert_eq!(
        deleted.get("removedTeachers").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        deleted.get("removedScheduleItems").and_then(|v| v.as_u64()),
        Some(2)
    );

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.grid",
        json!({ "classId": class_id }),
    );
    let items = grid
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].get("teacherId").and_then(|v| v.as_str()),
        Some(teacher_ids[1].as_str())
    );

    let teachers = request_ok(&mut stdin, &mut reader, "8", "teachers.list", json!({}));
    let remaining = teachers
        .get("teachers")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("teachers");
    assert_eq!(remaining.len(), 1);
    assert_eq!(
        remaining[0].get("name").and_then(|v| v.as_str()),
        Some("Sara Mahmoud")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

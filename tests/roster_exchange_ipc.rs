use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

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

/// Builds a workbook the way the daemon exports one: a manifest plus one
/// CSV sheet per entry, with the class name in row 5 column 5 and data
/// rows from row 9.
fn write_workbook(path: &PathBuf, sheets: &[(&str, &str, Vec<[&str; 9]>)]) {
    let file = std::fs::File::create(path).expect("create workbook");
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file("manifest.json", opts).expect("manifest");
    zip.write_all(
        json!({ "format": "attendance-roster-v1", "version": 1 })
            .to_string()
            .as_bytes(),
    )
    .expect("manifest body");

    for (sheet_name, class_cell, data_rows) in sheets {
        let mut text = String::new();
        for _ in 0..2 {
            text.push_str(",,,,,,,,\n");
        }
        text.push_str("School,,,,School year 2025/2026,,,,\n");
        text.push_str("Town,,,,,,,,\n");
        text.push_str(&format!(",,,,{},,,,\n", class_cell));
        for _ in 0..2 {
            text.push_str(",,,,,,,,\n");
        }
        text.push_str("No.,Last name,First name,Gender,Birth date,Birth place,Repeat,Guardian,Address\n");
        for row in data_rows {
            text.push_str(&row.join(","));
            text.push('\n');
        }
        zip.start_file(format!("sheets/{}.csv", sheet_name), opts)
            .expect("sheet entry");
        zip.write_all(text.as_bytes()).expect("sheet body");
    }
    zip.finish().expect("finish workbook");
}

#[test]
fn export_import_roundtrip_and_unmatched_sheets_skip() {
    let workspace = temp_dir("attendanced-roster");
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
        json!({ "actorId": admin_id, "name": "1A Science" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    // The exported workbook is the blank fill-in template: importing it
    // back must create nothing.
    let out = workspace.join("template.zip");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "roster.exportWorkbook",
        json!({ "actorId": admin_id, "outPath": out.to_string_lossy() }),
    );
    assert_eq!(exported.get("sheetCount").and_then(|v| v.as_u64()), Some(1));

    let reimported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "roster.importWorkbook",
        json!({ "actorId": admin_id, "inPath": out.to_string_lossy() }),
    );
    assert_eq!(reimported.get("imported").and_then(|v| v.as_u64()), Some(0));

    // A filled workbook: one sheet matched by the name cell, one sheet
    // nobody matches.
    let filled = workspace.join("filled.zip");
    write_workbook(
        &filled,
        &[
            (
                "whatever",
                "1A Science",
                vec![
                    ["1", "Benali", "Nour", "F", "2008/01/15", "Town", "", "Mohamed", "12 High St"],
                    ["2", "Last name here", "First name here", "", "", "", "", "", ""],
                    ["3", "Saidi", "Imene", "F", "2008-05-20", "Town", "", "Omar", "9 Low St"],
                ],
            ),
            ("9Z Ghost", "9Z Ghost", vec![]),
        ],
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "roster.importWorkbook",
        json!({ "actorId": admin_id, "inPath": filled.to_string_lossy() }),
    );
    // Placeholder row skipped, ghost sheet warned about.
    assert_eq!(imported.get("imported").and_then(|v| v.as_u64()), Some(2));
    let warnings = imported
        .get("warnings")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].get("code").and_then(|v| v.as_str()),
        Some("unmatched_sheet")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.list",
        json!({ "classId": class_id }),
    );
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("students");
    assert_eq!(students.len(), 2);
    let benali = students
        .iter()
        .find(|s| s.get("lastName").and_then(|v| v.as_str()) == Some("Benali"))
        .expect("Benali imported");
    assert_eq!(
        benali.get("birthDate").and_then(|v| v.as_str()),
        Some("2008-01-15")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

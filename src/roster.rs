use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const SHEET_DIR: &str = "sheets/";
pub const WORKBOOK_FORMAT_V1: &str = "attendance-roster-v1";

// Fixed template geometry, shared by export and import (0-based):
// rows 0..=6 are the preamble, with the class name in row 4 column 4;
// row 7 is the column header; data rows start at row 8.
const CLASS_NAME_ROW: usize = 4;
const CLASS_NAME_COL: usize = 4;
const DATA_START_ROW: usize = 8;
const SHEET_COLUMNS: usize = 9;

const PLACEHOLDER_LAST_NAME: &str = "Last name here";
const PLACEHOLDER_FIRST_NAME: &str = "First name here";

#[derive(Debug, Clone)]
pub struct SchoolProfile {
    pub school_name: String,
    pub town: String,
    pub school_year: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub sheet_count: usize,
}

#[derive(Debug, Clone)]
pub struct SheetOutcome {
    pub sheet: String,
    pub class_id: Option<String>,
    pub imported: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub imported: usize,
    pub sheets: Vec<SheetOutcome>,
    pub warnings: Vec<serde_json::Value>,
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

fn sheet_text(rows: &[Vec<String>]) -> String {
    let mut text = String::new();
    for row in rows {
        let line: Vec<String> = row.iter().map(|cell| csv_quote(cell)).collect();
        text.push_str(&line.join(","));
        text.push('\n');
    }
    text
}

fn sheet_rows(text: &str) -> Vec<Vec<String>> {
    text.lines().map(parse_csv_record).collect()
}

fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | '[' | ']' | ':' => '_',
            other => other,
        })
        .collect();
    let trimmed: String = cleaned.trim().chars().take(31).collect();
    if trimmed.is_empty() {
        "class".to_string()
    } else {
        trimmed
    }
}

fn template_rows(profile: &SchoolProfile, class_name: &str) -> Vec<Vec<String>> {
    let blank = || vec![String::new(); SHEET_COLUMNS];
    let mut rows = vec![blank(), blank()];

    let mut banner = blank();
    banner[0] = profile.school_name.clone();
    banner[4] = format!("School year {}", profile.school_year);
    rows.push(banner);

    let mut town = blank();
    town[0] = profile.town.clone();
    rows.push(town);

    let mut class_row = blank();
    class_row[CLASS_NAME_COL] = class_name.to_string();
    rows.push(class_row);

    rows.push(blank());
    rows.push(blank());

    rows.push(
        [
            "No.",
            "Last name",
            "First name",
            "Gender",
            "Birth date",
            "Birth place",
            "Repeat",
            "Guardian",
            "Address",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    rows.push(
        [
            "1",
            PLACEHOLDER_LAST_NAME,
            PLACEHOLDER_FIRST_NAME,
            "M/F",
            "YYYY/MM/DD",
            "Birth place",
            "",
            "Guardian name",
            "Full address",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    rows
}

/// One sheet per class, every sheet carrying the fixed header template.
pub fn export_workbook(
    conn: &Connection,
    profile: &SchoolProfile,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let mut stmt = conn.prepare("SELECT id, name FROM classes ORDER BY name")?;
    let classes = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create workbook file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": WORKBOOK_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "sheetCount": classes.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    let mut used_names: HashSet<String> = HashSet::new();
    for (_, class_name) in &classes {
        let mut sheet_name = sanitize_sheet_name(class_name);
        let mut suffix = 2usize;
        while !used_names.insert(sheet_name.clone()) {
            sheet_name = format!("{}-{}", sanitize_sheet_name(class_name), suffix);
            suffix += 1;
        }
        let entry = format!("{}{}.csv", SHEET_DIR, sheet_name);
        zip.start_file(&entry, opts)
            .with_context(|| format!("failed to start sheet entry {}", entry))?;
        zip.write_all(sheet_text(&template_rows(profile, class_name)).as_bytes())
            .with_context(|| format!("failed to write sheet entry {}", entry))?;
    }

    zip.finish().context("failed to finalize workbook")?;
    Ok(ExportSummary {
        sheet_count: classes.len(),
    })
}

fn find_class_id(
    conn: &Connection,
    rows: &[Vec<String>],
    sheet_title: &str,
) -> anyhow::Result<Option<String>> {
    let cell_name = rows
        .get(CLASS_NAME_ROW)
        .and_then(|row| row.get(CLASS_NAME_COL))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let mut stmt = conn.prepare("SELECT id, name FROM classes")?;
    let classes = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, name) in &classes {
        if !cell_name.is_empty() && name == &cell_name {
            return Ok(Some(id.clone()));
        }
    }
    for (id, name) in &classes {
        if sanitize_sheet_name(name) == sheet_title || name == sheet_title {
            return Ok(Some(id.clone()));
        }
    }
    Ok(None)
}

fn import_sheet_rows(
    conn: &Connection,
    class_id: &str,
    rows: &[Vec<String>],
) -> anyhow::Result<usize> {
    let mut sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )?;

    let mut imported = 0usize;
    for row in rows.iter().skip(DATA_START_ROW) {
        let cell = |idx: usize| -> String {
            row.get(idx).map(|s| s.trim().to_string()).unwrap_or_default()
        };
        let last_name = cell(1);
        let first_name = cell(2);
        if last_name.is_empty() || first_name.is_empty() {
            continue;
        }
        if last_name == PLACEHOLDER_LAST_NAME || first_name == PLACEHOLDER_FIRST_NAME {
            continue;
        }
        let gender = cell(3);
        let birth_date = cell(4).replace('/', "-");
        let birth_place = cell(5);
        let guardian_name = cell(7);
        let address = cell(8);

        conn.execute(
            "INSERT INTO students(
               id, class_id, last_name, first_name, birth_date, gender,
               birth_place, guardian_name, address, sort_order, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (
                Uuid::new_v4().to_string(),
                class_id,
                &last_name,
                &first_name,
                &birth_date,
                &gender,
                &birth_place,
                &guardian_name,
                &address,
                sort_order,
            ),
        )?;
        sort_order += 1;
        imported += 1;
    }
    Ok(imported)
}

/// Read every sheet, match each to a class by the name cell or the sheet
/// title, and append its data rows as students. Unmatched or malformed
/// sheets are skipped with a warning, never a hard error.
pub fn import_workbook(conn: &Connection, in_path: &Path) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open workbook {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid workbook archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("workbook missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != WORKBOOK_FORMAT_V1 {
        return Err(anyhow!("unsupported workbook format: {}", format));
    }

    let sheet_entries: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .filter(|name| name.starts_with(SHEET_DIR) && name.ends_with(".csv"))
        .collect();

    let tx = conn.unchecked_transaction()?;
    let mut summary = ImportSummary {
        imported: 0,
        sheets: Vec::new(),
        warnings: Vec::new(),
    };

    for entry_name in sheet_entries {
        let sheet_title = entry_name
            .trim_start_matches(SHEET_DIR)
            .trim_end_matches(".csv")
            .to_string();

        let mut text = String::new();
        let read_ok = archive
            .by_name(&entry_name)
            .ok()
            .and_then(|mut e| e.read_to_string(&mut text).ok())
            .is_some();
        if !read_ok {
            summary.warnings.push(json!({
                "sheet": sheet_title,
                "code": "unreadable_sheet",
                "message": "sheet could not be read as text"
            }));
            continue;
        }

        let rows = sheet_rows(&text);
        let Some(class_id) = find_class_id(&tx, &rows, &sheet_title)? else {
            summary.warnings.push(json!({
                "sheet": sheet_title,
                "code": "unmatched_sheet",
                "message": "no class matches the sheet name cell or title"
            }));
            summary.sheets.push(SheetOutcome {
                sheet: sheet_title,
                class_id: None,
                imported: 0,
            });
            continue;
        };

        let imported = import_sheet_rows(&tx, &class_id, &rows)?;
        summary.imported += imported;
        summary.sheets.push(SheetOutcome {
            sheet: sheet_title,
            class_id: Some(class_id),
            imported,
        });
    }

    tx.commit()?;
    Ok(summary)
}

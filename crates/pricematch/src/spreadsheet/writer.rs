use std::collections::HashSet;
use std::io::{Cursor, Write};

use quick_xml::escape::escape;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{column_letter, Cell, Workbook};
use crate::error::SpreadsheetError;

const MAX_SHEET_NAME_LEN: usize = 31;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs></styleSheet>"#;

/// Serializes a workbook as a minimal `.xlsx` with inline strings.
pub fn write_workbook(workbook: &Workbook) -> Result<Vec<u8>, SpreadsheetError> {
    let names = unique_sheet_names(workbook.sheets.iter().map(|s| s.name.as_str()));
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut put = |name: &str, content: &str| -> Result<(), SpreadsheetError> {
        zip.start_file(name, options)
            .map_err(|e| SpreadsheetError::Write(e.to_string()))?;
        zip.write_all(content.as_bytes())
            .map_err(|e| SpreadsheetError::Write(e.to_string()))
    };

    put("[Content_Types].xml", &content_types(names.len()))?;
    put("_rels/.rels", ROOT_RELS)?;
    put("xl/workbook.xml", &workbook_xml(&names))?;
    put("xl/_rels/workbook.xml.rels", &workbook_rels(names.len()))?;
    put("xl/styles.xml", STYLES)?;
    for (index, sheet) in workbook.sheets.iter().enumerate() {
        put(
            &format!("xl/worksheets/sheet{}.xml", index + 1),
            &worksheet_xml(&sheet.rows),
        )?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| SpreadsheetError::Write(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Sheet names are at most 31 characters, avoid `[]:*?/\` and must be
/// unique ignoring case.
fn unique_sheet_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for (index, raw) in names.enumerate() {
        let cleaned: String = raw
            .chars()
            .map(|c| if "[]:*?/\\".contains(c) { '_' } else { c })
            .take(MAX_SHEET_NAME_LEN)
            .collect();
        let base = if cleaned.trim().is_empty() {
            format!("Sheet{}", index + 1)
        } else {
            cleaned
        };

        let mut candidate = base.clone();
        let mut counter = 2;
        while !seen.insert(candidate.to_lowercase()) {
            let suffix = format!(" ({})", counter);
            let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
            candidate = format!("{}{}", base.chars().take(keep).collect::<String>(), suffix);
            counter += 1;
        }
        result.push(candidate);
    }
    result
}

fn content_types(sheet_count: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
    );
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            n
        ));
    }
    xml.push_str("</Types>");
    xml
}

fn workbook_xml(names: &[String]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    for (index, name) in names.iter().enumerate() {
        xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape(name.as_str()),
            index + 1,
            index + 1
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels(sheet_count: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            n, n
        ));
    }
    xml.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        sheet_count + 1
    ));
    xml.push_str("</Relationships>");
    xml
}

fn worksheet_xml(rows: &[Vec<Cell>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        if row.iter().all(|c| *c == Cell::Empty) {
            continue;
        }
        let row_number = r + 1;
        xml.push_str(&format!(r#"<row r="{}">"#, row_number));
        for (col, cell) in row.iter().enumerate() {
            let reference = format!("{}{}", column_letter(col), row_number);
            match cell {
                Cell::Empty => {}
                Cell::Number(n) if n.is_finite() => {
                    xml.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, reference, n));
                }
                Cell::Number(n) => {
                    xml.push_str(&format!(
                        r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                        reference, n
                    ));
                }
                Cell::Text(s) => {
                    xml.push_str(&format!(
                        r#"<c r="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                        reference,
                        escape(s.as_str())
                    ));
                }
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{parse_cell_ref, Cell, Sheet, Workbook, MAX_COLUMNS, MAX_ROWS};
use crate::error::SpreadsheetError;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Largest decompressed size accepted for one workbook part.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;
/// Cells a single worksheet grid may allocate, gaps included.
const MAX_SHEET_CELLS: usize = 2_000_000;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Reads every worksheet of an `.xlsx` file, in workbook order.
pub fn read_workbook(bytes: &[u8]) -> Result<Workbook, SpreadsheetError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| SpreadsheetError::Archive(e.to_string()))?;

    let workbook_xml = read_part(&mut archive, WORKBOOK_PART)?
        .ok_or_else(|| SpreadsheetError::MissingPart(WORKBOOK_PART.to_string()))?;
    let rels_xml = read_part(&mut archive, WORKBOOK_RELS_PART)?
        .ok_or_else(|| SpreadsheetError::MissingPart(WORKBOOK_RELS_PART.to_string()))?;
    let shared = match read_part(&mut archive, SHARED_STRINGS_PART)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let targets = parse_relationships(&rels_xml)?;
    let mut workbook = Workbook::default();
    for (name, rel_id) in parse_sheet_list(&workbook_xml)? {
        let Some(target) = targets.get(&rel_id) else {
            log::warn!("Sheet '{}' has no relationship target, skipping", name);
            continue;
        };
        let part = resolve_target(target);
        let xml = read_part(&mut archive, &part)?
            .ok_or_else(|| SpreadsheetError::MissingPart(part.clone()))?;
        let rows = parse_worksheet(&xml, &part, &shared)?;
        workbook.sheets.push(Sheet { name, rows });
    }
    Ok(workbook)
}

fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Option<String>, SpreadsheetError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(SpreadsheetError::Archive(e.to_string())),
    };
    let mut content = String::new();
    file.by_ref()
        .take(MAX_PART_BYTES + 1)
        .read_to_string(&mut content)
        .map_err(|e| SpreadsheetError::Archive(format!("{}: {}", name, e)))?;
    if content.len() as u64 > MAX_PART_BYTES {
        return Err(too_large(name, format!("part is larger than {} bytes", MAX_PART_BYTES)));
    }
    Ok(Some(content))
}

/// Relationship targets are relative to `xl/` unless absolute.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn too_large(part: &str, reason: impl Into<String>) -> SpreadsheetError {
    SpreadsheetError::TooLarge {
        part: part.to_string(),
        reason: reason.into(),
    }
}

fn xml_error(part: &str, err: impl std::fmt::Display) -> SpreadsheetError {
    SpreadsheetError::Xml {
        part: part.to_string(),
        reason: err.to_string(),
    }
}

fn attr(element: &BytesStart<'_>, key: &[u8], part: &str) -> Result<Option<String>, SpreadsheetError> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| xml_error(part, e))?;
        if attribute.key.as_ref() == key {
            let value = attribute.unescape_value().map_err(|e| xml_error(part, e))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// `(sheet name, relationship id)` pairs from `workbook.xml`.
fn parse_sheet_list(xml: &str) -> Result<Vec<(String, String)>, SpreadsheetError> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event().map_err(|e| xml_error(WORKBOOK_PART, e))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name", WORKBOOK_PART)?;
                let rel_id = attr(&e, b"r:id", WORKBOOK_PART)?;
                if let (Some(name), Some(rel_id)) = (name, rel_id) {
                    sheets.push((name, rel_id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, SpreadsheetError> {
    let mut reader = Reader::from_str(xml);
    let mut targets = HashMap::new();
    loop {
        match reader
            .read_event()
            .map_err(|e| xml_error(WORKBOOK_RELS_PART, e))?
        {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attr(&e, b"Id", WORKBOOK_RELS_PART)?;
                let target = attr(&e, b"Target", WORKBOOK_RELS_PART)?;
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(targets)
}

/// Each `<si>` becomes one string; rich-text runs are concatenated and
/// phonetic hints are dropped.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, SpreadsheetError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader
            .read_event()
            .map_err(|e| xml_error(SHARED_STRINGS_PART, e))?
        {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text && !in_phonetic => {
                let text = t.unescape().map_err(|e| xml_error(SHARED_STRINGS_PART, e))?;
                current.push_str(&text);
            }
            Event::CData(c) if in_text && !in_phonetic => {
                current.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

#[derive(Default)]
struct PendingCell {
    col: usize,
    kind: Option<String>,
    value: String,
}

impl PendingCell {
    fn into_cell(self, shared: &[String]) -> Cell {
        let raw = self.value;
        match self.kind.as_deref() {
            Some("s") => raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i))
                .map(|s| Cell::Text(s.clone()))
                .unwrap_or(Cell::Empty),
            Some("inlineStr") | Some("str") => {
                if raw.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(raw)
                }
            }
            Some("b") => Cell::Text(if raw.trim() == "1" { "TRUE" } else { "FALSE" }.to_string()),
            Some("e") => Cell::Text(raw),
            _ => match raw.trim() {
                "" => Cell::Empty,
                trimmed => trimmed
                    .parse::<f64>()
                    .map(Cell::Number)
                    .unwrap_or_else(|_| Cell::Text(raw.clone())),
            },
        }
    }
}

/// Cell grid under construction, bounded to the Excel sheet size.
struct Grid<'a> {
    part: &'a str,
    rows: Vec<Vec<Cell>>,
    allocated: usize,
}

impl<'a> Grid<'a> {
    fn new(part: &'a str) -> Self {
        Self {
            part,
            rows: Vec::new(),
            allocated: 0,
        }
    }

    fn place(&mut self, row_number: usize, col: usize, value: Cell) -> Result<(), SpreadsheetError> {
        if value == Cell::Empty || row_number == 0 {
            return Ok(());
        }
        if row_number > MAX_ROWS || col >= MAX_COLUMNS {
            return Err(too_large(
                self.part,
                format!("cell at row {} column {} is outside the sheet", row_number, col + 1),
            ));
        }

        let grow_rows = row_number.saturating_sub(self.rows.len());
        let current = self.rows.get(row_number - 1).map_or(0, Vec::len);
        let grow_cols = (col + 1).saturating_sub(current);
        self.allocated += grow_rows + grow_cols;
        if self.allocated > MAX_SHEET_CELLS {
            return Err(too_large(
                self.part,
                format!("more than {} cells", MAX_SHEET_CELLS),
            ));
        }

        if grow_rows > 0 {
            self.rows.resize_with(row_number, Vec::new);
        }
        let row = &mut self.rows[row_number - 1];
        if grow_cols > 0 {
            row.resize(col + 1, Cell::Empty);
        }
        row[col] = value;
        Ok(())
    }
}

fn row_attr(e: &BytesStart<'_>, part: &str, previous: usize) -> Result<usize, SpreadsheetError> {
    let row = match attr(e, b"r", part)? {
        Some(r) => r.trim().parse::<usize>().ok(),
        None => None,
    };
    let row = row.unwrap_or(previous + 1);
    if row > MAX_ROWS {
        return Err(too_large(part, format!("row {} is outside the sheet", row)));
    }
    Ok(row)
}

fn column_attr(e: &BytesStart<'_>, part: &str, next_col: usize) -> Result<usize, SpreadsheetError> {
    match attr(e, b"r", part)? {
        Some(r) => parse_cell_ref(&r)
            .map(|(_, col)| col)
            .ok_or_else(|| too_large(part, format!("invalid cell reference '{}'", r))),
        None => Ok(next_col),
    }
}

fn parse_worksheet(
    xml: &str,
    part: &str,
    shared: &[String],
) -> Result<Vec<Vec<Cell>>, SpreadsheetError> {
    let mut reader = Reader::from_str(xml);
    let mut grid = Grid::new(part);
    let mut row_number = 0usize;
    let mut next_col = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut capture = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(part, e))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row_number = row_attr(&e, part, row_number)?;
                next_col = 0;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let col = column_attr(&e, part, next_col)?;
                next_col = col + 1;
                cell = Some(PendingCell {
                    col,
                    kind: attr(&e, b"t", part)?,
                    value: String::new(),
                });
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                next_col = column_attr(&e, part, next_col)? + 1;
            }
            Event::Start(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => {
                capture = cell.is_some();
            }
            Event::Text(t) if capture => {
                let text = t.unescape().map_err(|e| xml_error(part, e))?;
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        let col = c.col;
                        grid.place(row_number, col, c.into_cell(shared))?;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(grid.rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::write_workbook;

    #[test]
    fn test_reads_written_workbook() {
        let mut sheet = Sheet::new("Bill 1");
        sheet.push_row(vec![Cell::text("Description"), Cell::text("Qty")]);
        sheet.push_row(vec![Cell::text("Concrete & rebar <C30>"), Cell::Number(12.5)]);
        let bytes = write_workbook(&Workbook {
            sheets: vec![sheet.clone(), Sheet::new("Empty")],
        })
        .unwrap();

        let workbook = read_workbook(&bytes).unwrap();
        assert_eq!(workbook.sheets.len(), 2);
        assert_eq!(workbook.sheets[0], sheet);
        assert_eq!(workbook.sheets[1].name, "Empty");
        assert!(workbook.sheets[1].rows.is_empty());
    }

    #[test]
    fn test_shared_strings_with_rich_text() {
        let xml = r#"<?xml version="1.0"?>
            <sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
              <si><t>Plain</t></si>
              <si><r><t>Rich </t></r><r><t>text</t></r><rPh><t>ignored</t></rPh></si>
              <si/>
              <si><t>A &amp; B</t></si>
            </sst>"#;
        let strings = parse_shared_strings(xml).unwrap();
        assert_eq!(strings, vec!["Plain", "Rich text", "", "A & B"]);
    }

    #[test]
    fn test_worksheet_cell_types_and_gaps() {
        let shared = vec!["Excavation".to_string()];
        let xml = r#"<worksheet><sheetData>
              <row r="2">
                <c r="A2" t="s"><v>0</v></c>
                <c r="C2"><v>42</v></c>
                <c r="D2" t="inlineStr"><is><t>m3</t></is></c>
                <c r="E2" t="b"><v>1</v></c>
              </row>
              <row r="4"><c r="B4" t="str"><f>A1</f><v>formula</v></c></row>
            </sheetData></worksheet>"#;
        let rows = parse_worksheet(xml, "sheet", &shared).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_empty());
        assert_eq!(rows[1][0], Cell::text("Excavation"));
        assert_eq!(rows[1][1], Cell::Empty);
        assert_eq!(rows[1][2], Cell::Number(42.0));
        assert_eq!(rows[1][3], Cell::text("m3"));
        assert_eq!(rows[1][4], Cell::text("TRUE"));
        assert_eq!(rows[3][1], Cell::text("formula"));
    }

    #[test]
    fn test_row_beyond_sheet_is_rejected() {
        let xml = r#"<worksheet><sheetData>
              <row r="1000000000000000000"><c r="A1"><v>1</v></c></row>
            </sheetData></worksheet>"#;
        let err = parse_worksheet(xml, "sheet", &[]).unwrap_err();
        assert!(matches!(err, SpreadsheetError::TooLarge { .. }));
    }

    #[test]
    fn test_column_beyond_sheet_is_rejected() {
        for reference in ["XFE1", "AAAAAAAAAAAAAAAAAAAAA1", "A99999999999999999999"] {
            let xml = format!(
                r#"<worksheet><sheetData><row r="1"><c r="{}"><v>1</v></c></row></sheetData></worksheet>"#,
                reference
            );
            let err = parse_worksheet(&xml, "sheet", &[]).unwrap_err();
            assert!(matches!(err, SpreadsheetError::TooLarge { .. }), "{}", reference);
        }
    }

    #[test]
    fn test_far_corner_cell_is_accepted() {
        let xml = r#"<worksheet><sheetData>
              <row r="1048576"><c r="XFD1048576"><v>7</v></c></row>
            </sheetData></worksheet>"#;
        let rows = parse_worksheet(xml, "sheet", &[]).unwrap();
        assert_eq!(rows.len(), 1_048_576);
        assert_eq!(rows[1_048_575][16_383], Cell::Number(7.0));
    }

    #[test]
    fn test_sparse_sheet_over_cell_budget_is_rejected() {
        let mut xml = String::from("<worksheet><sheetData>");
        for row in 1..=200 {
            xml.push_str(&format!(
                r#"<row r="{row}"><c r="XFD{row}"><v>1</v></c></row>"#
            ));
        }
        xml.push_str("</sheetData></worksheet>");

        let err = parse_worksheet(&xml, "sheet", &[]).unwrap_err();
        assert!(matches!(err, SpreadsheetError::TooLarge { .. }));
    }

    #[test]
    fn test_truncated_archive_is_rejected() {
        let mut sheet = Sheet::new("Bill");
        sheet.push_row(vec![Cell::text("Description")]);
        let bytes = write_workbook(&Workbook { sheets: vec![sheet] }).unwrap();

        assert!(read_workbook(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_malformed_worksheet_xml_is_rejected() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</c></row>"#;
        assert!(parse_worksheet(xml, "sheet", &[]).is_err());
    }

    #[test]
    fn test_rejects_non_zip() {
        assert!(matches!(
            read_workbook(b"not a workbook"),
            Err(SpreadsheetError::Archive(_))
        ));
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
    }
}

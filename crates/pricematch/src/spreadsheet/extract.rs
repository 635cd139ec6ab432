//! BOQ line-item extraction.
//!
//! Per sheet, the header row is the first of the top 20 rows with at least
//! three filled cells that either names a description-like column or has
//! four or more filled cells. Below it, a row with a description and a
//! positive quantity is a line item; a row with a description and no
//! quantity is a context header that applies to the items after it.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Cell, Sheet, Workbook};

const HEADER_SEARCH_ROWS: usize = 20;
const HEADER_KEYWORDS: [&str; 3] = ["description", "item", "particular"];

const DESCRIPTION_KEYWORDS: [&str; 6] =
    ["description", "desc", "particular", "item", "work", "activity"];
const QUANTITY_KEYWORDS: [&str; 4] = ["quantity", "qty", "volume", "amount"];
const UNIT_KEYWORDS: [&str; 3] = ["unit", "uom", "measure"];
const RATE_KEYWORDS: [&str; 3] = ["rate", "price", "cost"];

static MAJOR_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(BILL|SUB-BILL|SECTION|PART|DIVISION)").unwrap());
static SUB_HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^[A-Z]\d+\s").unwrap());
static MINOR_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(NOTE|Excavating|Filling|Disposal)").unwrap());

/// One BOQ line item as carried in a job batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoqLineItem {
    /// Position across the whole job, assigned at job creation.
    #[serde(default)]
    pub batch_index: usize,
    pub description: String,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub context_headers: Vec<String>,
    /// 1-based row in the source sheet.
    pub row_number: usize,
    pub sheet_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetItems {
    pub name: String,
    pub header_row: Option<usize>,
    pub items: Vec<BoqLineItem>,
}

/// 0-based column positions detected from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub description: usize,
    pub quantity: Option<usize>,
    pub unit: Option<usize>,
    pub rate: Option<usize>,
}

impl ColumnMap {
    pub fn detect(headers: &[String]) -> Self {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        Self {
            description: find_column(&lowered, &DESCRIPTION_KEYWORDS).unwrap_or(0),
            quantity: find_column(&lowered, &QUANTITY_KEYWORDS),
            unit: find_column(&lowered, &UNIT_KEYWORDS),
            rate: find_column(&lowered, &RATE_KEYWORDS),
        }
    }
}

/// Keywords are tried in priority order; an exact header match wins over a
/// substring match for the same keyword.
fn find_column(headers: &[String], keywords: &[&str]) -> Option<usize> {
    keywords.iter().find_map(|keyword| {
        headers
            .iter()
            .position(|h| h == keyword)
            .or_else(|| headers.iter().position(|h| h.contains(keyword)))
    })
}

/// 1-based header row number, if the sheet has one.
pub fn find_header_row(sheet: &Sheet) -> Option<usize> {
    (1..=sheet.rows.len().min(HEADER_SEARCH_ROWS)).find(|&row_number| {
        let row = &sheet.rows[row_number - 1];
        let filled = row.iter().filter(|c| !c.is_empty()).count();
        if filled < 3 {
            return false;
        }
        let has_keyword = row.iter().any(|c| {
            let value = c.as_string().to_lowercase();
            HEADER_KEYWORDS.iter().any(|k| value.contains(k))
        });
        has_keyword || filled >= 4
    })
}

/// Positive quantities only; `-`, `n/a` and blanks are "no quantity".
pub fn parse_quantity(cell: &Cell) -> Option<f64> {
    let value = match cell {
        Cell::Empty => return None,
        Cell::Number(n) => *n,
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("n/a") {
                return None;
            }
            trimmed.replace(',', "").parse::<f64>().ok()?
        }
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Updates the context hierarchy with a header row's text.
fn push_context(hierarchy: &mut Vec<String>, text: &str) {
    if MAJOR_HEADER.is_match(text) {
        hierarchy.clear();
    } else if SUB_HEADER.is_match(text) {
        hierarchy.retain(|h| MAJOR_HEADER.is_match(h));
    } else if MINOR_HEADER.is_match(text) {
        hierarchy.retain(|h| MAJOR_HEADER.is_match(h) || SUB_HEADER.is_match(h));
    }
    hierarchy.push(text.to_string());
}

pub fn extract_sheet(sheet: &Sheet) -> SheetItems {
    let Some(header_row) = find_header_row(sheet) else {
        log::debug!("Sheet '{}' has no header row, skipping", sheet.name);
        return SheetItems {
            name: sheet.name.clone(),
            header_row: None,
            items: Vec::new(),
        };
    };

    let headers: Vec<String> = sheet.rows[header_row - 1]
        .iter()
        .map(Cell::as_string)
        .collect();
    let columns = ColumnMap::detect(&headers);
    let mut hierarchy: Vec<String> = Vec::new();
    let mut items = Vec::new();

    for row_number in header_row + 1..=sheet.rows.len() {
        let description = sheet.cell(row_number, columns.description).as_string();
        let description = description.trim();
        if description.is_empty() {
            continue;
        }
        let quantity = columns
            .quantity
            .and_then(|col| parse_quantity(sheet.cell(row_number, col)));

        match quantity {
            Some(quantity) => {
                let unit = columns
                    .unit
                    .map(|col| sheet.cell(row_number, col).as_string().trim().to_string())
                    .filter(|u| !u.is_empty());
                items.push(BoqLineItem {
                    batch_index: 0,
                    description: description.to_string(),
                    quantity,
                    unit,
                    context_headers: hierarchy.clone(),
                    row_number,
                    sheet_name: sheet.name.clone(),
                });
            }
            None => push_context(&mut hierarchy, description),
        }
    }

    SheetItems {
        name: sheet.name.clone(),
        header_row: Some(header_row),
        items,
    }
}

/// Extracts line items from every sheet, in workbook order.
pub fn extract_items(workbook: &Workbook) -> Vec<SheetItems> {
    workbook.sheets.iter().map(extract_sheet).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<Cell> {
        cells
            .iter()
            .map(|c| {
                if c.is_empty() {
                    Cell::Empty
                } else if let Ok(n) = c.parse::<f64>() {
                    Cell::Number(n)
                } else {
                    Cell::text(*c)
                }
            })
            .collect()
    }

    fn boq_sheet() -> Sheet {
        let mut sheet = Sheet::new("Bill 2");
        sheet.push_row(row(&["Riverside Tower", "", "", ""]));
        sheet.push_row(row(&["Item", "Description", "Qty", "Unit", "Rate"]));
        sheet.push_row(row(&["", "BILL 2 SUBSTRUCTURE", "", "", ""]));
        sheet.push_row(row(&["", "D20 Excavating and filling", "", "", ""]));
        sheet.push_row(row(&["A", "Excavate topsoil 150mm deep", "120", "m2", ""]));
        sheet.push_row(row(&["B", "Disposal off site", "-", "", ""]));
        sheet.push_row(row(&["C", "Hardcore filling", "1,250.5", "m3", ""]));
        sheet.push_row(row(&["D", "", "5", "nr", ""]));
        sheet
    }

    #[test]
    fn test_header_row_detection() {
        let sheet = boq_sheet();
        assert_eq!(find_header_row(&sheet), Some(2));

        let mut bare = Sheet::new("Notes");
        bare.push_row(row(&["Just a note"]));
        assert_eq!(find_header_row(&bare), None);
    }

    #[test]
    fn test_column_detection_prefers_description_over_item() {
        let headers: Vec<String> = ["Item", "Description", "Qty", "Unit", "Unit Rate"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let columns = ColumnMap::detect(&headers);
        assert_eq!(columns.description, 1);
        assert_eq!(columns.quantity, Some(2));
        assert_eq!(columns.unit, Some(3));
        assert_eq!(columns.rate, Some(4));
    }

    #[test]
    fn test_extracts_items_with_context() {
        let extracted = extract_sheet(&boq_sheet());
        assert_eq!(extracted.header_row, Some(2));
        assert_eq!(extracted.items.len(), 2);

        let first = &extracted.items[0];
        assert_eq!(first.description, "Excavate topsoil 150mm deep");
        assert_eq!(first.quantity, 120.0);
        assert_eq!(first.unit.as_deref(), Some("m2"));
        assert_eq!(first.row_number, 5);
        assert_eq!(first.sheet_name, "Bill 2");
        assert_eq!(
            first.context_headers,
            vec!["BILL 2 SUBSTRUCTURE", "D20 Excavating and filling"]
        );

        let second = &extracted.items[1];
        assert_eq!(second.quantity, 1250.5);
        assert_eq!(second.row_number, 7);
        assert_eq!(
            second.context_headers,
            vec![
                "BILL 2 SUBSTRUCTURE",
                "D20 Excavating and filling",
                "Disposal off site"
            ]
        );
    }

    #[test]
    fn test_major_header_resets_context() {
        let mut hierarchy = vec!["BILL 1".to_string(), "Note".to_string()];
        push_context(&mut hierarchy, "SECTION 3 ROOFING");
        assert_eq!(hierarchy, vec!["SECTION 3 ROOFING"]);
        push_context(&mut hierarchy, "R10 Rainwater");
        push_context(&mut hierarchy, "R11 Drainage");
        assert_eq!(hierarchy, vec!["SECTION 3 ROOFING", "R11 Drainage"]);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&Cell::Number(3.0)), Some(3.0));
        assert_eq!(parse_quantity(&Cell::Number(0.0)), None);
        assert_eq!(parse_quantity(&Cell::Number(-2.0)), None);
        assert_eq!(parse_quantity(&Cell::text(" 1,000 ")), Some(1000.0));
        assert_eq!(parse_quantity(&Cell::text("N/A")), None);
        assert_eq!(parse_quantity(&Cell::text("-")), None);
        assert_eq!(parse_quantity(&Cell::text("item")), None);
        assert_eq!(parse_quantity(&Cell::Empty), None);
    }

    #[test]
    fn test_extract_items_across_sheets() {
        let workbook = Workbook {
            sheets: vec![boq_sheet(), Sheet::new("Empty")],
        };
        let sheets = extract_items(&workbook);
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].items.len(), 2);
        assert!(sheets[1].items.is_empty());
        assert_eq!(sheets[1].header_row, None);
    }
}

use super::{find_header_row, read_workbook, write_workbook, Cell, Sheet, Workbook};
use crate::db::job_repo::{JobRow, MATCHED_CONFIDENCE};
use crate::db::result_repo::MatchResultRow;
use crate::error::SpreadsheetError;

/// Columns appended to every sheet of the original workbook.
pub const RESULT_COLUMNS: [&str; 6] = [
    "Matched Description",
    "Matched Code",
    "Matched Unit",
    "Matched Rate",
    "Total",
    "Confidence",
];

const FALLBACK_HEADERS: [&str; 12] = [
    "Sheet",
    "Row",
    "Description",
    "Quantity",
    "Unit",
    "Matched Description",
    "Matched Code",
    "Matched Unit",
    "Matched Rate",
    "Total",
    "Confidence",
    "Error",
];

/// Builds the downloadable workbook for a completed job.
///
/// With a readable original, every sheet is copied and the match columns
/// are appended at each result's row. Otherwise a flat `Results` sheet is
/// written. Both variants end with a `Summary` sheet.
pub fn build_results_workbook(
    original: Option<&[u8]>,
    job: &JobRow,
    results: &[MatchResultRow],
) -> Result<Vec<u8>, SpreadsheetError> {
    let annotated = original.and_then(|bytes| match read_workbook(bytes) {
        Ok(workbook) if !workbook.sheets.is_empty() => Some(annotate(workbook, results)),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Original workbook for job {} is unreadable: {}", job.id, e);
            None
        }
    });

    let mut workbook = annotated.unwrap_or_else(|| Workbook {
        sheets: vec![flat_results(results)],
    });
    workbook.sheets.push(summary(job, results));
    write_workbook(&workbook)
}

fn confidence_cell(confidence: f64) -> Cell {
    Cell::Number((confidence * 100.0).round() / 100.0)
}

fn optional_text(value: &Option<String>) -> Cell {
    value.as_deref().map(Cell::text).unwrap_or(Cell::Empty)
}

fn optional_number(value: Option<f64>) -> Cell {
    value.map(Cell::Number).unwrap_or(Cell::Empty)
}

fn match_cells(result: &MatchResultRow) -> [Cell; 6] {
    [
        optional_text(&result.matched_description),
        optional_text(&result.matched_code),
        optional_text(&result.matched_unit),
        optional_number(result.matched_rate),
        optional_number(result.total_price),
        confidence_cell(result.confidence),
    ]
}

fn annotate(mut workbook: Workbook, results: &[MatchResultRow]) -> Workbook {
    for sheet in &mut workbook.sheets {
        let header_row = find_header_row(sheet).unwrap_or(1);
        let first_col = sheet.width();
        for (offset, title) in RESULT_COLUMNS.iter().enumerate() {
            sheet.set(header_row, first_col + offset, Cell::text(*title));
        }

        let sheet_name = sheet.name.clone();
        for result in results.iter().filter(|r| r.sheet_name == sheet_name) {
            let Ok(row_number) = usize::try_from(result.row_number) else {
                continue;
            };
            if row_number <= header_row {
                continue;
            }
            for (offset, cell) in match_cells(result).into_iter().enumerate() {
                sheet.set(row_number, first_col + offset, cell);
            }
        }
    }
    workbook
}

fn flat_results(results: &[MatchResultRow]) -> Sheet {
    let mut sheet = Sheet::new("Results");
    sheet.push_row(FALLBACK_HEADERS.iter().map(|h| Cell::text(*h)).collect());
    for result in results {
        let mut row = vec![
            Cell::text(result.sheet_name.as_str()),
            Cell::Number(result.row_number as f64),
            Cell::text(result.original_description.as_str()),
            optional_number(result.original_quantity),
            optional_text(&result.original_unit),
        ];
        row.extend(match_cells(result));
        row.push(optional_text(&result.error));
        sheet.push_row(row);
    }
    sheet
}

fn summary(job: &JobRow, results: &[MatchResultRow]) -> Sheet {
    let matched = results
        .iter()
        .filter(|r| r.confidence > MATCHED_CONFIDENCE)
        .count();
    let total: f64 = results.iter().filter_map(|r| r.total_price).sum();

    let mut sheet = Sheet::new("Summary");
    let mut pair = |label: &str, value: Cell| sheet.push_row(vec![Cell::text(label), value]);
    pair("File", Cell::text(job.file_name.as_str()));
    pair("Matching Method", Cell::text(job.matching_method.as_str()));
    pair("Items", Cell::Number(results.len() as f64));
    pair("Matched", Cell::Number(matched as f64));
    pair("Total Price", Cell::Number((total * 100.0).round() / 100.0));
    if let Some(project) = &job.project_name {
        pair("Project", Cell::text(project.as_str()));
    }
    sheet
}

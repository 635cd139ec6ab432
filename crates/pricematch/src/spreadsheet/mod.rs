//! Minimal `.xlsx` codec: read workbooks into cell grids, pull BOQ line
//! items out of them, and write annotated result workbooks.

mod export;
mod extract;
mod reader;
mod writer;

pub use export::{build_results_workbook, RESULT_COLUMNS};
pub use extract::{
    extract_items, find_header_row, parse_quantity, BoqLineItem, ColumnMap, SheetItems,
};
pub use reader::read_workbook;
pub use writer::write_workbook;

/// Last row of an Excel worksheet.
pub const MAX_ROWS: usize = 1_048_576;
/// Column count of an Excel worksheet (`A` to `XFD`).
pub const MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    /// Display form of the cell; numbers drop a trailing `.0`.
    pub fn as_string(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
        }
    }
}

/// One worksheet. `rows[0]` is sheet row 1 and `rows[r][0]` is column A.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    /// Cell at 1-based row and 0-based column.
    pub fn cell(&self, row_number: usize, col: usize) -> &Cell {
        const EMPTY: &Cell = &Cell::Empty;
        row_number
            .checked_sub(1)
            .and_then(|r| self.rows.get(r))
            .and_then(|row| row.get(col))
            .unwrap_or(EMPTY)
    }

    /// Sets the cell at 1-based row and 0-based column, growing the grid.
    pub fn set(&mut self, row_number: usize, col: usize, value: Cell) {
        let Some(r) = row_number.checked_sub(1) else {
            return;
        };
        if self.rows.len() <= r {
            self.rows.resize_with(r + 1, Vec::new);
        }
        let row = &mut self.rows[r];
        if row.len() <= col {
            row.resize(col + 1, Cell::Empty);
        }
        row[col] = value;
    }

    pub fn push_row(&mut self, cells: Vec<Cell>) {
        self.rows.push(cells);
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

/// True when the file name looks like an Office Open XML workbook.
pub fn is_workbook_file(file_name: &str) -> bool {
    mime_guess::from_path(file_name)
        .iter()
        .any(|mime| mime.essence_str() == crate::storage::XLSX_CONTENT_TYPE)
}

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
pub fn column_letter(mut col: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Parses a cell reference such as `AB12` into (1-based row, 0-based column).
///
/// References outside the `A1:XFD1048576` grid are rejected.
pub fn parse_cell_ref(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        col = col.checked_mul(26)?.checked_add(digit)?;
        if col > MAX_COLUMNS {
            return None;
        }
    }
    let row = digits.parse::<usize>().ok()?;
    if row == 0 || row > MAX_ROWS {
        return None;
    }
    Some((row, col - 1))
}

//! Price-list import and export, catalogue statistics and ranked search.
//!
//! Imports accept CSV or the first sheet of an `.xlsx` workbook. Column
//! names are matched case-insensitively and `keywords[0]`, `keywords[1]`...
//! columns are folded into one keyword list.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::info;

use crate::db::price_item_repo::{self, PriceItemRow, Upserted};
use crate::db::{new_id, Database};
use crate::error::PriceListError;
use crate::spreadsheet::{read_workbook, Cell};

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Header row of an exported price list.
pub const EXPORT_COLUMNS: [&str; 8] = [
    "id",
    "code",
    "description",
    "category",
    "subcategory",
    "unit",
    "rate",
    "keywords",
];

/// Unit given to imported items that name none.
pub const DEFAULT_UNIT: &str = "pcs";

/// One data row of an import file, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRecord {
    /// 1-based line or row number in the source file.
    pub line: usize,
    pub id: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub unit: Option<String>,
    pub rate: Option<String>,
    pub keywords: Vec<String>,
}

/// Rows read from an import file plus the lines that could not be read.
#[derive(Debug, Default)]
pub struct ParsedImport {
    pub records: Vec<ImportRecord>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total_items: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Code,
    Description,
    Category,
    Subcategory,
    Unit,
    Rate,
    Keywords,
}

impl Field {
    fn from_header(header: &str) -> Option<Self> {
        let name = header.trim().to_lowercase();
        let base = name.split('[').next().unwrap_or(&name);
        match base {
            "_id" | "id" => Some(Field::Id),
            "code" => Some(Field::Code),
            "description" => Some(Field::Description),
            "category" => Some(Field::Category),
            "subcategory" | "sub_category" => Some(Field::Subcategory),
            "unit" => Some(Field::Unit),
            "rate" | "price" => Some(Field::Rate),
            "keywords" => Some(Field::Keywords),
            _ => None,
        }
    }
}

fn build_record<I, S>(line: usize, fields: &[Option<Field>], values: I) -> ImportRecord
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut record = ImportRecord {
        line,
        ..ImportRecord::default()
    };
    for (field, value) in fields.iter().zip(values) {
        let value = value.as_ref().trim();
        if value.is_empty() {
            continue;
        }
        let slot = match field {
            Some(Field::Id) => &mut record.id,
            Some(Field::Code) => &mut record.code,
            Some(Field::Description) => &mut record.description,
            Some(Field::Category) => &mut record.category,
            Some(Field::Subcategory) => &mut record.subcategory,
            Some(Field::Unit) => &mut record.unit,
            Some(Field::Rate) => &mut record.rate,
            Some(Field::Keywords) => {
                record.keywords.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string),
                );
                continue;
            }
            None => continue,
        };
        slot.get_or_insert_with(|| value.to_string());
    }
    record
}

/// Reads an import file, choosing the format from its extension.
pub fn parse_import(file_name: &str, bytes: &[u8]) -> Result<ParsedImport, PriceListError> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "csv" => parse_csv(bytes),
        "xlsx" => parse_workbook(bytes),
        _ => Err(PriceListError::UnsupportedFormat(file_name.to_string())),
    }
}

/// Parses CSV with a header row. Short or long rows are tolerated; rows that
/// cannot be decoded are reported and skipped.
pub fn parse_csv(bytes: &[u8]) -> Result<ParsedImport, PriceListError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let fields: Vec<Option<Field>> = reader.headers()?.iter().map(Field::from_header).collect();

    let mut parsed = ParsedImport::default();
    for (index, row) in reader.records().enumerate() {
        let line = index + 2;
        match row {
            Ok(row) if row.iter().all(str::is_empty) => {}
            Ok(row) => parsed.records.push(build_record(line, &fields, row.iter())),
            Err(e) => parsed.errors.push(format!("Line {}: {}", line, e)),
        }
    }
    Ok(parsed)
}

/// Parses the first worksheet; its first non-empty row is the header.
pub fn parse_workbook(bytes: &[u8]) -> Result<ParsedImport, PriceListError> {
    let workbook = read_workbook(bytes)?;
    let mut parsed = ParsedImport::default();
    let Some(sheet) = workbook.sheets.first() else {
        return Ok(parsed);
    };

    let mut rows = sheet
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| !row.iter().all(Cell::is_empty));
    let Some((_, header)) = rows.next() else {
        return Ok(parsed);
    };
    let fields: Vec<Option<Field>> = header
        .iter()
        .map(|cell| Field::from_header(&cell.as_string()))
        .collect();
    for (index, row) in rows {
        let values = row.iter().map(Cell::as_string);
        parsed.records.push(build_record(index + 1, &fields, values));
    }
    Ok(parsed)
}

fn to_price_item(record: ImportRecord, user_id: &str, now: i64) -> Result<PriceItemRow, String> {
    let description = record
        .description
        .ok_or_else(|| format!("Line {}: description is required", record.line))?;
    let rate = match record.rate {
        Some(raw) => raw
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|r| r.is_finite() && *r >= 0.0)
            .ok_or_else(|| format!("Line {}: invalid rate '{}'", record.line, raw))?,
        None => 0.0,
    };

    Ok(PriceItemRow {
        id: record.id.unwrap_or_else(new_id),
        code: record.code,
        description,
        category: record.category,
        subcategory: record.subcategory,
        unit: Some(record.unit.unwrap_or_else(|| DEFAULT_UNIT.to_string())),
        rate,
        keywords: record.keywords,
        embedding: None,
        embedding_provider: None,
        is_active: true,
        created_by: Some(user_id.to_string()),
        created_at: now,
        updated_at: now,
    })
}

/// Validates parsed rows and upserts the valid ones.
///
/// Fails with [`PriceListError::NoItems`] when no row is usable, leaving the
/// price list untouched.
pub fn import_items(
    db: &Database,
    parsed: ParsedImport,
    user_id: &str,
    now: i64,
) -> Result<ImportSummary, PriceListError> {
    let mut summary = ImportSummary {
        total_items: parsed.records.len() + parsed.errors.len(),
        skipped: parsed.errors.len(),
        errors: parsed.errors,
        ..ImportSummary::default()
    };

    let mut items = Vec::with_capacity(parsed.records.len());
    for record in parsed.records {
        match to_price_item(record, user_id, now) {
            Ok(item) => items.push(item),
            Err(reason) => {
                summary.skipped += 1;
                summary.errors.push(reason);
            }
        }
    }
    if items.is_empty() {
        return Err(PriceListError::NoItems);
    }

    for outcome in price_item_repo::upsert_all(db, &items)? {
        match outcome {
            Upserted::Created => summary.created += 1,
            Upserted::Updated => summary.updated += 1,
        }
    }
    info!(
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        "Price list imported"
    );
    Ok(summary)
}

#[derive(Serialize)]
struct ExportRow<'a> {
    id: &'a str,
    code: &'a str,
    description: &'a str,
    category: &'a str,
    subcategory: &'a str,
    unit: &'a str,
    rate: f64,
    keywords: String,
}

impl<'a> From<&'a PriceItemRow> for ExportRow<'a> {
    fn from(item: &'a PriceItemRow) -> Self {
        Self {
            id: &item.id,
            code: item.code.as_deref().unwrap_or_default(),
            description: &item.description,
            category: item.category.as_deref().unwrap_or_default(),
            subcategory: item.subcategory.as_deref().unwrap_or_default(),
            unit: item.unit.as_deref().unwrap_or_default(),
            rate: item.rate,
            keywords: item.keywords.join(","),
        }
    }
}

/// Writes items as CSV under [`EXPORT_COLUMNS`]; the output imports back.
pub fn export_csv(items: &[PriceItemRow]) -> Result<Vec<u8>, PriceListError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(EXPORT_COLUMNS)?;
    for item in items {
        writer.serialize(ExportRow::from(item))?;
    }
    writer
        .into_inner()
        .map_err(|e| PriceListError::Csv(e.into_error().into()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceListStats {
    pub total_items: usize,
    pub categories: Vec<String>,
    pub category_subcategories: BTreeMap<String, Vec<String>>,
    /// Items lacking a category, subcategory, unit, description or rate.
    pub incomplete_count: usize,
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

pub fn stats(items: &[PriceItemRow]) -> PriceListStats {
    let mut categories = BTreeSet::new();
    let mut subcategories: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut incomplete_count = 0;

    for item in items {
        let category = item.category.as_deref().filter(|c| !c.trim().is_empty());
        let subcategory = item.subcategory.as_deref().filter(|s| !s.trim().is_empty());
        if let Some(category) = category {
            categories.insert(category.to_string());
            if let Some(subcategory) = subcategory {
                subcategories
                    .entry(category.to_string())
                    .or_default()
                    .insert(subcategory.to_string());
            }
        }
        if category.is_none()
            || subcategory.is_none()
            || is_blank(item.unit.as_deref())
            || item.description.trim().is_empty()
            || item.rate == 0.0
        {
            incomplete_count += 1;
        }
    }

    PriceListStats {
        total_items: items.len(),
        categories: categories.into_iter().collect(),
        category_subcategories: subcategories
            .into_iter()
            .map(|(category, subs)| (category, subs.into_iter().collect()))
            .collect(),
        incomplete_count,
    }
}

/// Shortest query [`search`] accepts.
pub const MIN_SEARCH_LEN: usize = 2;

fn search_score(item: &PriceItemRow, term: &str) -> u8 {
    let description = item.description.to_lowercase();
    let code = item.code.as_deref().unwrap_or_default().to_lowercase();
    let category = item.category.as_deref().unwrap_or_default().to_lowercase();

    if description == term || code == term {
        100
    } else if description.starts_with(term) || code.starts_with(term) {
        80
    } else if description.contains(&format!(" {}", term)) || description.contains(&format!("{} ", term)) {
        60
    } else if description.contains(term) || code.contains(term) {
        40
    } else if category.contains(term) {
        30
    } else {
        let rest = item
            .subcategory
            .iter()
            .chain(item.keywords.iter())
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        if rest.contains(term) {
            20
        } else {
            0
        }
    }
}

/// Ranks items against a free-text query, best first.
///
/// Exact description or code matches rank highest, then prefixes, whole
/// words, substrings, category and finally subcategory or keyword hits.
/// Equal scores keep catalogue order.
pub fn search<'a>(items: &'a [PriceItemRow], query: &str, limit: usize) -> Vec<&'a PriceItemRow> {
    let term = query.trim().to_lowercase();
    if term.chars().count() < MIN_SEARCH_LEN {
        return Vec::new();
    }
    let mut scored: Vec<(u8, &PriceItemRow)> = items
        .iter()
        .map(|item| (search_score(item, &term), item))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, item)| item).collect()
}

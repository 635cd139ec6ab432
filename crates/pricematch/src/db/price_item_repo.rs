//! Price item repository: the price-list catalogue matched against.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceItemRow {
    pub id: String,
    pub code: Option<String>,
    pub description: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub unit: Option<String>,
    pub rate: f64,
    pub keywords: Vec<String>,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_provider: Option<String>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PriceItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let keywords: String = row.get("keywords")?;
        let embedding: Option<String> = row.get("embedding")?;
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            description: row.get("description")?,
            category: row.get("category")?,
            subcategory: row.get("subcategory")?,
            unit: row.get("unit")?,
            rate: row.get("rate")?,
            keywords: serde_json::from_str(&keywords).unwrap_or_default(),
            embedding: embedding.and_then(|e| serde_json::from_str(&e).ok()),
            embedding_provider: row.get("embedding_provider")?,
            is_active: row.get("is_active")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter parameters for price-list listing.
#[derive(Debug, Default, Clone)]
pub struct PriceItemFilter {
    /// Case-insensitive substring over description, code and keywords.
    pub search: Option<String>,
    pub category: Option<String>,
    pub include_inactive: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

fn encode_json<T: Serialize>(value: &T, column: &'static str) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|source| DatabaseError::Json { column, source })
}

pub fn insert(db: &Database, item: &PriceItemRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_on(conn, item))
}

fn insert_on(conn: &Connection, item: &PriceItemRow) -> Result<(), DatabaseError> {
    let keywords = encode_json(&item.keywords, "keywords")?;
    let embedding = item
        .embedding
        .as_ref()
        .map(|e| encode_json(e, "embedding"))
        .transpose()?;

    conn.execute(
        "INSERT INTO price_items (id, code, description, category, subcategory, unit, rate,
         keywords, embedding, embedding_provider, is_active, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            item.id,
            item.code,
            item.description,
            item.category,
            item.subcategory,
            item.unit,
            item.rate,
            keywords,
            embedding,
            item.embedding_provider,
            item.is_active,
            item.created_by,
            item.created_at,
            item.updated_at,
        ],
    )?;
    Ok(())
}

/// Overwrites every mutable column. Returns false if the item does not exist.
pub fn update(db: &Database, item: &PriceItemRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| update_on(conn, item))
}

fn update_on(conn: &Connection, item: &PriceItemRow) -> Result<bool, DatabaseError> {
    let keywords = encode_json(&item.keywords, "keywords")?;
    let embedding = item
        .embedding
        .as_ref()
        .map(|e| encode_json(e, "embedding"))
        .transpose()?;

    let changed = conn.execute(
        "UPDATE price_items SET code=?2, description=?3, category=?4, subcategory=?5,
         unit=?6, rate=?7, keywords=?8, embedding=?9, embedding_provider=?10,
         is_active=?11, updated_at=?12
         WHERE id=?1",
        params![
            item.id,
            item.code,
            item.description,
            item.category,
            item.subcategory,
            item.unit,
            item.rate,
            keywords,
            embedding,
            item.embedding_provider,
            item.is_active,
            item.updated_at,
        ],
    )?;
    Ok(changed > 0)
}

/// Whether [`upsert_all`] inserted or overwrote an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

/// Writes imported items in one transaction.
///
/// An item replaces the stored one with the same id, or else the one with
/// the same code (case-insensitive). The stored id, creator and creation
/// time are kept, and a changed description drops the stale embedding.
pub fn upsert_all(db: &Database, items: &[PriceItemRow]) -> Result<Vec<Upserted>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let existing = tx
                .query_row(
                    "SELECT * FROM price_items
                     WHERE id = ?1 OR (?2 IS NOT NULL AND code = ?2 COLLATE NOCASE)
                     ORDER BY id = ?1 DESC LIMIT 1",
                    params![item.id, item.code],
                    PriceItemRow::from_row,
                )
                .optional()?;
            match existing {
                Some(stored) => {
                    let keep_embedding = stored.description == item.description;
                    let merged = PriceItemRow {
                        id: stored.id,
                        embedding: if keep_embedding { stored.embedding } else { None },
                        embedding_provider: if keep_embedding {
                            stored.embedding_provider
                        } else {
                            None
                        },
                        created_by: stored.created_by,
                        created_at: stored.created_at,
                        ..item.clone()
                    };
                    update_on(&tx, &merged)?;
                    outcomes.push(Upserted::Updated);
                }
                None => {
                    insert_on(&tx, item)?;
                    outcomes.push(Upserted::Created);
                }
            }
        }
        tx.commit()?;
        Ok(outcomes)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<PriceItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM price_items WHERE id = ?1",
                params![id],
                PriceItemRow::from_row,
            )
            .optional()?)
    })
}

/// Queries price items with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &PriceItemFilter,
) -> Result<(Vec<PriceItemRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if !filter.include_inactive {
            conditions.push("is_active = 1".to_string());
        }
        if let Some(ref category) = filter.category {
            conditions.push(format!("category = ?{}", param_values.len() + 1));
            param_values.push(Box::new(category.clone()));
        }
        if let Some(ref search) = filter.search {
            let n = param_values.len() + 1;
            conditions.push(format!(
                "(description LIKE ?{n} COLLATE NOCASE OR code LIKE ?{n} COLLATE NOCASE OR keywords LIKE ?{n} COLLATE NOCASE)"
            ));
            param_values.push(Box::new(format!("%{}%", search.trim())));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM price_items {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(i64::MAX);
        let offset = i64::try_from(filter.offset.unwrap_or(0)).unwrap_or(i64::MAX);
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM price_items {} ORDER BY category, description LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), PriceItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Loads every active item; this is the catalogue the matcher scores against.
pub fn list_active(db: &Database) -> Result<Vec<PriceItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM price_items WHERE is_active = 1 ORDER BY id")?;
        let rows = stmt
            .query_map([], PriceItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Soft-deletes an item. Returns false if it does not exist or is already inactive.
pub fn deactivate(db: &Database, id: &str, at: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE price_items SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
            params![id, at],
        )?;
        Ok(changed > 0)
    })
}

/// Soft-deletes every active item, returning how many were deactivated.
pub fn deactivate_all(db: &Database, at: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE price_items SET is_active = 0, updated_at = ?1 WHERE is_active = 1",
            params![at],
        )?;
        Ok(changed as u64)
    })
}

/// Returns `(total, active)` item counts.
pub fn counts(db: &Database) -> Result<(u64, u64), DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM price_items",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{new_id, now_millis};

    fn item(description: &str, unit: &str, rate: f64) -> PriceItemRow {
        PriceItemRow {
            id: new_id(),
            code: Some(format!("C-{}", &description[..3.min(description.len())])),
            description: description.to_string(),
            category: Some("Concrete".to_string()),
            subcategory: None,
            unit: Some(unit.to_string()),
            rate,
            keywords: vec!["concrete".to_string()],
            embedding: None,
            embedding_provider: None,
            is_active: true,
            created_by: None,
            created_at: now_millis(),
            updated_at: now_millis(),
        }
    }

    #[test]
    fn test_insert_find_roundtrip_keeps_keywords() {
        let db = Database::open_in_memory().unwrap();
        let mut row = item("Mass concrete C20 in foundations", "m3", 120.5);
        row.embedding = Some(vec![0.1, 0.2]);
        row.embedding_provider = Some("cohere".to_string());
        insert(&db, &row).unwrap();

        let found = find_by_id(&db, &row.id).unwrap().unwrap();
        assert_eq!(found, row);
    }

    #[test]
    fn test_query_search_and_inactive_filter() {
        let db = Database::open_in_memory().unwrap();
        let a = item("Mass concrete C20", "m3", 100.0);
        let b = item("Brickwork in cement mortar", "m2", 45.0);
        insert(&db, &a).unwrap();
        insert(&db, &b).unwrap();
        deactivate(&db, &b.id, now_millis()).unwrap();

        let (rows, total) = query(&db, &PriceItemFilter::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, a.id);

        let (_, total) = query(
            &db,
            &PriceItemFilter {
                include_inactive: true,
                search: Some("BRICK".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_deactivate_twice() {
        let db = Database::open_in_memory().unwrap();
        let a = item("Formwork to soffits", "m2", 30.0);
        insert(&db, &a).unwrap();
        assert!(deactivate(&db, &a.id, now_millis()).unwrap());
        assert!(!deactivate(&db, &a.id, now_millis()).unwrap());
        assert!(list_active(&db).unwrap().is_empty());
        assert_eq!(counts(&db).unwrap(), (1, 0));
    }

    #[test]
    fn test_update() {
        let db = Database::open_in_memory().unwrap();
        let mut a = item("Formwork to soffits", "m2", 30.0);
        insert(&db, &a).unwrap();
        a.rate = 32.5;
        assert!(update(&db, &a).unwrap());
        assert_eq!(find_by_id(&db, &a.id).unwrap().unwrap().rate, 32.5);
    }

    #[test]
    fn test_upsert_matches_by_id_then_code() {
        let db = Database::open_in_memory().unwrap();
        let mut stored = item("Formwork to soffits", "m2", 30.0);
        stored.code = Some("FW-01".to_string());
        stored.embedding = Some(vec![0.5]);
        stored.created_by = Some("admin".to_string());
        insert(&db, &stored).unwrap();

        let mut by_code = item("Formwork to soffits", "m2", 31.0);
        by_code.code = Some("fw-01".to_string());
        let mut renamed = stored.clone();
        renamed.description = "Formwork to soffits, plywood".to_string();
        renamed.rate = 33.0;
        let fresh = item("Rebar, high yield", "t", 900.0);

        let outcomes = upsert_all(&db, &[by_code, renamed, fresh.clone()]).unwrap();
        assert_eq!(
            outcomes,
            vec![Upserted::Updated, Upserted::Updated, Upserted::Created]
        );

        let updated = find_by_id(&db, &stored.id).unwrap().unwrap();
        assert_eq!(updated.rate, 33.0);
        assert_eq!(updated.created_by.as_deref(), Some("admin"));
        assert!(updated.embedding.is_none());
        assert!(find_by_id(&db, &fresh.id).unwrap().is_some());
        assert_eq!(counts(&db).unwrap(), (2, 2));
    }

    #[test]
    fn test_deactivate_all() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &item("Mass concrete C20", "m3", 100.0)).unwrap();
        insert(&db, &item("Blockwork 100mm", "m2", 40.0)).unwrap();

        assert_eq!(deactivate_all(&db, now_millis()).unwrap(), 2);
        assert_eq!(deactivate_all(&db, now_millis()).unwrap(), 0);
        assert!(list_active(&db).unwrap().is_empty());
    }
}

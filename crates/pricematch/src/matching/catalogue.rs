use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::db::price_item_repo::{self, PriceItemRow};
use crate::db::{Database, DatabaseError};

/// How long the active price list is reused before reloading.
pub const CATALOGUE_TTL: Duration = Duration::from_secs(300);

/// Active price items, cached between batches.
///
/// Price-list writes call [`PriceCatalogue::invalidate`] so edits show up on
/// the next batch instead of after the TTL.
#[derive(Clone)]
pub struct PriceCatalogue {
    db: Database,
    cache: Cache<(), Arc<Vec<PriceItemRow>>>,
}

impl PriceCatalogue {
    pub fn new(db: Database) -> Self {
        Self::with_ttl(db, CATALOGUE_TTL)
    }

    pub fn with_ttl(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            cache: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
        }
    }

    pub fn active_items(&self) -> Result<Arc<Vec<PriceItemRow>>, DatabaseError> {
        if let Some(items) = self.cache.get(&()) {
            return Ok(items);
        }
        let items = Arc::new(price_item_repo::list_active(&self.db)?);
        log::debug!("Loaded {} active price items", items.len());
        self.cache.insert((), items.clone());
        Ok(items)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&());
    }
}

impl std::fmt::Debug for PriceCatalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCatalogue")
            .field("cached", &self.cache.contains_key(&()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::tests::price_item;

    #[test]
    fn test_cached_until_invalidated() {
        let db = Database::open_in_memory().unwrap();
        price_item_repo::insert(&db, &price_item("p1", "Topsoil strip", "m2", 3.0)).unwrap();

        let catalogue = PriceCatalogue::new(db.clone());
        assert_eq!(catalogue.active_items().unwrap().len(), 1);

        price_item_repo::insert(&db, &price_item("p2", "Hardcore", "m3", 38.0)).unwrap();
        assert_eq!(catalogue.active_items().unwrap().len(), 1);

        catalogue.invalidate();
        assert_eq!(catalogue.active_items().unwrap().len(), 2);
    }

    #[test]
    fn test_reloads_after_ttl() {
        let db = Database::open_in_memory().unwrap();
        let catalogue = PriceCatalogue::with_ttl(db.clone(), Duration::from_millis(1));
        assert!(catalogue.active_items().unwrap().is_empty());

        price_item_repo::insert(&db, &price_item("p1", "Topsoil strip", "m2", 3.0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(catalogue.active_items().unwrap().len(), 1);
    }
}

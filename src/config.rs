//! Event configuration for Stand POS.
//!
//! One event, one register: a single configuration holds the initial cash
//! float, the stand name printed on tickets, and the active flavor catalog.
//! Stored in `local_settings` (category `event`) plus the `catalog_items`
//! table. Re-running `configure` replaces the catalog and float as an
//! explicit reset; it never touches the sales ledger since historical sales
//! carry their own price snapshots.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backup;
use crate::db::{self, DbState};
use crate::error::PosError;

/// Ticket header when the operator doesn't set a stand name.
pub const DEFAULT_STAND_NAME: &str = "STAND POS";

/// Fixed flavors offered at configuration time as a starting point.
pub const FIXED_FLAVORS: &[&str] = &[
    "Pilsen",
    "IPA",
    "Black Jack",
    "Wine",
    "Mango",
    "Strawberry",
];

/// Default unit price for flavors the operator doesn't reprice.
pub const DEFAULT_PRICE: f64 = 10.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A sellable flavor with its current unit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    pub price: f64,
    /// Seasonal items are entered free-form at configure time; fixed items
    /// come from the standard list.
    #[serde(default)]
    pub seasonal: bool,
}

impl CatalogItem {
    pub fn fixed(name: &str, price: f64) -> Self {
        CatalogItem {
            name: name.to_string(),
            price,
            seasonal: false,
        }
    }

    pub fn seasonal(name: &str, price: f64) -> Self {
        CatalogItem {
            name: name.to_string(),
            price,
            seasonal: true,
        }
    }
}

/// The active event configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub stand_name: String,
    pub initial_cash_float: f64,
    pub flavors: Vec<CatalogItem>,
}

// ---------------------------------------------------------------------------
// Configure
// ---------------------------------------------------------------------------

/// Replace the active catalog, float, and stand name.
///
/// Rejects a negative float, an empty catalog, blank or duplicate flavor
/// names, and negative prices. The catalog swap is transactional so a
/// half-replaced menu can never be observed.
pub fn configure(
    db: &DbState,
    initial_float: f64,
    stand_name: &str,
    items: &[CatalogItem],
) -> Result<(), PosError> {
    if initial_float < 0.0 {
        return Err(PosError::validation(format!(
            "Initial cash float must not be negative (got {initial_float:.2})"
        )));
    }
    if items.is_empty() {
        return Err(PosError::validation(
            "Catalog must contain at least one flavor",
        ));
    }
    for item in items {
        if item.name.trim().is_empty() {
            return Err(PosError::validation("Flavor name must not be blank"));
        }
        if item.price < 0.0 {
            return Err(PosError::validation(format!(
                "Price for {} must not be negative (got {:.2})",
                item.name, item.price
            )));
        }
    }
    for (i, item) in items.iter().enumerate() {
        if items[..i].iter().any(|other| other.name == item.name) {
            return Err(PosError::validation(format!(
                "Duplicate flavor in catalog: {}",
                item.name
            )));
        }
    }

    let stand_name = stand_name.trim();
    let stand_name = if stand_name.is_empty() {
        DEFAULT_STAND_NAME
    } else {
        stand_name
    };

    let conn = db.lock();
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(), PosError> {
        conn.execute("DELETE FROM catalog_items", [])?;
        for (position, item) in items.iter().enumerate() {
            conn.execute(
                "INSERT INTO catalog_items (name, price, seasonal, position)
                 VALUES (?1, ?2, ?3, ?4)",
                params![item.name, item.price, item.seasonal as i64, position as i64],
            )?;
        }

        db::set_setting(&conn, "event", "initial_cash_float", &initial_float.to_string())?;
        db::set_setting(&conn, "event", "stand_name", stand_name)?;
        db::set_setting(&conn, "event", "configured", "true")?;
        Ok(())
    })();

    match result {
        Ok(()) => conn.execute_batch("COMMIT")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(
        stand_name = %stand_name,
        initial_float = %initial_float,
        flavors = items.len(),
        "Event configured"
    );
    Ok(())
}

/// Whether the event has been configured since the last reset.
pub fn is_configured(db: &DbState) -> bool {
    let conn = db.lock();
    db::get_setting(&conn, "event", "configured").as_deref() == Some("true")
}

/// The full active configuration. State error before configuration.
pub fn get_config(db: &DbState) -> Result<EventConfig, PosError> {
    if !is_configured(db) {
        return Err(PosError::state(
            "Event not configured yet. Run configure first",
        ));
    }

    let flavors = get_catalog(db)?;
    let conn = db.lock();
    Ok(EventConfig {
        stand_name: stand_name(&conn),
        initial_cash_float: initial_cash_float(&conn),
        flavors,
    })
}

/// The active catalog in configured order.
pub fn get_catalog(db: &DbState) -> Result<Vec<CatalogItem>, PosError> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT name, price, seasonal FROM catalog_items ORDER BY position, name",
    )?;
    let items = stmt
        .query_map([], |row| {
            Ok(CatalogItem {
                name: row.get(0)?,
                price: row.get(1)?,
                seasonal: row.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// The configured float, 0 before configuration.
pub fn initial_cash_float(conn: &rusqlite::Connection) -> f64 {
    db::get_setting(conn, "event", "initial_cash_float")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// The stand name used as ticket header.
pub fn stand_name(conn: &rusqlite::Connection) -> String {
    db::get_setting(conn, "event", "stand_name")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_STAND_NAME.to_string())
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

/// Clear all event state for a new event: ledger, VIP registry, catalog,
/// event settings, and backup snapshots.
pub fn reset_event(db: &DbState) -> Result<(), PosError> {
    {
        let conn = db.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = (|| -> Result<(), PosError> {
            conn.execute("DELETE FROM sales", [])?;
            conn.execute("DELETE FROM vip_accounts", [])?;
            conn.execute("DELETE FROM catalog_items", [])?;
            db::clear_settings(&conn, "event")?;
            Ok(())
        })();

        match result {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        }
    }

    backup::remove_snapshots(&db.data_dir())?;

    info!("Event state reset");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn sample_items() -> Vec<CatalogItem> {
        vec![
            CatalogItem::fixed("Pilsen", 10.0),
            CatalogItem::fixed("IPA", 12.0),
            CatalogItem::seasonal("Porter", 14.0),
        ]
    }

    #[test]
    fn test_configure_and_read_back() {
        let db = db::test_state();
        configure(&db, 150.0, "Seven Stars", &sample_items()).unwrap();

        assert!(is_configured(&db));
        let config = get_config(&db).unwrap();
        assert_eq!(config.stand_name, "Seven Stars");
        assert_eq!(config.initial_cash_float, 150.0);
        assert_eq!(config.flavors.len(), 3);
        // Order preserved
        assert_eq!(config.flavors[0].name, "Pilsen");
        assert_eq!(config.flavors[2].name, "Porter");
        assert!(config.flavors[2].seasonal);
    }

    #[test]
    fn test_configure_rejects_negative_float() {
        let db = db::test_state();
        let err = configure(&db, -1.0, "", &sample_items()).unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));
    }

    #[test]
    fn test_configure_rejects_negative_price() {
        let db = db::test_state();
        let items = vec![CatalogItem::fixed("Pilsen", -10.0)];
        let err = configure(&db, 0.0, "", &items).unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));
    }

    #[test]
    fn test_configure_rejects_empty_catalog() {
        let db = db::test_state();
        let err = configure(&db, 0.0, "", &[]).unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));
    }

    #[test]
    fn test_configure_rejects_duplicate_flavor() {
        let db = db::test_state();
        let items = vec![
            CatalogItem::fixed("Pilsen", 10.0),
            CatalogItem::fixed("Pilsen", 11.0),
        ];
        let err = configure(&db, 0.0, "", &items).unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));
    }

    #[test]
    fn test_reconfigure_replaces_catalog() {
        let db = db::test_state();
        configure(&db, 100.0, "", &sample_items()).unwrap();
        configure(&db, 50.0, "", &[CatalogItem::fixed("Weiss", 11.0)]).unwrap();

        let config = get_config(&db).unwrap();
        assert_eq!(config.initial_cash_float, 50.0);
        assert_eq!(config.flavors.len(), 1);
        assert_eq!(config.flavors[0].name, "Weiss");
    }

    #[test]
    fn test_blank_stand_name_falls_back_to_default() {
        let db = db::test_state();
        configure(&db, 0.0, "   ", &sample_items()).unwrap();
        let config = get_config(&db).unwrap();
        assert_eq!(config.stand_name, DEFAULT_STAND_NAME);
    }

    #[test]
    fn test_get_config_before_configure_is_state_error() {
        let db = db::test_state();
        let err = get_config(&db).unwrap_err();
        assert!(matches!(err, PosError::State(_)));
    }

    #[test]
    fn test_reset_clears_everything() {
        let db = db::test_state();
        configure(&db, 100.0, "Stand", &sample_items()).unwrap();
        {
            let conn = db.lock();
            conn.execute(
                "INSERT INTO sales (payment_method, created_at) VALUES ('cash', datetime('now'))",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO vip_accounts (name, balance) VALUES ('Alice', 30.0)",
                [],
            )
            .unwrap();
        }

        reset_event(&db).unwrap();

        assert!(!is_configured(&db));
        let conn = db.lock();
        let sales: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))
            .unwrap();
        let vips: i64 = conn
            .query_row("SELECT COUNT(*) FROM vip_accounts", [], |row| row.get(0))
            .unwrap();
        let flavors: i64 = conn
            .query_row("SELECT COUNT(*) FROM catalog_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!((sales, vips, flavors), (0, 0, 0));
    }
}

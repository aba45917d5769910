//! Sale finalization and ledger access for Stand POS.
//!
//! A finalized checkout becomes exactly one row in `sales`, carrying the
//! cart's line-item snapshots as JSON (flavor, unit price, quantity). The
//! row is immutable once written; the only later mutation is deletion by
//! reversal. VIP-funded sales move the customer's tab balance inside the
//! same transaction, so the ledger and the registry can never disagree by
//! a partial write.

use chrono::Local;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::cart::Cart;
use crate::config;
use crate::db::DbState;
use crate::error::PosError;
use crate::ticket::TicketDoc;

/// Float comparisons tolerate sub-cent noise from repeated f64 arithmetic.
const MONEY_EPSILON: f64 = 0.001;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a sale was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    Debit,
    Credit,
    Cash,
    Vip,
    Complimentary,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "pix",
            PaymentMethod::Debit => "debit",
            PaymentMethod::Credit => "credit",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Vip => "vip",
            PaymentMethod::Complimentary => "complimentary",
        }
    }

    /// Parse the stored/typed form. Case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pix" => Some(PaymentMethod::Pix),
            "debit" => Some(PaymentMethod::Debit),
            "credit" => Some(PaymentMethod::Credit),
            "cash" => Some(PaymentMethod::Cash),
            "vip" => Some(PaymentMethod::Vip),
            "complimentary" => Some(PaymentMethod::Complimentary),
            _ => None,
        }
    }

    /// Methods a VIP tab can be settled with. VIP-to-VIP is disallowed and
    /// a tab cannot be waved off as complimentary.
    pub fn can_settle(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Pix | PaymentMethod::Debit | PaymentMethod::Credit | PaymentMethod::Cash
        )
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a sale moved product or paid off a VIP tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleKind {
    Product,
    Settlement,
}

impl SaleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleKind::Product => "product",
            SaleKind::Settlement => "settlement",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "product" => Some(SaleKind::Product),
            "settlement" => Some(SaleKind::Settlement),
            _ => None,
        }
    }
}

/// Price/quantity snapshot of one cart line at finalize time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub flavor: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub line_total: f64,
}

/// One row of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: i64,
    pub kind: SaleKind,
    pub items: Vec<LineItem>,
    pub subtotal: f64,
    pub discount: f64,
    pub total: f64,
    pub payment_method: PaymentMethod,
    pub vip_customer: Option<String>,
    pub cash_tendered: Option<f64>,
    pub change_due: Option<f64>,
    pub created_at: String,
}

/// Result of a successful finalize: the recorded sale, change for cash,
/// and one drink ticket per unit sold.
#[derive(Debug)]
pub struct FinalizedSale {
    pub sale: Sale,
    pub change_due: Option<f64>,
    pub tickets: Vec<TicketDoc>,
}

// ---------------------------------------------------------------------------
// Finalize
// ---------------------------------------------------------------------------

/// Convert the cart into a ledger row and, for VIP, a balance accrual.
///
/// Preconditions: cart non-empty; VIP requires a customer name; cash
/// requires tendered ≥ total. Either the whole sale is recorded or nothing
/// is: the insert and the VIP upsert share one transaction, and the cart
/// is cleared only after a successful commit.
pub fn finalize_sale(
    db: &DbState,
    cart: &mut Cart,
    method: PaymentMethod,
    vip_name: Option<&str>,
    cash_tendered: Option<f64>,
) -> Result<FinalizedSale, PosError> {
    if cart.is_empty() {
        return Err(PosError::state("Cannot finalize an empty cart"));
    }

    let vip_customer = match method {
        PaymentMethod::Vip => {
            let name = vip_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| PosError::validation("VIP sale requires a customer name"))?;
            Some(name.to_string())
        }
        _ => None,
    };

    let complimentary = method == PaymentMethod::Complimentary;
    let subtotal = cart.subtotal();
    let discount = if complimentary { 0.0 } else { cart.discount() };
    let total = if complimentary { 0.0 } else { cart.total() };

    let (tendered, change_due) = match method {
        PaymentMethod::Cash => {
            let tendered = cash_tendered.ok_or_else(|| {
                PosError::validation("Cash sale requires the amount tendered")
            })?;
            if tendered + MONEY_EPSILON < total {
                return Err(PosError::validation(format!(
                    "Cash tendered {tendered:.2} is less than the total {total:.2}"
                )));
            }
            (Some(tendered), Some(tendered - total))
        }
        _ => (None, None),
    };

    // Complimentary drinks are given away: snapshot the flavors and
    // quantities but charge zero per unit.
    let items: Vec<LineItem> = cart
        .lines()
        .iter()
        .map(|line| {
            let unit_price = if complimentary { 0.0 } else { line.unit_price };
            LineItem {
                flavor: line.flavor.clone(),
                unit_price,
                quantity: line.quantity,
                line_total: unit_price * line.quantity as f64,
            }
        })
        .collect();

    let items_json = serde_json::to_string(&items)
        .map_err(|e| PosError::validation(format!("Cart lines not serializable: {e}")))?;
    let created_at = Local::now().to_rfc3339();

    let conn = db.lock();
    let stand_name = config::stand_name(&conn);

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<i64, PosError> {
        conn.execute(
            "INSERT INTO sales (
                kind, items, subtotal, discount, total,
                payment_method, vip_customer, cash_tendered, change_due, created_at
            ) VALUES ('product', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                items_json,
                subtotal,
                discount,
                total,
                method.as_str(),
                vip_customer,
                tendered,
                change_due,
                created_at,
            ],
        )?;
        let sale_id = conn.last_insert_rowid();

        // Accrue the tab inside the same transaction
        if let Some(ref name) = vip_customer {
            conn.execute(
                "INSERT INTO vip_accounts (name, balance)
                 VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET
                    balance = balance + excluded.balance,
                    updated_at = datetime('now')",
                params![name, total],
            )?;
        }

        Ok(sale_id)
    })();

    let sale_id = match result {
        Ok(id) => {
            conn.execute_batch("COMMIT")?;
            id
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };
    drop(conn);

    // Cart survives any failure above; it empties only once the sale is durable
    cart.clear();

    let tickets: Vec<TicketDoc> = items
        .iter()
        .flat_map(|item| {
            (0..item.quantity).map(|_| TicketDoc {
                header: stand_name.clone(),
                flavor: item.flavor.clone(),
                sale_id,
                payment_method: method,
            })
        })
        .collect();

    info!(
        sale_id = sale_id,
        method = %method,
        total = %format!("{total:.2}"),
        vip = vip_customer.as_deref().unwrap_or(""),
        "Sale finalized"
    );

    Ok(FinalizedSale {
        sale: Sale {
            id: sale_id,
            kind: SaleKind::Product,
            items,
            subtotal,
            discount,
            total,
            payment_method: method,
            vip_customer,
            cash_tendered: tendered,
            change_due,
            created_at,
        },
        change_due,
        tickets,
    })
}

// ---------------------------------------------------------------------------
// Ledger queries
// ---------------------------------------------------------------------------

const SALE_COLUMNS: &str = "id, kind, items, subtotal, discount, total,
                            payment_method, vip_customer, cash_tendered, change_due, created_at";

fn sale_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sale> {
    let id: i64 = row.get(0)?;
    let kind_raw: String = row.get(1)?;
    let items_json: String = row.get(2)?;
    let method_raw: String = row.get(6)?;

    let items = serde_json::from_str::<Vec<LineItem>>(&items_json).unwrap_or_else(|e| {
        warn!(sale_id = id, "Malformed line items on sale: {e}");
        vec![]
    });
    let kind = SaleKind::parse(&kind_raw).unwrap_or_else(|| {
        warn!(sale_id = id, kind = %kind_raw, "Unknown sale kind, treating as product");
        SaleKind::Product
    });
    let payment_method = PaymentMethod::parse(&method_raw).unwrap_or_else(|| {
        warn!(sale_id = id, method = %method_raw, "Unknown payment method, treating as cash");
        PaymentMethod::Cash
    });

    Ok(Sale {
        id,
        kind,
        items,
        subtotal: row.get(3)?,
        discount: row.get(4)?,
        total: row.get(5)?,
        payment_method,
        vip_customer: row.get(7)?,
        cash_tendered: row.get(8)?,
        change_due: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// Fetch one sale. NotFound if the id is unknown.
pub fn get_sale(db: &DbState, sale_id: i64) -> Result<Sale, PosError> {
    let conn = db.lock();
    conn.query_row(
        &format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"),
        params![sale_id],
        sale_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            PosError::not_found(format!("Sale not found: {sale_id}"))
        }
        other => PosError::Storage(other),
    })
}

/// The full ledger, newest first.
pub fn list_sales(db: &DbState) -> Result<Vec<Sale>, PosError> {
    let conn = db.lock();
    let mut stmt =
        conn.prepare(&format!("SELECT {SALE_COLUMNS} FROM sales ORDER BY id DESC"))?;
    let sales = stmt
        .query_map([], sale_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sales)
}

/// Sales whose id contains the query digits, newest first. This is the
/// reversal screen's lookup: operators read ids off printed tickets, often
/// only the trailing digits.
pub fn search_sales(db: &DbState, query: &str) -> Result<Vec<Sale>, PosError> {
    let query = query.trim();
    if query.is_empty() {
        return list_sales(db);
    }

    let conn = db.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {SALE_COLUMNS} FROM sales WHERE CAST(id AS TEXT) LIKE ?1 ORDER BY id DESC"
    ))?;
    let pattern = format!("%{query}%");
    let sales = stmt
        .query_map(params![pattern], sale_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sales)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogItem;
    use crate::db;

    fn setup() -> DbState {
        let db = db::test_state();
        config::configure(
            &db,
            100.0,
            "Seven Stars",
            &[
                CatalogItem::fixed("Pilsen", 10.0),
                CatalogItem::fixed("IPA", 12.0),
            ],
        )
        .unwrap();
        db
    }

    fn cart_with(db: &DbState, picks: &[(&str, i64)]) -> Cart {
        let catalog = config::get_catalog(db).unwrap();
        let mut cart = Cart::new();
        for (flavor, qty) in picks {
            for _ in 0..*qty {
                cart.add(&catalog, flavor).unwrap();
            }
        }
        cart
    }

    fn vip_balance(db: &DbState, name: &str) -> Option<f64> {
        let conn = db.lock();
        conn.query_row(
            "SELECT balance FROM vip_accounts WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .ok()
    }

    #[test]
    fn test_finalize_cash_records_sale_and_change() {
        let db = setup();
        let mut cart = cart_with(&db, &[("Pilsen", 2)]);

        let outcome =
            finalize_sale(&db, &mut cart, PaymentMethod::Cash, None, Some(50.0)).unwrap();

        assert_eq!(outcome.sale.total, 20.0);
        assert_eq!(outcome.change_due, Some(30.0));
        assert!(cart.is_empty());

        let stored = get_sale(&db, outcome.sale.id).unwrap();
        assert_eq!(stored.payment_method, PaymentMethod::Cash);
        assert_eq!(stored.cash_tendered, Some(50.0));
        assert_eq!(stored.change_due, Some(30.0));
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.items[0].quantity, 2);
    }

    #[test]
    fn test_finalize_cash_requires_sufficient_tender() {
        let db = setup();
        let mut cart = cart_with(&db, &[("IPA", 1)]);

        let err =
            finalize_sale(&db, &mut cart, PaymentMethod::Cash, None, Some(10.0)).unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));

        // Nothing recorded, cart intact
        assert!(list_sales(&db).unwrap().is_empty());
        assert_eq!(cart.lines().len(), 1);
    }

    #[test]
    fn test_finalize_cash_exact_tender_gives_zero_change() {
        let db = setup();
        let mut cart = cart_with(&db, &[("Pilsen", 1)]);

        let outcome =
            finalize_sale(&db, &mut cart, PaymentMethod::Cash, None, Some(10.0)).unwrap();
        assert_eq!(outcome.change_due, Some(0.0));
    }

    #[test]
    fn test_finalize_vip_accrues_balance() {
        let db = setup();
        let mut cart = cart_with(&db, &[("Pilsen", 2), ("IPA", 1)]);

        let outcome =
            finalize_sale(&db, &mut cart, PaymentMethod::Vip, Some("Alice"), None).unwrap();

        assert_eq!(outcome.sale.total, 32.0);
        assert_eq!(vip_balance(&db, "Alice"), Some(32.0));

        // A second round stacks on the same tab
        let mut cart = cart_with(&db, &[("Pilsen", 1)]);
        finalize_sale(&db, &mut cart, PaymentMethod::Vip, Some("Alice"), None).unwrap();
        assert_eq!(vip_balance(&db, "Alice"), Some(42.0));
    }

    #[test]
    fn test_finalize_vip_requires_name() {
        let db = setup();
        let mut cart = cart_with(&db, &[("Pilsen", 1)]);

        let err = finalize_sale(&db, &mut cart, PaymentMethod::Vip, None, None).unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));
        let err =
            finalize_sale(&db, &mut cart, PaymentMethod::Vip, Some("  "), None).unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));

        // No sale, no account, cart intact
        assert!(list_sales(&db).unwrap().is_empty());
        assert_eq!(vip_balance(&db, ""), None);
        assert!(!cart.is_empty());
    }

    #[test]
    fn test_finalize_discount_recorded_on_row() {
        let db = setup();
        let mut cart = cart_with(&db, &[("Pilsen", 2), ("IPA", 1)]);
        cart.apply_discount(2.0).unwrap();

        let outcome =
            finalize_sale(&db, &mut cart, PaymentMethod::Vip, Some("Alice"), None).unwrap();

        assert_eq!(outcome.sale.subtotal, 32.0);
        assert_eq!(outcome.sale.discount, 2.0);
        assert_eq!(outcome.sale.total, 30.0);
        // The tab accrues the discounted total
        assert_eq!(vip_balance(&db, "Alice"), Some(30.0));
    }

    #[test]
    fn test_finalize_complimentary_is_always_zero() {
        let db = setup();
        let mut cart = cart_with(&db, &[("Pilsen", 2), ("IPA", 1)]);
        cart.apply_discount(2.0).unwrap();

        let outcome =
            finalize_sale(&db, &mut cart, PaymentMethod::Complimentary, None, None).unwrap();

        assert_eq!(outcome.sale.total, 0.0);
        // The giveaway carries no discount bookkeeping
        assert_eq!(outcome.sale.discount, 0.0);
        // Flavors and quantities are still snapshotted, at zero charge
        assert_eq!(outcome.sale.items.len(), 2);
        assert!(outcome.sale.items.iter().all(|i| i.unit_price == 0.0));
        assert_eq!(outcome.sale.items[0].quantity, 2);
    }

    #[test]
    fn test_finalize_empty_cart_is_state_error() {
        let db = setup();
        let mut cart = Cart::new();
        let err = finalize_sale(&db, &mut cart, PaymentMethod::Pix, None, None).unwrap_err();
        assert!(matches!(err, PosError::State(_)));
    }

    #[test]
    fn test_one_ticket_per_unit() {
        let db = setup();
        let mut cart = cart_with(&db, &[("Pilsen", 2), ("IPA", 1)]);

        let outcome = finalize_sale(&db, &mut cart, PaymentMethod::Pix, None, None).unwrap();

        assert_eq!(outcome.tickets.len(), 3);
        assert_eq!(outcome.tickets[0].flavor, "Pilsen");
        assert_eq!(outcome.tickets[2].flavor, "IPA");
        assert!(outcome
            .tickets
            .iter()
            .all(|t| t.sale_id == outcome.sale.id && t.header == "Seven Stars"));
    }

    #[test]
    fn test_get_sale_not_found() {
        let db = setup();
        let err = get_sale(&db, 999).unwrap_err();
        assert!(matches!(err, PosError::NotFound(_)));
    }

    #[test]
    fn test_search_sales_by_id_substring() {
        let db = setup();
        for _ in 0..12 {
            let mut cart = cart_with(&db, &[("Pilsen", 1)]);
            finalize_sale(&db, &mut cart, PaymentMethod::Pix, None, None).unwrap();
        }

        // Ids 1..=12; "1" matches 1, 10, 11, 12
        let hits = search_sales(&db, "1").unwrap();
        assert_eq!(hits.len(), 4);
        // Newest first
        assert_eq!(hits[0].id, 12);

        let exact = search_sales(&db, "12").unwrap();
        assert_eq!(exact.len(), 1);

        // Blank query returns everything
        assert_eq!(search_sales(&db, "  ").unwrap().len(), 12);
    }

    #[test]
    fn test_payment_method_parse_roundtrip() {
        for method in [
            PaymentMethod::Pix,
            PaymentMethod::Debit,
            PaymentMethod::Credit,
            PaymentMethod::Cash,
            PaymentMethod::Vip,
            PaymentMethod::Complimentary,
        ] {
            assert_eq!(PaymentMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(PaymentMethod::parse("PIX"), Some(PaymentMethod::Pix));
        assert_eq!(PaymentMethod::parse("cheque"), None);
    }
}

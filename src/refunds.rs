//! Sale reversal for Stand POS.
//!
//! Reversal removes a ledger row and undoes the balance side effect it
//! caused: a VIP-funded product sale gives the customer's tab back its
//! total, clamped at zero so a reversal can never leave a negative balance.
//!
//! Reversing a settlement deletes the payoff row but does NOT reopen the
//! tab it settled; see DESIGN.md for why this asymmetry is preserved
//! rather than fixed here.

use rusqlite::params;
use tracing::{info, warn};

use crate::db::DbState;
use crate::error::PosError;
use crate::sales::{self, PaymentMethod, Sale, SaleKind};

/// Remove a sale from the ledger and reverse its VIP balance delta.
///
/// NotFound if the id is unknown, leaving ledger and registry untouched.
/// The balance adjustment and the delete share one transaction.
pub fn reverse_sale(db: &DbState, sale_id: i64) -> Result<Sale, PosError> {
    let sale = sales::get_sale(db, sale_id)?;

    let conn = db.lock();
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(), PosError> {
        if sale.kind == SaleKind::Product && sale.payment_method == PaymentMethod::Vip {
            if let Some(ref name) = sale.vip_customer {
                // Clamp: a tab settled between sale and reversal must not
                // go negative
                let changed = conn.execute(
                    "UPDATE vip_accounts SET
                        balance = CASE WHEN balance > ?1 THEN balance - ?1 ELSE 0 END,
                        updated_at = datetime('now')
                     WHERE name = ?2",
                    params![sale.total, name],
                )?;
                if changed == 0 {
                    warn!(
                        sale_id = sale_id,
                        vip = %name,
                        "Reversed VIP sale had no matching account"
                    );
                }
            }
        }

        conn.execute("DELETE FROM sales WHERE id = ?1", params![sale_id])?;
        Ok(())
    })();

    match result {
        Ok(()) => conn.execute_batch("COMMIT")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    if sale.kind == SaleKind::Settlement {
        warn!(
            sale_id = sale_id,
            vip = sale.vip_customer.as_deref().unwrap_or(""),
            "Reversed a settlement; the tab it paid off stays closed"
        );
    }

    info!(
        sale_id = sale_id,
        method = %sale.payment_method,
        total = %format!("{:.2}", sale.total),
        "Sale reversed"
    );

    Ok(sale)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::Cart;
    use crate::config::{self, CatalogItem};
    use crate::db;
    use crate::vip;

    fn setup() -> DbState {
        let db = db::test_state();
        config::configure(
            &db,
            100.0,
            "Stand",
            &[
                CatalogItem::fixed("Pilsen", 10.0),
                CatalogItem::fixed("IPA", 12.0),
            ],
        )
        .unwrap();
        db
    }

    fn finalize(db: &DbState, picks: &[(&str, i64)], method: PaymentMethod, vip: Option<&str>) -> Sale {
        let catalog = config::get_catalog(db).unwrap();
        let mut cart = Cart::new();
        for (flavor, qty) in picks {
            for _ in 0..*qty {
                cart.add(&catalog, flavor).unwrap();
            }
        }
        let tendered = matches!(method, PaymentMethod::Cash).then_some(500.0);
        sales::finalize_sale(db, &mut cart, method, vip, tendered)
            .unwrap()
            .sale
    }

    #[test]
    fn test_vip_finalize_then_reverse_round_trips_balance() {
        let db = setup();
        finalize(&db, &[("Pilsen", 1)], PaymentMethod::Vip, Some("Alice"));
        let sale = finalize(&db, &[("IPA", 2)], PaymentMethod::Vip, Some("Alice"));
        assert_eq!(vip::get_balance(&db, "Alice").unwrap(), 34.0);

        reverse_sale(&db, sale.id).unwrap();

        // Back to the balance before the reversed sale
        assert_eq!(vip::get_balance(&db, "Alice").unwrap(), 10.0);
        assert!(matches!(
            sales::get_sale(&db, sale.id),
            Err(PosError::NotFound(_))
        ));
    }

    #[test]
    fn test_reverse_clamps_balance_at_zero() {
        let db = setup();
        let sale = finalize(&db, &[("Pilsen", 2)], PaymentMethod::Vip, Some("Alice"));
        // The tab is paid off before anyone notices the mistaken sale
        vip::settle_account(&db, "Alice", PaymentMethod::Cash).unwrap();

        reverse_sale(&db, sale.id).unwrap();

        // Clamped, not driven negative
        assert_eq!(vip::get_balance(&db, "Alice").unwrap(), 0.0);
    }

    #[test]
    fn test_reverse_unknown_id_leaves_state_unchanged() {
        let db = setup();
        finalize(&db, &[("Pilsen", 1)], PaymentMethod::Vip, Some("Alice"));

        let err = reverse_sale(&db, 999).unwrap_err();
        assert!(matches!(err, PosError::NotFound(_)));

        assert_eq!(sales::list_sales(&db).unwrap().len(), 1);
        assert_eq!(vip::get_balance(&db, "Alice").unwrap(), 10.0);
    }

    #[test]
    fn test_reverse_cash_sale_does_not_touch_accounts() {
        let db = setup();
        finalize(&db, &[("Pilsen", 1)], PaymentMethod::Vip, Some("Alice"));
        let cash_sale = finalize(&db, &[("IPA", 1)], PaymentMethod::Cash, None);

        reverse_sale(&db, cash_sale.id).unwrap();

        assert_eq!(vip::get_balance(&db, "Alice").unwrap(), 10.0);
        assert_eq!(sales::list_sales(&db).unwrap().len(), 1);
    }

    #[test]
    fn test_reverse_settlement_does_not_reopen_tab() {
        let db = setup();
        finalize(&db, &[("Pilsen", 3)], PaymentMethod::Vip, Some("Alice"));
        let settlement = vip::settle_account(&db, "Alice", PaymentMethod::Pix).unwrap();

        reverse_sale(&db, settlement.id).unwrap();

        // The payoff row is gone but the tab stays at zero
        assert_eq!(vip::get_balance(&db, "Alice").unwrap(), 0.0);
        assert!(matches!(
            sales::get_sale(&db, settlement.id),
            Err(PosError::NotFound(_))
        ));
    }
}

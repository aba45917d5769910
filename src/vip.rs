//! VIP tab registry and settlement for Stand POS.
//!
//! A VIP account is created implicitly by the first sale charged to a
//! customer's name and carries a running balance. Settlement pays the whole
//! tab at once: it writes a settlement-kind Sale for the outstanding amount
//! (so the payoff shows up in revenue under the method it was paid with)
//! and zeroes the balance in the same transaction.

use chrono::Local;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::DbState;
use crate::error::PosError;
use crate::sales::{PaymentMethod, Sale, SaleKind};

/// One open (or settled) tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VipAccount {
    pub name: String,
    pub balance: f64,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// All accounts with an outstanding balance, largest tab first.
pub fn list_open_accounts(db: &DbState) -> Result<Vec<VipAccount>, PosError> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT name, balance FROM vip_accounts WHERE balance > 0 ORDER BY balance DESC, name",
    )?;
    let accounts = stmt
        .query_map([], |row| {
            Ok(VipAccount {
                name: row.get(0)?,
                balance: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accounts)
}

/// Current balance for a customer. NotFound if no tab was ever opened.
pub fn get_balance(db: &DbState, name: &str) -> Result<f64, PosError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT balance FROM vip_accounts WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            PosError::not_found(format!("VIP account not found: {name}"))
        }
        other => PosError::Storage(other),
    })
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Pay off a customer's whole tab.
///
/// The method must be one money actually changes hands in (pix, debit,
/// credit, cash); settling VIP with VIP or as complimentary is rejected.
/// The balance is read and zeroed inside one transaction, so a double
/// settle cannot drive it negative: the second call finds 0 and fails with
/// a State error.
pub fn settle_account(
    db: &DbState,
    name: &str,
    method: PaymentMethod,
) -> Result<Sale, PosError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PosError::validation("Settlement requires a customer name"));
    }
    if !method.can_settle() {
        return Err(PosError::validation(format!(
            "A VIP tab cannot be settled with method {method}"
        )));
    }

    let created_at = Local::now().to_rfc3339();
    let conn = db.lock();

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(i64, f64), PosError> {
        let balance: f64 = conn
            .query_row(
                "SELECT balance FROM vip_accounts WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PosError::not_found(format!("VIP account not found: {name}"))
                }
                other => PosError::Storage(other),
            })?;

        if balance <= 0.0 {
            return Err(PosError::state(format!(
                "VIP account {name} has no outstanding balance"
            )));
        }

        conn.execute(
            "INSERT INTO sales (
                kind, items, subtotal, discount, total,
                payment_method, vip_customer, created_at
            ) VALUES ('settlement', '[]', ?1, 0, ?1, ?2, ?3, ?4)",
            params![balance, method.as_str(), name, created_at],
        )?;
        let sale_id = conn.last_insert_rowid();

        conn.execute(
            "UPDATE vip_accounts SET balance = 0, updated_at = datetime('now')
             WHERE name = ?1",
            params![name],
        )?;

        Ok((sale_id, balance))
    })();

    let (sale_id, balance) = match result {
        Ok(pair) => {
            conn.execute_batch("COMMIT")?;
            pair
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };

    info!(
        sale_id = sale_id,
        vip = %name,
        method = %method,
        amount = %format!("{balance:.2}"),
        "VIP tab settled"
    );

    Ok(Sale {
        id: sale_id,
        kind: SaleKind::Settlement,
        items: vec![],
        subtotal: balance,
        discount: 0.0,
        total: balance,
        payment_method: method,
        vip_customer: Some(name.to_string()),
        cash_tendered: None,
        change_due: None,
        created_at,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

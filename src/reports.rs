//! Closing reports for Stand POS.
//!
//! Read-only aggregation over the ledger and VIP registry: revenue totals,
//! per-method and per-flavor breakdowns, hourly buckets, and the cash
//! drawer reconciliation figure (initial float + cash revenue). An empty
//! ledger yields empty aggregates, never errors.

use chrono::{DateTime, Timelike};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::config;
use crate::db::DbState;
use crate::error::PosError;
use crate::sales::{LineItem, PaymentMethod};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Quantity and gross revenue for one flavor across all product sales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlavorRevenue {
    pub flavor: String,
    pub quantity: i64,
    pub revenue: f64,
}

/// Sale count and revenue for one hour of the event (0-23, operator clock).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourRevenue {
    pub hour: u32,
    pub sale_count: i64,
    pub revenue: f64,
}

/// Sale count and revenue for one payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodRevenue {
    pub method: PaymentMethod,
    pub sale_count: i64,
    pub revenue: f64,
}

/// The closing-screen rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub sale_count: i64,
    pub total_revenue: f64,
    pub product_revenue: f64,
    pub settlement_revenue: f64,
    pub discount_total: f64,
    pub cash_drawer_total: f64,
    pub by_method: Vec<MethodRevenue>,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Sum of all sale totals (settlements included; they are revenue under
/// the method the tab was paid with).
pub fn total_revenue(db: &DbState) -> Result<f64, PosError> {
    let conn = db.lock();
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(total), 0) FROM sales",
        [],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Sum of sale totals for one payment method.
pub fn revenue_by_method(db: &DbState, method: PaymentMethod) -> Result<f64, PosError> {
    let conn = db.lock();
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(total), 0) FROM sales WHERE payment_method = ?1",
        params![method.as_str()],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// What should be in the drawer: the configured float plus cash revenue.
pub fn cash_drawer_total(db: &DbState) -> Result<f64, PosError> {
    let cash = revenue_by_method(db, PaymentMethod::Cash)?;
    let conn = db.lock();
    Ok(cash + config::initial_cash_float(&conn))
}

/// Per-flavor quantity and gross revenue from product-sale line items.
/// Settlements carry no line items and the discount lives on the sale row,
/// so neither leaks into flavor figures. Sorted by revenue, largest first.
pub fn revenue_by_flavor(db: &DbState) -> Result<Vec<FlavorRevenue>, PosError> {
    let conn = db.lock();
    let mut stmt = conn.prepare("SELECT id, items FROM sales WHERE kind = 'product'")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut by_flavor: BTreeMap<String, (i64, f64)> = BTreeMap::new();
    for row in rows {
        let (sale_id, items_json) = row?;
        let items: Vec<LineItem> = match serde_json::from_str(&items_json) {
            Ok(items) => items,
            Err(e) => {
                warn!(sale_id = sale_id, "Skipping malformed line items: {e}");
                continue;
            }
        };
        for item in items {
            let entry = by_flavor.entry(item.flavor).or_insert((0, 0.0));
            entry.0 += item.quantity;
            entry.1 += item.line_total;
        }
    }

    let mut result: Vec<FlavorRevenue> = by_flavor
        .into_iter()
        .map(|(flavor, (quantity, revenue))| FlavorRevenue {
            flavor,
            quantity,
            revenue,
        })
        .collect();
    result.sort_by(|a, b| {
        b.revenue
            .partial_cmp(&a.revenue)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.flavor.cmp(&b.flavor))
    });
    Ok(result)
}

/// Revenue bucketed by the hour component of the sale timestamp.
/// Timestamps are stored offset-aware in the register's local time, so the
/// buckets line up with the operator's clock. Sorted by hour.
pub fn revenue_by_hour(db: &DbState) -> Result<Vec<HourRevenue>, PosError> {
    let conn = db.lock();
    let mut stmt = conn.prepare("SELECT id, created_at, total FROM sales")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;

    let mut by_hour: BTreeMap<u32, (i64, f64)> = BTreeMap::new();
    for row in rows {
        let (sale_id, created_at, total) = row?;
        let hour = match DateTime::parse_from_rfc3339(&created_at) {
            Ok(ts) => ts.hour(),
            Err(e) => {
                warn!(sale_id = sale_id, created_at = %created_at, "Skipping unparseable timestamp: {e}");
                continue;
            }
        };
        let entry = by_hour.entry(hour).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += total;
    }

    Ok(by_hour
        .into_iter()
        .map(|(hour, (sale_count, revenue))| HourRevenue {
            hour,
            sale_count,
            revenue,
        })
        .collect())
}

/// Everything the closing screen shows in one pass.
pub fn summary(db: &DbState) -> Result<Summary, PosError> {
    let conn = db.lock();

    let (sale_count, total, product, settlement, discounts): (i64, f64, f64, f64, f64) = conn
        .query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(total), 0),
                    COALESCE(SUM(CASE WHEN kind = 'product' THEN total ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN kind = 'settlement' THEN total ELSE 0 END), 0),
                    COALESCE(SUM(discount), 0)
             FROM sales",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

    let mut stmt = conn.prepare(
        "SELECT payment_method, COUNT(*), COALESCE(SUM(total), 0)
         FROM sales GROUP BY payment_method ORDER BY SUM(total) DESC",
    )?;
    let mut by_method = Vec::new();
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;
    for row in rows {
        let (method_raw, count, revenue) = row?;
        match PaymentMethod::parse(&method_raw) {
            Some(method) => by_method.push(MethodRevenue {
                method,
                sale_count: count,
                revenue,
            }),
            None => warn!(method = %method_raw, "Skipping unknown payment method in summary"),
        }
    }

    let cash = by_method
        .iter()
        .find(|m| m.method == PaymentMethod::Cash)
        .map(|m| m.revenue)
        .unwrap_or(0.0);
    let drawer = cash + config::initial_cash_float(&conn);

    Ok(Summary {
        sale_count,
        total_revenue: total,
        product_revenue: product,
        settlement_revenue: settlement,
        discount_total: discounts,
        cash_drawer_total: drawer,
        by_method,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

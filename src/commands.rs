//! Operator command layer for Stand POS.
//!
//! Thin wrappers between the interactive surface and the domain modules:
//! parse the operator's words, call one operation, format one reply.
//! Mutating commands snapshot the ledger and VIP registry to CSV afterward
//! so durable state is never more than one action behind.
//!
//! The checkout session (cart + pending tickets) lives here as an explicit
//! context passed into each command, owned by the run loop, never process
//! globals.

use std::fmt::Write as _;
use std::path::Path;

use crate::backup;
use crate::cart::Cart;
use crate::config::{self, CatalogItem, DEFAULT_PRICE, FIXED_FLAVORS};
use crate::db::DbState;
use crate::error::PosError;
use crate::refunds;
use crate::reports;
use crate::sales::{self, PaymentMethod};
use crate::ticket::{self, TicketDoc};
use crate::vip;

/// State for one operator session at the register.
#[derive(Debug, Default)]
pub struct CheckoutSession {
    pub cart: Cart,
    pub pending_tickets: Vec<TicketDoc>,
}

impl CheckoutSession {
    pub fn new() -> Self {
        CheckoutSession::default()
    }
}

fn snapshot(db: &DbState) -> Result<(), PosError> {
    backup::write_snapshots(&db.lock(), &db.data_dir())
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// `configure <float> <flavor=price,...>|defaults [stand name]`
pub fn cmd_configure(db: &DbState, args: &[&str]) -> Result<String, PosError> {
    let (float_raw, rest) = args
        .split_first()
        .ok_or_else(|| PosError::validation("Usage: configure <float> <flavor=price,...> [stand name]"))?;
    let initial_float: f64 = float_raw
        .parse()
        .map_err(|_| PosError::validation(format!("Not a number: {float_raw}")))?;

    if rest.is_empty() {
        return Err(PosError::validation("Missing flavor list (or 'defaults')"));
    }

    // Flavor names may contain spaces ("Black Jack=14"), so the list runs
    // through the last token carrying '='; whatever follows is the stand name.
    let (items, stand_name) = if rest[0] == "defaults" {
        let items = FIXED_FLAVORS
            .iter()
            .map(|name| CatalogItem::fixed(name, DEFAULT_PRICE))
            .collect::<Vec<_>>();
        (items, rest[1..].join(" "))
    } else {
        let last_priced = rest
            .iter()
            .rposition(|token| token.contains('='))
            .ok_or_else(|| PosError::validation("Missing flavor list (or 'defaults')"))?;
        let items = parse_flavor_list(&rest[..=last_priced].join(" "))?;
        (items, rest[last_priced + 1..].join(" "))
    };

    config::configure(db, initial_float, &stand_name, &items)?;
    Ok(format!(
        "Event configured: {} flavors, float {initial_float:.2}",
        items.len()
    ))
}

/// `Pilsen=10,IPA=12.5,Black Jack=14` → catalog items, in order.
fn parse_flavor_list(raw: &str) -> Result<Vec<CatalogItem>, PosError> {
    let mut items = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, price_raw) = part
            .split_once('=')
            .ok_or_else(|| PosError::validation(format!("Expected flavor=price, got: {part}")))?;
        let price: f64 = price_raw
            .trim()
            .parse()
            .map_err(|_| PosError::validation(format!("Bad price for {name}: {price_raw}")))?;
        items.push(CatalogItem::fixed(name.trim(), price));
    }
    Ok(items)
}

/// `catalog`
pub fn cmd_catalog(db: &DbState) -> Result<String, PosError> {
    let config = config::get_config(db)?;
    let mut out = format!(
        "{} (float {:.2})\n",
        config.stand_name, config.initial_cash_float
    );
    for item in &config.flavors {
        let tag = if item.seasonal { " (seasonal)" } else { "" };
        let _ = writeln!(out, "  {} {:.2}{tag}", item.name, item.price);
    }
    Ok(out.trim_end().to_string())
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

/// `add <flavor>`
pub fn cmd_add(db: &DbState, session: &mut CheckoutSession, flavor: &str) -> Result<String, PosError> {
    let catalog = config::get_catalog(db)?;
    session.cart.add(&catalog, flavor)?;
    Ok(format!("Added {flavor}, cart total {:.2}", session.cart.total()))
}

/// `remove <flavor>`
pub fn cmd_remove(session: &mut CheckoutSession, flavor: &str) -> Result<String, PosError> {
    session.cart.decrement(flavor);
    Ok(format!("Cart total {:.2}", session.cart.total()))
}

/// `discount <amount>`
pub fn cmd_discount(session: &mut CheckoutSession, amount_raw: &str) -> Result<String, PosError> {
    let amount: f64 = amount_raw
        .parse()
        .map_err(|_| PosError::validation(format!("Not a number: {amount_raw}")))?;
    session.cart.apply_discount(amount)?;
    Ok(format!(
        "Discount {amount:.2} applied, cart total {:.2}",
        session.cart.total()
    ))
}

/// `cart`
pub fn cmd_cart(session: &CheckoutSession) -> Result<String, PosError> {
    if session.cart.is_empty() {
        return Ok("Cart empty".to_string());
    }
    let mut out = String::new();
    for line in session.cart.lines() {
        let _ = writeln!(
            out,
            "  {} x{} @ {:.2} = {:.2}",
            line.flavor,
            line.quantity,
            line.unit_price,
            line.line_total()
        );
    }
    if session.cart.discount() > 0.0 {
        let _ = writeln!(out, "  discount -{:.2}", session.cart.discount());
    }
    let _ = write!(out, "  TOTAL {:.2}", session.cart.total());
    Ok(out)
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

/// `checkout <method> [vip name | cash tendered]`
pub fn cmd_checkout(
    db: &DbState,
    session: &mut CheckoutSession,
    method_raw: &str,
    rest: &[&str],
) -> Result<String, PosError> {
    let method = PaymentMethod::parse(method_raw)
        .ok_or_else(|| PosError::validation(format!("Unknown payment method: {method_raw}")))?;

    let (vip_name, tendered) = match method {
        PaymentMethod::Vip => {
            let name = rest.join(" ");
            (Some(name), None)
        }
        PaymentMethod::Cash => {
            let raw = rest
                .first()
                .ok_or_else(|| PosError::validation("Cash checkout needs the amount tendered"))?;
            let tendered: f64 = raw
                .parse()
                .map_err(|_| PosError::validation(format!("Not a number: {raw}")))?;
            (None, Some(tendered))
        }
        _ => (None, None),
    };

    let outcome = sales::finalize_sale(
        db,
        &mut session.cart,
        method,
        vip_name.as_deref(),
        tendered,
    )?;
    snapshot(db)?;

    let ticket_count = outcome.tickets.len();
    session.pending_tickets.extend(outcome.tickets);

    let mut msg = format!(
        "Sale #{}: {:.2} by {}",
        outcome.sale.id, outcome.sale.total, method
    );
    if let Some(change) = outcome.change_due {
        let _ = write!(msg, ", change {change:.2}");
    }
    if let Some(name) = outcome.sale.vip_customer.as_deref() {
        let _ = write!(msg, ", on {name}'s tab");
    }
    let _ = write!(msg, " ({ticket_count} tickets pending)");
    Ok(msg)
}

// ---------------------------------------------------------------------------
// VIP
// ---------------------------------------------------------------------------

/// `vips`
pub fn cmd_vips(db: &DbState) -> Result<String, PosError> {
    let open = vip::list_open_accounts(db)?;
    if open.is_empty() {
        return Ok("No open tabs".to_string());
    }
    let mut out = String::new();
    for account in &open {
        let _ = writeln!(out, "  {}: {:.2}", account.name, account.balance);
    }
    Ok(out.trim_end().to_string())
}

/// `settle <method> <name>`
pub fn cmd_settle(db: &DbState, method_raw: &str, name_words: &[&str]) -> Result<String, PosError> {
    let method = PaymentMethod::parse(method_raw)
        .ok_or_else(|| PosError::validation(format!("Unknown payment method: {method_raw}")))?;
    let name = name_words.join(" ");

    let sale = vip::settle_account(db, &name, method)?;
    snapshot(db)?;

    Ok(format!(
        "Tab settled: sale #{}, {:.2} by {}",
        sale.id, sale.total, method
    ))
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// `sales [query]`
pub fn cmd_sales(db: &DbState, query: &str) -> Result<String, PosError> {
    let hits = sales::search_sales(db, query)?;
    if hits.is_empty() {
        return Ok("No matching sales".to_string());
    }
    let mut out = String::new();
    for sale in &hits {
        let flavors: Vec<String> = sale
            .items
            .iter()
            .map(|i| format!("{} x{}", i.flavor, i.quantity))
            .collect();
        let label = if flavors.is_empty() {
            format!("settlement for {}", sale.vip_customer.as_deref().unwrap_or("?"))
        } else {
            flavors.join(", ")
        };
        let _ = writeln!(
            out,
            "  #{} {}: {:.2} by {} [{}]",
            sale.id,
            label,
            sale.total,
            sale.payment_method,
            sale.created_at
        );
    }
    Ok(out.trim_end().to_string())
}

/// `reverse <id>`
pub fn cmd_reverse(db: &DbState, id_raw: &str) -> Result<String, PosError> {
    let sale_id: i64 = id_raw
        .parse()
        .map_err(|_| PosError::validation(format!("Not a sale id: {id_raw}")))?;

    let sale = refunds::reverse_sale(db, sale_id)?;
    snapshot(db)?;

    Ok(format!(
        "Reversed sale #{}: {:.2} by {}",
        sale.id, sale.total, sale.payment_method
    ))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// `report`
pub fn cmd_report(db: &DbState) -> Result<String, PosError> {
    let summary = reports::summary(db)?;
    let mut out = String::new();
    let _ = writeln!(out, "Sales: {}", summary.sale_count);
    let _ = writeln!(out, "Total revenue: {:.2}", summary.total_revenue);
    let _ = writeln!(
        out,
        "  products {:.2} / settlements {:.2} / discounts -{:.2}",
        summary.product_revenue, summary.settlement_revenue, summary.discount_total
    );
    let _ = writeln!(out, "Cash drawer (float + cash): {:.2}", summary.cash_drawer_total);

    if !summary.by_method.is_empty() {
        let _ = writeln!(out, "By method:");
        for m in &summary.by_method {
            let _ = writeln!(out, "  {}: {:.2} ({} sales)", m.method, m.revenue, m.sale_count);
        }
    }

    let flavors = reports::revenue_by_flavor(db)?;
    if !flavors.is_empty() {
        let _ = writeln!(out, "By flavor:");
        for f in &flavors {
            let _ = writeln!(out, "  {}: {} units, {:.2}", f.flavor, f.quantity, f.revenue);
        }
    }

    let hours = reports::revenue_by_hour(db)?;
    if !hours.is_empty() {
        let _ = writeln!(out, "By hour:");
        for h in &hours {
            let _ = writeln!(out, "  {:02}h: {:.2} ({} sales)", h.hour, h.revenue, h.sale_count);
        }
    }

    Ok(out.trim_end().to_string())
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

/// `tickets <dir>`: write pending tickets as PNGs and clear the tray.
pub fn cmd_tickets(session: &mut CheckoutSession, dir: &Path) -> Result<String, PosError> {
    if session.pending_tickets.is_empty() {
        return Ok("No pending tickets".to_string());
    }

    std::fs::create_dir_all(dir).map_err(|e| PosError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for (index, doc) in session.pending_tickets.iter().enumerate() {
        let filename = format!(
            "ticket_{}_{}_{}.png",
            doc.short_id(),
            index + 1,
            doc.flavor.to_lowercase().replace(' ', "-")
        );
        ticket::write_ticket_png(doc, &dir.join(filename))?;
    }

    let count = session.pending_tickets.len();
    session.pending_tickets.clear();
    Ok(format!("{count} tickets written to {}", dir.display()))
}

// ---------------------------------------------------------------------------
// Backup & reset
// ---------------------------------------------------------------------------

/// `backup`: snapshot on demand (also happens after every mutation).
pub fn cmd_backup(db: &DbState) -> Result<String, PosError> {
    snapshot(db)?;
    Ok(format!("Snapshots written to {}", db.data_dir().display()))
}


/// `reset`: wipe all event state for a new event.
pub fn cmd_reset(db: &DbState, session: &mut CheckoutSession) -> Result<String, PosError> {
    config::reset_event(db)?;
    session.cart.clear();
    session.pending_tickets.clear();
    Ok("All event state cleared".to_string())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::fs;

    /// Test state whose data dir is a real temp directory, so snapshot
    /// writes land somewhere disposable.
    fn test_db(tag: &str) -> (DbState, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("stand-pos-cmd-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut db = db::test_state();
        db.db_path = dir.join("stand-pos.db");
        (db, dir)
    }

    fn configured(tag: &str) -> (DbState, std::path::PathBuf) {
        let (db, dir) = test_db(tag);
        cmd_configure(&db, &["150", "Pilsen=10,IPA=12", "Seven", "Stars"]).unwrap();
        (db, dir)
    }

    #[test]
    fn test_configure_defaults_uses_fixed_flavors() {
        let (db, dir) = test_db("defaults");
        let msg = cmd_configure(&db, &["0", "defaults"]).unwrap();
        assert!(msg.contains("6 flavors"));

        let catalog = config::get_catalog(&db).unwrap();
        assert_eq!(catalog.len(), FIXED_FLAVORS.len());
        assert!(catalog.iter().all(|i| i.price == DEFAULT_PRICE));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_flavor_list_parsing_handles_spaces() {
        let items = parse_flavor_list("Pilsen=10, Black Jack=14.5").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].name, "Black Jack");
        assert_eq!(items[1].price, 14.5);

        assert!(parse_flavor_list("Pilsen").is_err());
        assert!(parse_flavor_list("Pilsen=abc").is_err());
    }

    /// The worked example: Pilsen x2 + IPA = 32, discount 2 → 30 on
    /// Alice's tab, then settled by PIX.
    #[test]
    fn test_checkout_vip_then_settle_flow() {
        let (db, dir) = configured("flow");
        let mut session = CheckoutSession::new();

        cmd_add(&db, &mut session, "Pilsen").unwrap();
        cmd_add(&db, &mut session, "Pilsen").unwrap();
        cmd_add(&db, &mut session, "IPA").unwrap();
        cmd_discount(&mut session, "2").unwrap();
        assert_eq!(session.cart.total(), 30.0);

        let msg = cmd_checkout(&db, &mut session, "vip", &["Alice"]).unwrap();
        assert!(msg.contains("30.00"));
        assert!(msg.contains("Alice"));
        assert!(session.cart.is_empty());
        assert_eq!(session.pending_tickets.len(), 3);
        assert_eq!(vip::get_balance(&db, "Alice").unwrap(), 30.0);

        let msg = cmd_settle(&db, "pix", &["Alice"]).unwrap();
        assert!(msg.contains("30.00"));
        assert_eq!(vip::get_balance(&db, "Alice").unwrap(), 0.0);

        // Snapshots were written by the mutating commands
        assert!(dir.join(backup::SALES_SNAPSHOT).exists());
        assert!(dir.join(backup::VIPS_SNAPSHOT).exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_checkout_cash_reports_change() {
        let (db, dir) = configured("cash");
        let mut session = CheckoutSession::new();
        cmd_add(&db, &mut session, "IPA").unwrap();

        let msg = cmd_checkout(&db, &mut session, "cash", &["20"]).unwrap();
        assert!(msg.contains("change 8.00"));

        let err = cmd_checkout(&db, &mut session, "cash", &["20"]).unwrap_err();
        assert!(matches!(err, PosError::State(_)), "cart is empty now");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reverse_command_round_trip() {
        let (db, dir) = configured("reverse");
        let mut session = CheckoutSession::new();
        cmd_add(&db, &mut session, "Pilsen").unwrap();
        cmd_checkout(&db, &mut session, "vip", &["Bob"]).unwrap();

        let listing = cmd_sales(&db, "").unwrap();
        assert!(listing.contains("#1"));

        cmd_reverse(&db, "1").unwrap();
        assert_eq!(vip::get_balance(&db, "Bob").unwrap(), 0.0);
        assert_eq!(cmd_sales(&db, "").unwrap(), "No matching sales");

        let err = cmd_reverse(&db, "1").unwrap_err();
        assert!(matches!(err, PosError::NotFound(_)));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_ticket_export_clears_tray() {
        let (db, dir) = configured("tickets");
        let mut session = CheckoutSession::new();
        cmd_add(&db, &mut session, "Pilsen").unwrap();
        cmd_add(&db, &mut session, "Pilsen").unwrap();
        cmd_checkout(&db, &mut session, "pix", &[]).unwrap();

        let out_dir = dir.join("tickets");
        let msg = cmd_tickets(&mut session, &out_dir).unwrap();
        assert!(msg.starts_with("2 tickets"));
        assert!(session.pending_tickets.is_empty());

        let written = fs::read_dir(&out_dir).unwrap().count();
        assert_eq!(written, 2);

        assert_eq!(cmd_tickets(&mut session, &out_dir).unwrap(), "No pending tickets");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_report_command_formats_summary() {
        let (db, dir) = configured("report");
        let mut session = CheckoutSession::new();
        cmd_add(&db, &mut session, "Pilsen").unwrap();
        cmd_checkout(&db, &mut session, "cash", &["10"]).unwrap();

        let report = cmd_report(&db).unwrap();
        assert!(report.contains("Total revenue: 10.00"));
        assert!(report.contains("Cash drawer (float + cash): 160.00"));
        assert!(report.contains("Pilsen: 1 units"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reset_clears_session_and_state() {
        let (db, dir) = configured("reset");
        let mut session = CheckoutSession::new();
        cmd_add(&db, &mut session, "Pilsen").unwrap();
        cmd_checkout(&db, &mut session, "vip", &["Alice"]).unwrap();
        cmd_add(&db, &mut session, "IPA").unwrap();

        cmd_reset(&db, &mut session).unwrap();

        assert!(session.cart.is_empty());
        assert!(session.pending_tickets.is_empty());
        assert!(!config::is_configured(&db));
        assert!(!dir.join(backup::SALES_SNAPSHOT).exists());

        let _ = fs::remove_dir_all(&dir);
    }
}

//! CSV backup snapshots for Stand POS.
//!
//! After every mutating surface action the ledger and VIP registry are
//! snapshotted as CSV next to the database, so the numbers survive even if
//! the database file is lost with the laptop at teardown. Write failures
//! are propagated to the operator, never swallowed: a backup that silently
//! stopped working is worse than none.

use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::PosError;

pub const SALES_SNAPSHOT: &str = "sales_backup.csv";
pub const VIPS_SNAPSHOT: &str = "vips_backup.csv";

/// Snapshot sales and VIP balances into `dir`.
pub fn write_snapshots(conn: &Connection, dir: &Path) -> Result<(), PosError> {
    let mut sales_csv =
        String::from("id,created_at,kind,payment_method,subtotal,discount,total,vip_customer\n");
    {
        let mut stmt = conn.prepare(
            "SELECT id, created_at, kind, payment_method, subtotal, discount, total,
                    COALESCE(vip_customer, '')
             FROM sales ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        for row in rows {
            let (id, created_at, kind, method, subtotal, discount, total, vip) = row?;
            sales_csv.push_str(&format!(
                "{id},{},{kind},{method},{subtotal:.2},{discount:.2},{total:.2},{}\n",
                csv_field(&created_at),
                csv_field(&vip),
            ));
        }
    }

    let mut vips_csv = String::from("name,balance\n");
    {
        let mut stmt = conn.prepare("SELECT name, balance FROM vip_accounts ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        for row in rows {
            let (name, balance) = row?;
            vips_csv.push_str(&format!("{},{balance:.2}\n", csv_field(&name)));
        }
    }

    let sales_path = dir.join(SALES_SNAPSHOT);
    fs::write(&sales_path, sales_csv).map_err(|e| PosError::Io {
        path: sales_path.clone(),
        source: e,
    })?;

    let vips_path = dir.join(VIPS_SNAPSHOT);
    fs::write(&vips_path, vips_csv).map_err(|e| PosError::Io {
        path: vips_path.clone(),
        source: e,
    })?;

    debug!("Backup snapshots written to {}", dir.display());
    Ok(())
}

/// Delete the snapshots (event reset). Missing files are fine.
pub fn remove_snapshots(dir: &Path) -> Result<(), PosError> {
    for name in [SALES_SNAPSHOT, VIPS_SNAPSHOT] {
        let path = dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PosError::Io { path, source: e }),
        }
    }
    Ok(())
}

/// Quote a CSV field when it carries a comma, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

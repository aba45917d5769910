//! Stand POS: festival beverage stand point-of-sale.
//!
//! Offline, single register, single operator: flavors go into a cart, a
//! payment method finalizes the cart into the sales ledger, VIP tabs accrue
//! and settle, and the closing report reconciles the cash drawer. Every
//! unit sold yields a printable PNG drink ticket.
//!
//! The domain modules ([`cart`], [`sales`], [`vip`], [`refunds`],
//! [`reports`]) carry the business rules; [`commands`] is the thin operator
//! surface driven by the interactive loop in [`run`].

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod backup;
pub mod cart;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod refunds;
pub mod reports;
pub mod sales;
pub mod ticket;
pub mod vip;

pub use error::PosError;

use commands::CheckoutSession;
use db::DbState;

/// Where the database, backups, and logs live. Overridable for tests and
/// multi-stand laptops.
fn data_dir() -> PathBuf {
    std::env::var_os("STAND_POS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("stand-pos-data"))
}

const HELP: &str = "\
Commands:
  configure <float> <flavor=price,...>|defaults [stand name]
  catalog
  add <flavor> | remove <flavor> | cart | discount <amount>
  checkout <pix|debit|credit|cash|vip|complimentary> [vip name | cash tendered]
  vips | settle <method> <name>
  sales [id digits] | reverse <id>
  report | tickets [dir] | backup | reset
  help | quit";

// ============================================================================
// App entry point
// ============================================================================

pub fn run() -> anyhow::Result<()> {
    let data_dir = data_dir();

    // Structured logging: console + daily rolling file
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stand_pos_lib=debug"));

    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "pos");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the app; dropping it flushes logs.
    // We leak it intentionally since the app runs until process exit.
    std::mem::forget(_guard);

    info!("Starting Stand POS v{}", env!("CARGO_PKG_VERSION"));

    let db = db::init(&data_dir)?;
    let mut session = CheckoutSession::new();

    println!("Stand POS. Type 'help' for commands");
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        match dispatch(&db, &mut session, line.trim()) {
            Some(Ok(msg)) => println!("{msg}"),
            Some(Err(e)) => println!("! {e}"),
            None => break,
        }
    }

    info!("Stand POS shutting down");
    Ok(())
}

/// Route one operator line to a command. `None` means quit.
fn dispatch(
    db: &DbState,
    session: &mut CheckoutSession,
    line: &str,
) -> Option<Result<String, PosError>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = tokens.split_first() else {
        return Some(Ok(String::new()));
    };

    let result = match command {
        "configure" => commands::cmd_configure(db, args),
        "catalog" => commands::cmd_catalog(db),
        "add" => match args {
            [] => Err(PosError::validation("Usage: add <flavor>")),
            _ => commands::cmd_add(db, session, &args.join(" ")),
        },
        "remove" => match args {
            [] => Err(PosError::validation("Usage: remove <flavor>")),
            _ => commands::cmd_remove(session, &args.join(" ")),
        },
        "cart" => commands::cmd_cart(session),
        "discount" => match args {
            [amount] => commands::cmd_discount(session, amount),
            _ => Err(PosError::validation("Usage: discount <amount>")),
        },
        "checkout" => match args {
            [] => Err(PosError::validation(
                "Usage: checkout <method> [vip name | cash tendered]",
            )),
            [method, rest @ ..] => commands::cmd_checkout(db, session, method, rest),
        },
        "vips" => commands::cmd_vips(db),
        "settle" => match args {
            [method, name @ ..] if !name.is_empty() => commands::cmd_settle(db, method, name),
            _ => Err(PosError::validation("Usage: settle <method> <name>")),
        },
        "sales" => commands::cmd_sales(db, &args.join(" ")),
        "reverse" => match args {
            [id] => commands::cmd_reverse(db, id),
            _ => Err(PosError::validation("Usage: reverse <id>")),
        },
        "report" => commands::cmd_report(db),
        "tickets" => {
            let dir = args
                .first()
                .copied()
                .map(PathBuf::from)
                .unwrap_or_else(|| db.data_dir().join("tickets"));
            commands::cmd_tickets(session, &dir)
        }
        "backup" => commands::cmd_backup(db),
        "reset" => commands::cmd_reset(db, session),
        "help" => Ok(HELP.to_string()),
        "quit" | "exit" => return None,
        other => Err(PosError::validation(format!(
            "Unknown command: {other}. Type 'help'"
        ))),
    };

    Some(result)
}

// ===========================================================================
// Tests
// ===========================================================================

use std::env;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;

use loanpro::{config::AppConfig, db, notifications, schema::password_reset_tokens};

const NOTIFICATION_RETENTION_DAYS: i64 = 90;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("purge-reset-tokens") => purge_reset_tokens()?,
        Some("purge-notifications") => purge_notifications(parse_days(args.next())?)?,
        Some(cmd) => {
            eprintln!(
                "Unknown command: {cmd}\nUsage: maintenance purge-reset-tokens | purge-notifications [days]"
            );
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance purge-reset-tokens | purge-notifications [days]");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_days(raw: Option<String>) -> Result<i64> {
    match raw {
        Some(value) => value
            .parse()
            .with_context(|| format!("invalid day count '{value}'")),
        None => Ok(NOTIFICATION_RETENTION_DAYS),
    }
}

fn connect() -> Result<(AppConfig, db::PgPool)> {
    let config = AppConfig::from_env()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    Ok((config, pool))
}

/// Drops expired and already-used password reset tokens.
fn purge_reset_tokens() -> Result<()> {
    let (_, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let now = Utc::now().naive_utc();
    let grace = now - ChronoDuration::days(1);
    let deleted = diesel::delete(
        password_reset_tokens::table.filter(
            password_reset_tokens::expires_at
                .lt(now)
                .or(password_reset_tokens::used_at.lt(grace)),
        ),
    )
    .execute(&mut conn)
    .context("failed to purge password reset tokens")?;

    println!("Removed {deleted} stale password reset tokens.");
    Ok(())
}

/// Drops delivered, sent and failed notifications older than the cutoff.
fn purge_notifications(days: i64) -> Result<()> {
    let (_, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let deleted = notifications::delete_older_than(&mut conn, days)
        .context("failed to purge notifications")?;

    println!("Removed {deleted} notifications older than {days} days.");
    Ok(())
}

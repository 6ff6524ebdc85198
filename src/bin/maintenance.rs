use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use orgfiles::{auth::IdentityService, config::AppConfig, db, store::PgStore};

const USAGE: &str = "Usage: maintenance <deactivate-user|reactivate-user> <user-id>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let mut args = env::args().skip(1);
    let active = match args.next().as_deref() {
        Some("deactivate-user") => false,
        Some("reactivate-user") => true,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };
    let user_id: Uuid = args
        .next()
        .context(USAGE)?
        .parse()
        .context("user id must be a UUID")?;

    set_user_active(user_id, active)
}

fn set_user_active(user_id: Uuid, active: bool) -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let identity = IdentityService::new(Arc::new(PgStore::new(pool)));

    match identity.set_active(user_id, active) {
        Ok(user) => {
            let verb = if active { "Reactivated" } else { "Deactivated" };
            println!("{verb} {} ({}).", user.email, user.id);
            Ok(())
        }
        Err(err) => bail!("failed to update user {user_id}: {err}"),
    }
}

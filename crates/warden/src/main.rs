use std::sync::Arc;

use warden_core::{config::Config, store::RecordStore};

#[tokio::main]
async fn main() -> Result<(), warden_core::Error> {
    warden_core::logging::init("warden")?;

    let cfg = Arc::new(Config::load()?);
    let store = Arc::new(RecordStore::open(&cfg.store_path)?);

    warden_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| warden_core::Error::Platform(format!("moderation bot failed: {e}")))?;
    Ok(())
}

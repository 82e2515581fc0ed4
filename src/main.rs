use dotenvy::dotenv;
use guild_store::{Error, RecordStore, Result, config};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Opens the configured store and loads every declared collection, reporting
/// what it finds. Exits with an error if any collection cannot be loaded.
#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file (non-fatal, env vars can be set externally)
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load the store configuration
    let store_config = config::load_store_configuration()
        .inspect_err(|e| error!("Critical error loading store configuration: {}", e))?;

    // 4. Open the store (creates the data directory, removes orphaned temp files)
    let store = RecordStore::open(&store_config)
        .await
        .inspect(|_| info!("Store opened at {:?}", store_config.data_dir))
        .inspect_err(|e| error!("Failed to open store: {}", e))?;

    // 5. Load every declared collection through the compat loader
    let mut failed = Vec::new();
    for name in store.index().declared() {
        match store.index().load(&name).await {
            Ok(snapshot) => info!(
                "{:<16} {:>6} records  layout={:?}",
                name,
                snapshot.collection.len(),
                snapshot.collection.layout()
            ),
            Err(e) => {
                error!("{:<16} unavailable: {}", name, e);
                failed.push(name);
            }
        }
    }

    if !failed.is_empty() {
        warn!("{} collection(s) need operator attention", failed.len());
        return Err(Error::LoadFailed { collections: failed });
    }

    info!("All collections loaded.");
    Ok(())
}

use std::sync::Arc;

use session_authority::auth::SessionAuthority;
use session_authority::configuration::get_configuration;
use session_authority::store::PgStore;
use session_authority::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;

/// Applies schema migrations and checks that the configured key material
/// and database are usable by the session authority.
#[tokio::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = init_telemetry() {
        eprintln!("Failed to initialise telemetry: {}", e);
    }

    tracing::info!("Starting session authority setup");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!(auth = ?config.auth, "Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to migrate the database: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
        })?;

    tracing::info!("Database migrations applied");

    let store = Arc::new(PgStore::new(pool));
    SessionAuthority::new(&configuration.auth, store.clone(), store).map_err(|e| {
        tracing::error!("Failed to build session authority: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Authority setup error")
    })?;

    tracing::info!("Session authority ready");

    Ok(())
}

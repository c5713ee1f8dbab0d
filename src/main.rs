use anyhow::{Context, Result};
use phonetic_relay::{
    cache::Cache,
    commands::Dispatcher,
    config::{Config, UpdateMode},
    membership::MembershipIndex,
    router::{ChatSender, MessageRouter},
    server::{self, AppState},
    settings::SettingsStore,
    store,
    telegram::{self, TelegramClient},
    translation::TranslationService,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("phonetic_relay=info".parse()?),
        )
        .init();

    info!("Starting phonetic relay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    // Persistent store
    let kv = store::connect(&config.store_url)
        .await
        .context("Failed to open store")?;
    match kv.ping().await {
        Ok(()) => info!("Store connection successful. User settings will be persistent."),
        Err(e) => error!(
            "!!! WARNING: Store connection failed: {}. User settings will not be persistent !!!",
            e
        ),
    }

    // Model API
    let translator = Arc::new(TranslationService::new(&config));
    match translator.check_connectivity().await {
        Ok(reply) => info!("Model API connection successful: {}", reply),
        Err(e) => error!(
            "!!! WARNING: Model API connection failed: {}. Translations will not work !!!",
            e
        ),
    }

    // Core services
    let cache = Arc::new(Cache::new(config.cache_ttl));
    let settings = Arc::new(SettingsStore::new(kv.clone(), cache.clone()));
    let membership = Arc::new(MembershipIndex::new(kv, cache));
    let telegram_client = Arc::new(TelegramClient::new(&config));
    let sender: Arc<dyn ChatSender> = telegram_client.clone();
    let router = Arc::new(MessageRouter::new(
        membership.clone(),
        settings.clone(),
        translator,
        sender.clone(),
        config.fanout_concurrency,
    ));
    let dispatcher = Arc::new(Dispatcher::new(sender, settings, router));

    // Warm the cache before the first update arrives
    membership.refresh_all().await;

    // HTTP server: liveness always, webhook only in webhook mode
    let webhook_secret: Option<Arc<str>> = match config.update_mode {
        UpdateMode::Webhook => config.telegram_webhook_secret.as_deref().map(Arc::from),
        UpdateMode::Polling => None,
    };
    let app = server::router(AppState {
        dispatcher: dispatcher.clone(),
        webhook_secret,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Health check server listening on {}", addr);

    match config.update_mode {
        UpdateMode::Polling => {
            tokio::select! {
                result = axum::serve(listener, app).into_future() => result.context("Server error")?,
                result = telegram::run_polling(&telegram_client, &dispatcher) => result?,
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
            }
        }
        UpdateMode::Webhook => {
            match (
                config.telegram_webhook_url.as_deref(),
                config.telegram_webhook_secret.as_deref(),
            ) {
                (Some(url), Some(secret)) => telegram_client
                    .set_webhook(url, secret)
                    .await
                    .context("Failed to register webhook")?,
                _ => info!("TELEGRAM_WEBHOOK_URL not set, assuming the webhook is already registered"),
            }
            info!("Bot started in webhook mode");

            tokio::select! {
                result = axum::serve(listener, app).into_future() => result.context("Server error")?,
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
            }
        }
    }

    info!("Bot stopped");
    Ok(())
}

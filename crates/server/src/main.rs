use entrywatch::AppResources;
use entrywatch::api::start_webserver;
use entrywatch::channels::NotificationChannel;
use entrywatch::channels::chatbot::ChatBotChannel;
use entrywatch::channels::email::EmailChannel;
use entrywatch::channels::push::PushChannel;
use entrywatch::config::load_config_or_panic;
use entrywatch::directory::{CachedDirectory, HttpDirectory, SubscriberDirectory};
use entrywatch::dispatch::{DispatchWorker, dispatch_loop};
use entrywatch::fanout::FanoutCoordinator;
use entrywatch::fetch::{HttpStatusFetcher, StatusFetcher};
use entrywatch::poller::{PollTaskManager, poll_loop};
use entrywatch::recovery;
use lettre::{AsyncSmtpTransport, Tokio1Executor, transport::smtp::authentication::Credentials};
use sea_orm::Database;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "entrywatch=info,sea_orm=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install().expect("Failed to install `color_eyre::install`");

    initialize_standard_tracing();

    // Load config
    let config = Arc::new(load_config_or_panic());

    // Set up SeaORM database connection
    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .expect("Failed to connect to database"),
    );

    // Set up lettre SMTP client
    let creds = Credentials::new(config.smtp.username.clone(), config.smtp.password.clone());
    let mailer = Arc::new(
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp.server)
            .expect("Failed to build SMTP transport")
            .port(config.smtp.port)
            .credentials(creds)
            .build(),
    );

    tracing::info!(
        check_interval_secs = config.poller.check_interval_secs,
        max_concurrent_fetches = config.poller.max_concurrent_fetches,
        dispatch_workers = config.dispatch.workers,
        max_attempts = config.dispatch.max_attempts,
        default_tier = %config.tiers.default_tier,
        "poller and dispatch configuration"
    );

    // External collaborators
    let fetcher: Arc<dyn StatusFetcher> = Arc::new(HttpStatusFetcher::new(
        config.collaborators.fetch_url.clone(),
        Duration::from_secs(config.poller.fetch_timeout_secs),
    ));
    let directory: Arc<dyn SubscriberDirectory> = Arc::new(CachedDirectory::new(
        HttpDirectory::new(
            config.collaborators.directory_url.clone(),
            Duration::from_secs(config.poller.fetch_timeout_secs),
        ),
        Duration::from_secs(config.collaborators.cache_secs),
    ));

    // Notification channels, in configured order
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    if config.smtp.enabled {
        channels.push(Arc::new(EmailChannel::new(
            mailer.clone(),
            config.smtp.from.clone(),
        )));
    }
    if config.push.enabled
        && let (Some(endpoint), Some(api_key)) = (&config.push.endpoint, &config.push.api_key)
    {
        channels.push(Arc::new(PushChannel::new(
            endpoint.clone(),
            api_key.clone(),
        )));
    }
    if config.chat_bot.enabled
        && let (Some(api_url), Some(bot_token)) =
            (&config.chat_bot.api_url, &config.chat_bot.bot_token)
    {
        channels.push(Arc::new(ChatBotChannel::new(
            api_url.clone(),
            bot_token.clone(),
        )));
    }
    if channels.is_empty() {
        tracing::warn!("No notification channel is enabled; deliveries will fail");
    }

    let fanout = Arc::new(FanoutCoordinator::new(
        db.clone(),
        directory.clone(),
        config.tiers.clone(),
    ));

    // Heal the queue before any worker starts claiming
    let report = recovery::reconcile(
        db.as_ref(),
        fanout.as_ref(),
        Duration::from_secs(config.dispatch.stale_claim_secs),
    )
    .await?;
    tracing::info!(
        claims_released = report.claims_released,
        jobs_backfilled = report.jobs_backfilled,
        "startup reconciliation done"
    );

    // Start the poller
    let task_manager = Arc::new(PollTaskManager::new());
    {
        let db = db.clone();
        let fetcher = fetcher.clone();
        let fanout = fanout.clone();
        let task_manager = task_manager.clone();
        let poller_cfg = config.poller.clone();
        tokio::spawn(async move {
            poll_loop(db, fetcher, fanout, task_manager, poller_cfg).await;
        });
    }

    // Start the dispatch workers
    let worker = Arc::new(DispatchWorker::new(
        db.clone(),
        directory.clone(),
        channels,
        config.source_url_base.clone(),
        config.dispatch.clone(),
    ));
    for worker_index in 0..config.dispatch.workers.max(1) {
        let worker = worker.clone();
        tokio::spawn(async move {
            dispatch_loop(worker, worker_index).await;
        });
    }

    // Periodically release claims abandoned by crashed workers
    {
        let db = db.clone();
        let stale = Duration::from_secs(config.dispatch.stale_claim_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(stale);
            loop {
                interval.tick().await;
                if let Err(e) =
                    entrywatch::dispatch::release_stale_claims(db.as_ref(), stale).await
                {
                    tracing::error!(error = ?e, "stale claim release failed");
                }
            }
        });
    }

    let resources = AppResources { db, mailer, config };
    start_webserver(resources).await?;
    Ok(())
}

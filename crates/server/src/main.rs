use std::sync::Arc;

use campaign_engine::AppResources;
use campaign_engine::api::start_webserver;
use campaign_engine::config::load_config_or_panic;
use campaign_engine::dispatch::scheduler::{DispatcherState, run_dispatch_loop};
use lettre::{AsyncSmtpTransport, Tokio1Executor, transport::smtp::authentication::Credentials};
use sea_orm::Database;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "campaign_engine=info,hyper=warn,sea_orm=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install().expect("Failed to install `color_eyre::install`");
    let _ = dotenvy::dotenv();

    initialize_tracing();

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

    let resources = Arc::new(AppResources { db, mailer, config });
    let dispatcher = Arc::new(DispatcherState::new());

    // Start the periodic dispatch loop
    {
        let resources = resources.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            run_dispatch_loop(resources, dispatcher).await;
        });
    }

    start_webserver((*resources).clone(), dispatcher).await?;
    Ok(())
}

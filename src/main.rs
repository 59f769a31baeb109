/// Monalias - Monero alias resolver
///
/// Serves signed `local$domain` -> address resolutions on the public
/// listener and the management API on the admin listener.
use monalias::{config::ServerConfig, context::AppContext, error::MonaliasResult, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> MonaliasResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "monalias=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Print banner
    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start servers
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    __  ___                  ___
   /  |/  /___  ____  ____ _/ (_)___ ______
  / /|_/ / __ \/ __ \/ __ `/ / / __ `/ ___/
 / /  / / /_/ / / / / /_/ / / / /_/ (__  )
/_/  /_/\____/_/ /_/\__,_/_/_/\__,_/____/

        Monero alias resolver v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}

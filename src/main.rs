use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ventra::adapters::health_handler::HealthHandler;
use ventra::agents::llm::HttpAgentProvider;
use ventra::cli::Cli;
use ventra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ventra=info")))
        .init();

    // Load configuration (CLI > env vars > config file)
    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting Ventra agent gateway on {}:{}", host, port);

    let provider = HttpAgentProvider::new(&settings.provider)?;
    info!(base_url = %settings.provider.base_url, "Agent provider configured");

    let gateway = ventra::create_gateway(&settings, Arc::new(provider));
    let health_handler = Arc::new(HealthHandler::new());

    // Create application using the library function
    let app = ventra::create_app(gateway, health_handler, &settings);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

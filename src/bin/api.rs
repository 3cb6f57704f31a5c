use expense_assistant::{
    api::{start_server, ApiState},
    app::AppServices,
    config::AppConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    if let Err(e) = config.validate() {
        eprintln!("⚠️  {}", e);
        eprintln!("📌 Replies will come from the offline model until it is set");
    }

    info!("🚀 Expense Assistant - API Server");
    info!("📍 Port: {}", config.server.port);

    let services = AppServices::from_config(&config).await?;

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    let state = ApiState {
        orchestrator: services.orchestrator,
        reader: services.reader,
        writer: services.writer,
        default_user_id: config.default_user_id,
    };

    start_server(state, config.server.port).await?;

    Ok(())
}

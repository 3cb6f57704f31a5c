use expense_assistant::{
    agent::SessionContext,
    app::AppServices,
    config::AppConfig,
    models::HandlerKind,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = AppConfig::from_env()?;
    let services = AppServices::from_config(&config).await?;

    let session = SessionContext::new(Uuid::new_v4().to_string(), config.default_user_id);
    info!(session_id = %session.session_id, "Expense assistant starting");

    println!("Hello! I'm your expense tracking assistant. How can I help you today?");
    println!("(type 'exit' to quit)\n");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"You: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        let reply = services.orchestrator.submit(input, &session).await;

        let handler = services
            .orchestrator
            .session_state(&session.session_id)
            .await?
            .and_then(|state| state.current_handler);

        println!("Bot [{}]: {}\n", HandlerKind::label(handler), reply);
    }

    println!("Goodbye!");
    Ok(())
}

use std::sync::Arc;

use lab_report_service::{AppState, LlmClient, PostgresReportStore, create_app};
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Check required environment variables
    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENAI_API_KEY environment variable is required");
            std::process::exit(1);
        }
    };
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Error: DATABASE_URL environment variable is required");
            std::process::exit(1);
        }
    };

    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4-turbo".to_string());
    let base_url = std::env::var("OPENAI_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);

    let store = PostgresReportStore::connect(&database_url).await?;
    store.run_migrations().await?;

    let state = AppState {
        store: Arc::new(store),
        llm: Arc::new(LlmClient::openai(api_key, model, base_url)),
    };

    let app = create_app(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let addr = listener.local_addr()?;

    info!("Lab Report Extraction Service starting on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Upload endpoint: POST http://{}/parse-data", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

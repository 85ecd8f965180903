use council_flow::CouncilConfig;
use council_service::create_app;
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

    let config = match CouncilConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let app = create_app(&config).await?;
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Medical Council Service starting on {}", addr);
    info!(provider = ?config.provider, profile = ?config.device_profile, "Oracle configured");
    info!("Health check endpoint: http://{}/health", addr);
    info!("Debate endpoint: POST http://{}/council/debate", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

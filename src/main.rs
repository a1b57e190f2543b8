use agent_bridge::config::Config;

#[rocket::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    tracing::info!(db_path = %config.db_path, files_dir = %config.files_dir, "agent-bridge starting");

    if let Err(e) = agent_bridge::rocket_with_config(config).launch().await {
        tracing::error!(error = %e, "server crashed");
        std::process::exit(1);
    }
}

use clap::Parser;
use placemap_client::{
    app::App,
    config::{CliArgs, ClientConfig},
    telemetry::init_telemetry,
};
use tokio::{io::BufReader, signal};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ClientConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let app = App::new(&config)?;
    let input = BufReader::new(tokio::io::stdin());
    let mut out = tokio::io::stdout();

    let result = tokio::select! {
        result = app.run(config.command.clone(), input, &mut out) => result,
        () = shutdown_signal() => Ok(()),
    };

    providers.shutdown();
    result
}

fn log_startup_info(_config: &ClientConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Starting placemap with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Starting placemap against {} ({:?})",
            _config.api_base_url,
            _config.command
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}

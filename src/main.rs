use clap::Parser;
use relaychat::cli::{Cli, Command};
use relaychat::config::Config;
use relaychat::{client, server::Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Server(args) => {
            // Load configuration
            let config = Config::load(&args)?;
            init_logging(&config.log_level, false);

            info!(
                listen = %config.listen,
                credentials = %config.credentials.display(),
                max_connections = config.max_connections,
                max_message_size = config.max_message_size,
                "Starting relaychat server"
            );

            let server = Server::bind(&config)?;
            server.run().await?;
        }
        Command::Client(args) => {
            init_logging(&args.log_level, true);
            client::run(args).await?;
        }
    }

    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
fn init_logging(level: &str, stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

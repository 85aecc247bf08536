use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Authoritative room server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to, overrides the config file
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on, overrides the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Comma-separated room names, overrides the config file
    #[arg(short, long, value_delimiter = ',')]
    rooms: Option<Vec<String>>,
}

fn load_config(args: &Args) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    if args.host.is_some() || args.port.is_some() {
        let host = match &args.host {
            Some(host) => host.clone(),
            None => config.bind_address.ip().to_string(),
        };
        let port = args.port.unwrap_or(config.bind_address.port());
        config.bind_address = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    }
    if let Some(rooms) = &args.rooms {
        config.rooms = rooms.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Starting server on {}", config.bind_address);
    info!("Rooms: {}", config.rooms.join(", "));

    let server = Server::new(config).await?;
    server
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    Ok(())
}

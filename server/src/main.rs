use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::{NetAddress, DEFAULT_PORT};
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to listen on, with an optional port
    #[clap(short, long, default_value = "0.0.0.0")]
    address: String,
    /// Port used when the address does not include one
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Seconds a person may stay idle before being removed
    #[clap(long, default_value = "300")]
    person_timeout: u64,
    /// Seconds a shout lasts
    #[clap(long, default_value = "10")]
    shout_duration: u64,
    /// Maximum number of simultaneous connections
    #[clap(long, default_value = "1024")]
    max_connections: usize,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            address: NetAddress::parse(&self.address, self.port)?,
            person_timeout: Duration::from_secs(self.person_timeout),
            shout_duration: Duration::from_secs(self.shout_duration),
            max_connections: self.max_connections.max(1),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}

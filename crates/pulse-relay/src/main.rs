//! pulse-relay binary: local development relay for the pulse engine.

use clap::Parser;
use pulse_relay::RelayServer;

#[derive(Parser)]
#[command(name = "pulse-relay", about = "Development pub/sub relay for pulse")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 9470)]
    port: u16,

    /// Require this API key on every connection (rejects with HTTP 403).
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_relay=info".into()),
        )
        .init();

    let args = Args::parse();
    let addr = format!("0.0.0.0:{}", args.port);

    let server = RelayServer::bind(&addr, args.api_key)
        .await
        .expect("failed to bind TCP listener");
    server.run().await;
}

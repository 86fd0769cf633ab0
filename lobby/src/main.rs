use clap::Parser;
use log::info;
use tokio::net::{TcpListener, TcpStream};

use lobby::db::DbClient;
use lobby::server;

/// Lobby service: client sessions, matchmaking and match hand-off.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_LOBBY_PORT)]
    port: u16,

    /// Address of the state service
    #[clap(short, long, default_value = "127.0.0.1:12977")]
    state_addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info");
    }

    let args = Args::parse();

    let state_stream = TcpStream::connect(&args.state_addr).await?;
    info!("connected to state service at {}", args.state_addr);
    let db = DbClient::new(state_stream, format!("db:{}", args.state_addr));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("lobby listening on {}", addr);

    server::run(listener, db, shared::shutdown_signal()).await;
    Ok(())
}

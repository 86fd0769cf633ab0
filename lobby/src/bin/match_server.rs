//! Standalone match runtime, for driving the match protocol without a
//! lobby. Admission uses a fixed token and fixed seat names; the result is
//! reported straight to the state service, best-effort.

use std::net::SocketAddr;

use clap::Parser;
use log::info;
use rand::Rng;
use tokio::net::TcpListener;

use lobby::match_runtime::{run_match, MatchConfig, MatchReporter};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Port to listen on
    #[clap(short, long, default_value = "15234")]
    port: u16,

    /// Admission token expected from every joiner
    #[clap(short, long, default_value = "demo")]
    token: String,

    /// Player one username
    #[clap(long, default_value = "p1")]
    p1: String,

    /// Player two username
    #[clap(long, default_value = "p2")]
    p2: String,

    /// Address of the state service for result reporting
    #[clap(short, long, default_value = "127.0.0.1:12977")]
    state_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
    }

    let args = Args::parse();

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("match server listening on 0.0.0.0:{}", args.port);

    let config = MatchConfig {
        room_id: 0,
        p1: args.p1,
        p2: args.p2,
        token: args.token,
        seed: rand::thread_rng().gen::<u64>(),
    };
    run_match(listener, config, None, MatchReporter::Direct(args.state_addr)).await;
    Ok(())
}

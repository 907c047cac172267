use clap::Parser;
use client::game::SnapshotRetention;
use client::network::{Client, ClientConfig, UpdateMode};
use log::{error, info};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless roster client", long_about = None)]
struct Args {
    /// Server host name or address
    host: String,

    /// Server port
    port: u16,

    /// Report collection progress towards this goal instead of button presses
    #[arg(long)]
    goal: Option<u8>,

    /// Seed for the random input driver
    #[arg(long)]
    seed: Option<u64>,

    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Remember players after they disappear from the roster
    #[arg(long)]
    keep_all: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for roster updates");
    }

    let args = Args::parse();

    let config = ClientConfig {
        mode: args
            .goal
            .map_or(UpdateMode::Buttons, |goal| UpdateMode::Progress { goal }),
        retention: if args.keep_all {
            SnapshotRetention::KeepAll
        } else {
            SnapshotRetention::PruneAbsent
        },
        seed: args.seed,
        max_frames: args.frames,
        ..Default::default()
    };

    info!("Connecting to {}:{}", args.host, args.port);
    let mut client = match Client::connect((args.host.as_str(), args.port), config.retention).await {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match client.run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

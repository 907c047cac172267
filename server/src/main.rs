use clap::Parser;
use log::error;
use server::network::{Server, ServerConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative roster server")]
struct Args {
    /// Port to listen on
    port: u16,
}

/// Parses the port, then runs the tick loop on a single thread until the
/// process is terminated.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version land here too and are not failures
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
    let mut server = match Server::bind(addr, ServerConfig::default()).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    server.run().await;
    ExitCode::SUCCESS
}

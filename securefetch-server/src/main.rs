use clap::Parser;
use securefetch_server::cli::{init_tracing, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = cli.run().await {
        tracing::error!(error = %e, "server failed");
        eprintln!("securefetch-server: {:#}", e);
        std::process::exit(1);
    }
}

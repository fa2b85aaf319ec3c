use clap::Parser;
use securefetch_client::cli::{init_tracing, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = cli.run().await {
        eprintln!("securefetch-client: {:#}", e);
        std::process::exit(1);
    }
}

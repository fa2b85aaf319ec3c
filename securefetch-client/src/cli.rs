//! Interactive securefetch client

use crate::client::{connect, Client};
use crate::config::ClientConfig;
use crate::prompt::{ask, ask_password, MenuChoice, MENU_PROMPT};
use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use securefetch_core::{AuthStatus, Error};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// securefetch client - list and download files from a securefetch server
#[derive(Parser, Debug)]
#[command(name = "securefetch-client")]
pub struct Cli {
    /// Server address as host[:port]
    #[arg(value_name = "HOST[:PORT]")]
    pub address: String,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = ClientConfig::from_environment()?
            .with_address(&self.address)
            .context("usage: securefetch-client <host>[:<port>]")?;

        let mut client = connect(&config)
            .await
            .with_context(|| format!("could not connect to {}:{}", config.host, config.port))?;
        println!("Established TLS session to '{}' on port {}", config.host, config.port);

        login(&mut client).await?;
        command_loop(client, &config).await?;

        println!("Terminated TLS session with server '{}'", config.host);
        Ok(())
    }
}

async fn login<S>(client: &mut Client<S>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(username) = ask("Enter username: ").await? else {
            bail!("no username given");
        };
        let password = ask_password("Enter password: ").await?;

        match client.authenticate(username.trim(), &password).await {
            Ok(AuthStatus::Accepted) => return Ok(()),
            Ok(AuthStatus::Rejected { remaining: 0 }) => bail!("authentication failed"),
            Ok(AuthStatus::Rejected { remaining }) => {
                eprintln!("Login incorrect ({} attempts remaining)", remaining);
            }
            Err(Error::Auth(reason)) => eprintln!("{}", reason),
            Err(e) => return Err(e.into()),
        }
    }
}

async fn command_loop<S>(mut client: Client<S>, config: &ClientConfig) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(line) = ask(MENU_PROMPT).await? else {
            return Ok(client.exit().await?);
        };

        match MenuChoice::parse(&line) {
            Some(MenuChoice::List) => match client.list().await {
                Ok(entries) => {
                    println!("Available files:");
                    for entry in entries {
                        match entry.size {
                            Some(size) => println!("  {:<40} {:>12}", entry.name, size),
                            None => println!("  {:<40} {:>12}", format!("{}/", entry.name), "<dir>"),
                        }
                    }
                }
                Err(e) => report(e)?,
            },
            Some(MenuChoice::Download) => {
                let Some(name) = ask("File name: ").await? else {
                    continue;
                };
                let progress = spinner(&name);
                let result = client
                    .download(&name, &config.download_dir, |n| progress.inc(n))
                    .await;
                progress.finish_and_clear();

                match result {
                    Ok((path, state)) => println!(
                        "Successfully transferred file '{}' ({} bytes) to {}",
                        name,
                        state.bytes_transferred(),
                        path.display()
                    ),
                    Err(e) => report(e)?,
                }
            }
            Some(MenuChoice::Exit) => return Ok(client.exit().await?),
            None => eprintln!("Unrecognized choice {:?}", line.trim()),
        }
    }
}

/// Print a recoverable error; fatal ones end the session
fn report(error: Error) -> anyhow::Result<()> {
    if error.is_fatal() {
        return Err(error.into());
    }
    match &error {
        Error::Rpc(code) => eprintln!("Bad request: {}", code),
        Error::RemoteFile(_) => eprintln!("Could not retrieve file: {}", error),
        other => eprintln!("{}", other),
    }
    Ok(())
}

fn spinner(name: &str) -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.set_message(format!("Downloading {}", name));
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Install the fmt subscriber; `RUST_LOG` overrides the `warn` default
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

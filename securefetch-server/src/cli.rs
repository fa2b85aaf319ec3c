use crate::config::ServerConfig;
use crate::server::Server;
use clap::Parser;

/// securefetch server - authenticated file listing and download over TLS
#[derive(Parser, Debug)]
#[command(name = "securefetch-server")]
pub struct Cli {
    /// TCP port to listen on (defaults to the configured port, 4433)
    pub port: Option<u16>,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let mut config = ServerConfig::from_environment()?;
        if let Some(port) = self.port {
            config.port = port;
        }
        tracing::debug!(?config, "loaded configuration");

        Server::new(config)?.run().await?;
        Ok(())
    }
}

/// Install the fmt subscriber; `RUST_LOG` overrides the `info` default
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_is_optional() {
        assert_eq!(Cli::try_parse_from(["securefetch-server"]).unwrap().port, None);
        assert_eq!(
            Cli::try_parse_from(["securefetch-server", "5000"]).unwrap().port,
            Some(5000)
        );
    }

    #[test]
    fn test_rejects_extra_and_invalid_arguments() {
        assert!(Cli::try_parse_from(["securefetch-server", "5000", "6000"]).is_err());
        assert!(Cli::try_parse_from(["securefetch-server", "not-a-port"]).is_err());
        assert!(Cli::try_parse_from(["securefetch-server", "--verbose"]).is_err());
        assert!(Cli::try_parse_from(["securefetch-server", "--version"]).is_err());
        assert!(Cli::try_parse_from(["securefetch-server", "-V"]).is_err());
    }
}

//! CLI command implementations

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use tracing::info;
use undertow_core::probe::probe_source;
use undertow_core::session::{ConnectionParams, SessionError, StreamSource};
use undertow_core::tools::FfmpegTools;
use undertow_core::{UndertowConfig, UndertowError};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Directory with the player's static files
        #[arg(long)]
        public_dir: Option<PathBuf>,
        /// Transcoder binary
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
        /// Prober binary
        #[arg(long)]
        ffprobe: Option<PathBuf>,
    },
    /// Print the codecs detected in a source
    Probe {
        /// http(s) URL of the media
        source: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            public_dir,
            ffmpeg,
            ffprobe,
        } => {
            let mut config = UndertowConfig::from_env();
            config.server.bind_addr = listen_addr(&host, port).map_err(report)?;
            if let Some(dir) = public_dir {
                config.server.public_dir = dir;
            }
            if let Some(path) = ffmpeg {
                config.tools.ffmpeg_path = path;
            }
            if let Some(path) = ffprobe {
                config.tools.ffprobe_path = path;
            }
            serve(config).await
        }
        Commands::Probe { source } => probe(source).await.map_err(report),
    }
}

/// Converts a core error for display, leading with the user-facing message.
fn report(error: UndertowError) -> anyhow::Error {
    let message = error.user_message();
    if error.is_user_error() {
        anyhow::anyhow!(message)
    } else {
        anyhow::Error::new(error).context(message)
    }
}

fn listen_addr(host: &str, port: u16) -> undertow_core::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| UndertowError::Configuration {
            reason: format!("invalid listen address {host}:{port}: {e}"),
        })
}

async fn serve(config: UndertowConfig) -> anyhow::Result<()> {
    let tools = FfmpegTools::new(&config.tools, &config.probe);
    tools
        .verify_installation()
        .await
        .map_err(|e| report(e.into()))?;

    info!("Starting Undertow relay on {}", config.server.bind_addr);
    undertow_web::run_server(config, Arc::new(tools)).await?;
    Ok(())
}

async fn probe(source: String) -> undertow_core::Result<()> {
    let params = ConnectionParams {
        mode: None,
        src: Some(source),
    };
    let url = match StreamSource::from_params(&params).map_err(SessionError::from)? {
        StreamSource::Url(url) => url,
        StreamSource::Upload => {
            return Err(UndertowError::Configuration {
                reason: "probe needs a URL source".to_string(),
            });
        }
    };

    let config = UndertowConfig::from_env();
    let tools = FfmpegTools::new(&config.tools, &config.probe);
    let codecs = probe_source(&tools, &config.probe, url.as_str()).await?;

    let json = serde_json::to_string_pretty(&codecs).map_err(std::io::Error::from)?;
    println!("{json}");
    Ok(())
}

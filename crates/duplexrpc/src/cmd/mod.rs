use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use duplexrpc_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};
use duplexrpc_peer::{DuplexConfig, HandshakeConfig};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and serve the built-in Echo service on each.
    Serve(ServeArgs),
    /// Dial a peer, call one method and print the result.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Wire format of the tagged frames.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum FrameModeArg {
    /// `[tag][payload]`, one transport read per frame.
    Preserved,
    /// `[tag][u32 LE length][payload]`.
    LengthPrefixed,
}

/// Connection settings shared by `serve` and `call`. Both ends must agree.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Frame wire format.
    #[arg(long, value_enum, default_value_t = FrameModeArg::LengthPrefixed)]
    pub frame_mode: FrameModeArg,
    /// Largest payload carried by one frame, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
    /// Exchange roles with the peer before multiplexing.
    #[arg(long)]
    pub handshake: bool,
    /// Handshake timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
}

impl ConnectionArgs {
    pub fn duplex_config(&self) -> CliResult<DuplexConfig> {
        if self.max_payload == 0 {
            return Err(CliError::new(USAGE, "--max-payload must be greater than zero"));
        }

        let frame = match self.frame_mode {
            FrameModeArg::Preserved => {
                tracing::warn!("preserved framing relies on the socket keeping write boundaries");
                FrameConfig::preserved()
            }
            FrameModeArg::LengthPrefixed => FrameConfig::length_prefixed(),
        }
        .with_max_payload_size(self.max_payload);

        let mut config = DuplexConfig::default().with_frame(frame);
        if self.handshake {
            let timeout = parse_duration(&self.handshake_timeout)?;
            config = config.with_handshake(HandshakeConfig::default().with_timeout(timeout));
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Stop after serving N connections.
    #[arg(long)]
    pub max_connections: Option<u64>,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Method to call, as `Service.Method`.
    pub method: String,
    /// JSON parameters.
    #[arg(long)]
    pub json: Option<String>,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

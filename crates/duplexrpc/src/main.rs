mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "duplexrpc", version, about = "Full-duplex RPC over one connection")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "DUPLEXRPC_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::FrameModeArg;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "duplexrpc",
            "call",
            "/tmp/test.sock",
            "Echo.Echo",
            "--json",
            r#"{"name":"Anto"}"#,
        ])
        .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.method, "Echo.Echo");
                assert_eq!(args.json.as_deref(), Some(r#"{"name":"Anto"}"#));
                assert!(matches!(args.connection.frame_mode, FrameModeArg::LengthPrefixed));
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parses_serve_with_connection_flags() {
        let cli = Cli::try_parse_from([
            "duplexrpc",
            "serve",
            "/tmp/test.sock",
            "--frame-mode",
            "preserved",
            "--handshake",
            "--max-connections",
            "2",
        ])
        .expect("serve args should parse");

        match cli.command {
            Command::Serve(args) => {
                assert!(args.connection.handshake);
                assert!(matches!(args.connection.frame_mode, FrameModeArg::Preserved));
                assert_eq!(args.max_connections, Some(2));
            }
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn call_requires_method() {
        let err = Cli::try_parse_from(["duplexrpc", "call", "/tmp/test.sock"])
            .expect_err("missing method should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}

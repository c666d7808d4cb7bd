use std::time::Instant;

use duplexrpc_peer::connect_with_config;
use duplexrpc_transport::Connection;
use serde_json::Value;

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{duplex_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_call, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    validate_method(&args.method)?;
    let params = resolve_params(args.json.as_deref())?;
    let timeout = parse_duration(&args.timeout)?;
    let config = args
        .connection
        .duplex_config()?
        .with_call_timeout(timeout);

    let duplex =
        connect_with_config(&args.path, config).map_err(|err| duplex_error("connect failed", err))?;
    let peer = duplex.server_slot().peer_addr();

    let started = Instant::now();
    let result = duplex.call_value(&args.method, params);
    let elapsed_ms = started.elapsed().as_millis();
    if let Err(err) = duplex.close() {
        tracing::debug!(error = %err, "close failed");
    }

    let result = result.map_err(|err| duplex_error("call failed", err))?;
    print_call(&args.method, &result, elapsed_ms, peer.as_deref(), format);
    Ok(SUCCESS)
}

fn resolve_params(json: Option<&str>) -> CliResult<Value> {
    match json {
        Some(text) => serde_json::from_str(text)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}"))),
        None => Ok(Value::Null),
    }
}

fn validate_method(method: &str) -> CliResult<()> {
    match method.rsplit_once('.') {
        Some((service, name)) if !service.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(CliError::new(
            USAGE,
            format!("method '{method}' must look like 'Service.Method'"),
        )),
    }
}

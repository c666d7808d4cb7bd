use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CallOutput<'a> {
    method: &'a str,
    result: &'a Value,
    elapsed_ms: u128,
    peer: Option<&'a str>,
}

/// Print the result of one call.
pub fn print_call(
    method: &str,
    result: &Value,
    elapsed_ms: u128,
    peer: Option<&str>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                method,
                result,
                elapsed_ms,
                peer,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "ELAPSED", "PEER", "RESULT"])
                .add_row(vec![
                    method.to_string(),
                    format!("{elapsed_ms}ms"),
                    peer.unwrap_or("-").to_string(),
                    result_preview(result),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "method={method} elapsed={elapsed_ms}ms peer={}",
                peer.unwrap_or("-")
            );
            println!(
                "{}",
                serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
            );
        }
    }
}

fn result_preview(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

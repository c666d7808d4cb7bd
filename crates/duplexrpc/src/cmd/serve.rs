use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use duplexrpc_peer::{Duplex, DuplexError, DuplexListener, FnService, ServiceBuilder};
use duplexrpc_transport::UnixDomainSocket;
use serde_json::Value;

use crate::cmd::ServeArgs;
use crate::exit::{duplex_error, CliError, CliResult, SUCCESS};
use crate::output::OutputFormat;

/// The service every accepted peer can call.
pub fn echo_service() -> FnService {
    ServiceBuilder::new("Echo")
        .method("Echo", |params: Value| Ok::<_, String>(params))
        .method("Ping", |_: Value| Ok::<_, String>("pong"))
        .method("Fail", |params: Value| {
            let message = params
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| "requested failure".to_string());
            Err::<Value, _>(message)
        })
        .build()
}

struct Session {
    duplex: Arc<Duplex>,
    serving: JoinHandle<Result<(), DuplexError>>,
}

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let config = args.connection.duplex_config()?;
    let listener = DuplexListener::bind(&args.path)
        .map_err(|err| duplex_error("bind failed", err))?
        .with_config(config);
    tracing::info!(path = %listener.path().display(), "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), listener.path())?;

    let mut sessions: Vec<Session> = Vec::new();
    while running.load(Ordering::SeqCst) {
        if let Some(max) = args.max_connections {
            if listener.accepted() >= max {
                break;
            }
        }

        let accepted = listener.accept();
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let duplex = match accepted {
            Ok(duplex) => Arc::new(duplex),
            Err(err @ (DuplexError::HandshakeFailed(_) | DuplexError::Timeout(_))) => {
                tracing::warn!(error = %err, "rejected peer");
                continue;
            }
            Err(err) => return Err(duplex_error("accept failed", err)),
        };

        duplex
            .register(echo_service())
            .map_err(|err| duplex_error("register failed", err))?;
        let serving = duplex.spawn_serve().map_err(|err| {
            CliError::new(
                crate::exit::INTERNAL,
                format!("serve thread failed to start: {err}"),
            )
        })?;
        tracing::info!(connection = listener.accepted(), "peer connected");

        sessions.retain(|session| !session.serving.is_finished());
        sessions.push(Session { duplex, serving });
    }

    let interrupted = !running.load(Ordering::SeqCst);
    tracing::info!(open = sessions.len(), interrupted, "shutting down");
    for session in sessions {
        finish(session, interrupted);
    }
    Ok(SUCCESS)
}

/// Close the session when interrupted, otherwise wait for the peer to
/// hang up.
fn finish(session: Session, interrupted: bool) {
    let Session { duplex, serving } = session;
    if interrupted {
        if let Err(err) = duplex.close() {
            tracing::debug!(error = %err, "close failed");
        }
    }
    match serving.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "serve ended with error"),
        Err(_) => tracing::warn!("serve thread panicked"),
    }
}

/// Ctrl-C clears `running` and pokes the listener so a blocked `accept`
/// returns.
fn install_ctrlc_handler(running: Arc<AtomicBool>, path: &Path) -> CliResult<()> {
    let path = path.to_path_buf();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        let _ = UnixDomainSocket::connect(&path);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

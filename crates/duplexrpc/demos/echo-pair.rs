//! Two duplex peers over an in-process pipe, each calling the other.
//!
//! Run with:
//!   cargo run -p duplexrpc --example echo-pair

use std::sync::Arc;

use duplexrpc::peer::{Duplex, ServiceBuilder};
use duplexrpc::transport::pipe;
use serde_json::{json, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (left, right) = pipe();
    let a = Arc::new(Duplex::new(left, true)?);
    let b = Arc::new(Duplex::new(right, false)?);

    a.register(
        ServiceBuilder::new("API")
            .method("Echo", |value: Value| Ok::<_, String>(value))
            .build(),
    )?;
    b.register(
        ServiceBuilder::new("Clock")
            .method("Role", |_: Value| Ok::<_, String>("responder"))
            .build(),
    )?;
    let serve_a = a.spawn_serve()?;
    let serve_b = b.spawn_serve()?;

    let echoed = b.call_value("API.Echo", json!({ "name": "Anto" }))?;
    eprintln!("responder got back {echoed}");

    let role = a.call_value("Clock.Role", Value::Null)?;
    eprintln!("initiator asked the responder its role: {role}");

    a.close()?;
    let _ = serve_a.join();
    let _ = serve_b.join();
    Ok(())
}

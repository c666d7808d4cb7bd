use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;

use duplexrpc_transport::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{DuplexError, Result};
use crate::message::{read_message, write_message, Request, Response};

/// A named set of methods callable as `Service.Method`.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke `method` with JSON `params`.
    ///
    /// Unknown methods should return [`DuplexError::UnknownMethod`]; any error
    /// is sent back to the caller as a string.
    fn call(&self, method: &str, params: Value) -> Result<Value>;
}

type Handler = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Builds a [`FnService`] from typed closures.
///
/// ```
/// use duplexrpc_peer::ServiceBuilder;
///
/// let service = ServiceBuilder::new("Math")
///     .method("Double", |n: i64| Ok::<_, String>(n * 2))
///     .build();
/// ```
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Handler>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Add a method. `params` are decoded into `Req`; the returned `Resp` is
    /// encoded as the result, an `Err(String)` becomes the remote error.
    pub fn method<Req, Resp, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req) -> std::result::Result<Resp, String> + Send + Sync + 'static,
    {
        let name = name.into();
        let method = name.clone();
        let handler: Handler = Box::new(move |params: Value| {
            let request: Req = serde_json::from_value(params).map_err(|err| {
                DuplexError::Remote(format!("invalid params for '{method}': {err}"))
            })?;
            let response = f(request).map_err(DuplexError::Remote)?;
            Ok(serde_json::to_value(response)?)
        });
        self.methods.insert(name, handler);
        self
    }

    pub fn build(self) -> FnService {
        FnService {
            name: self.name,
            methods: self.methods,
        }
    }
}

/// A [`Service`] backed by closures, see [`ServiceBuilder`].
pub struct FnService {
    name: String,
    methods: HashMap<String, Handler>,
}

impl FnService {
    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Service for FnService {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| DuplexError::UnknownMethod(format!("{}.{}", self.name, method)))?;
        handler(params)
    }
}

impl fmt::Debug for FnService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnService")
            .field("name", &self.name)
            .field("methods", &self.methods())
            .finish()
    }
}

/// Requests [`RpcServer::serve_conn`] runs at once unless configured.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Dispatches requests to registered services.
pub struct RpcServer {
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
    max_in_flight: usize,
}

impl Default for RpcServer {
    fn default() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the requests handled concurrently by one `serve_conn`. Once
    /// reached, no further request is read until one finishes. Minimum 1.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Register a service under its [`Service::name`].
    pub fn register<S: Service + 'static>(&self, service: S) -> Result<()> {
        let name = service.name().to_string();
        if name.is_empty() || name.contains('.') {
            return Err(DuplexError::InvalidMethodName(name));
        }

        let mut services = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if services.contains_key(&name) {
            return Err(DuplexError::DuplicateService(name));
        }
        debug!(service = %name, "service registered");
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let services = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Run one request. Failures become error responses.
    pub fn dispatch(&self, request: Request) -> Response {
        let id = request.id;
        match self.invoke(&request.method, request.params) {
            Ok(result) => Response::ok(id, result),
            Err(DuplexError::Remote(message)) => Response::err(id, message),
            Err(err) => Response::err(id, err.to_string()),
        }
    }

    fn invoke(&self, method: &str, params: Value) -> Result<Value> {
        let (service_name, method_name) = method
            .rsplit_once('.')
            .filter(|(service, method)| !service.is_empty() && !method.is_empty())
            .ok_or_else(|| DuplexError::InvalidMethodName(method.to_string()))?;

        let service = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(service_name)
            .cloned()
            .ok_or_else(|| DuplexError::UnknownService(service_name.to_string()))?;

        service.call(method_name, params)
    }

    /// Serve requests read from `conn` until it reaches end-of-stream.
    ///
    /// Each request runs on its own thread so a slow method does not hold up
    /// the ones behind it; responses may therefore leave out of order. At
    /// most [`max_in_flight`](Self::max_in_flight) requests run at once.
    /// Returns once every in-flight request has answered.
    pub fn serve_conn(&self, conn: &dyn Connection) -> Result<()> {
        let write_lock = Mutex::new(());
        let slots = InFlight::new(self.max_in_flight);

        thread::scope(|scope| loop {
            slots.acquire();
            let request: Request = match read_message(conn) {
                Ok(Some(request)) => request,
                Ok(None) | Err(DuplexError::ConnectionClosed) => {
                    debug!("request stream ended");
                    return Ok(());
                }
                Err(DuplexError::Json(err)) => {
                    warn!(error = %err, "discarding malformed request");
                    slots.release();
                    continue;
                }
                Err(err) => return Err(err),
            };

            trace!(id = request.id, method = %request.method, "request received");
            let write_lock = &write_lock;
            let slots = &slots;
            let work = move || {
                let _slot = SlotGuard(slots);
                let response = self.dispatch(request);
                let _guard = write_lock
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(err) = write_message(conn, &response) {
                    debug!(id = response.id, error = %err, "failed to send response");
                }
            };

            let spawned = thread::Builder::new()
                .name("duplexrpc-request".to_string())
                .spawn_scoped(scope, work.clone());
            if let Err(err) = spawned {
                warn!(error = %err, "request thread unavailable, running inline");
                work();
            }
        })
    }
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("services", &self.services())
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

/// Counting semaphore over the requests of one `serve_conn`.
struct InFlight {
    running: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

impl InFlight {
    fn new(limit: usize) -> Self {
        Self {
            running: Mutex::new(0),
            freed: Condvar::new(),
            limit,
        }
    }

    fn acquire(&self) {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *running >= self.limit {
            running = self
                .freed
                .wait(running)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *running += 1;
    }

    fn release(&self) {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *running = running.saturating_sub(1);
        self.freed.notify_one();
    }
}

/// Releases a slot when the request finishes, including by panic.
struct SlotGuard<'a>(&'a InFlight);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

//! App — the method registry.
//!
//! A thread-safe `method → handler` map. Handlers live behind `Arc` so an
//! in-flight invocation keeps its handler alive across a concurrent
//! `register`/`unregister`; the lock is only held for the map operation,
//! never across a handler call.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};
use wsrpc_protocol::{error, quoted, Packet};

/// What a handler returns: a result packet, or an error string surfaced
/// verbatim in the response `error` field.
pub type HandlerResult = Result<Packet, String>;

/// A method handler. Takes the raw params fragment, never a re-parsed
/// value. Captured state may own unique resources; shared access is the
/// registry's concern.
pub type Handler = Box<dyn Fn(&str) -> HandlerResult + Send + Sync>;

/// Produces a fresh [`App`] per connection. Specialized apps pre-register
/// their methods inside the factory closure.
pub type AppFactory = Arc<dyn Fn() -> App + Send + Sync>;

/// A container of named method handlers; one instance per connection.
pub struct App {
    registry: RwLock<HashMap<String, Arc<Handler>>>,
}

impl Default for App {
    fn default() -> Self {
        info!("App created");
        let app = Self {
            registry: RwLock::new(HashMap::new()),
        };
        app.register("echo", |params| Ok(Packet::new(params, Vec::new())));
        app
    }
}

impl App {
    /// Insert or replace the handler for `method`. An invocation already
    /// running against the old handler completes with it; new
    /// invocations see the replacement.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&str) -> HandlerResult + Send + Sync + 'static,
    {
        let method = method.into();
        info!("Registering method: {method}");
        self.registry
            .write()
            .insert(method, Arc::new(Box::new(handler)));
    }

    /// Remove the handler for `method`. In-flight invocations complete
    /// unaffected.
    pub fn unregister(&self, method: &str) {
        info!("Unregistering method: {method}");
        self.registry.write().remove(method);
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.registry.read().contains_key(method)
    }

    /// Look up `method` and invoke its handler with `params`.
    ///
    /// The handler `Arc` is cloned out under a read lock and invoked
    /// outside it, so registry mutations cannot block a call in progress
    /// nor free a handler before it returns. A panicking handler is
    /// caught, logged, and mapped to `Internal Error : "<method>"`.
    pub fn dispatch(&self, method: &str, params: &str) -> HandlerResult {
        let handler = {
            let registry = self.registry.read();
            match registry.get(method) {
                Some(handler) => handler.clone(),
                None => return Err(error::format(error::METHOD_UNAVAIABLE, quoted(method))),
            }
        };
        match panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
            Ok(result) => result,
            Err(cause) => {
                let what = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown type".to_owned());
                error!("Uncaught panic in {method}: {what}");
                Err(error::format(error::INTERNAL_ERROR, quoted(method)))
            }
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        info!("App destroyed");
    }
}

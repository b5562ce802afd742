//! Inbound message dispatch.
//!
//! Handlers form an observer chain. For each envelope the dispatcher offers
//! the `kind` key first, then `channel:<channel>` when the envelope carries a
//! channel. A handler that fails or panics is logged and skipped; the rest
//! of the chain still runs.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};
use tradelink_core::MessageEnvelope;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Observer of inbound envelopes.
#[cfg_attr(test, mockall::automock)]
pub trait MessageHandler: Send + Sync {
    /// Whether this handler wants envelopes routed under `key`.
    fn can_handle(&self, key: &str) -> bool;

    fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError>;
}

/// Closure registered for one exact key.
struct KeyedHandler<F> {
    key: String,
    callback: F,
}

impl<F> MessageHandler for KeyedHandler<F>
where
    F: Fn(&MessageEnvelope) -> Result<(), HandlerError> + Send + Sync,
{
    fn can_handle(&self, key: &str) -> bool {
        self.key == key
    }

    fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError> {
        (self.callback)(envelope)
    }
}

/// Handle for removing a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct Dispatcher {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(HandlerId, Arc<dyn MessageHandler>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: Arc<dyn MessageHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    /// Register `callback` for envelopes routed under `key`
    /// (a message kind, or `channel:<name>`).
    pub fn on<F>(&self, key: impl Into<String>, callback: F) -> HandlerId
    where
        F: Fn(&MessageEnvelope) + Send + Sync + 'static,
    {
        self.try_on(key, move |envelope: &MessageEnvelope| -> Result<(), HandlerError> {
            callback(envelope);
            Ok(())
        })
    }

    /// Like [`on`](Self::on) for callbacks that report failure. An `Err` is
    /// logged and skipped without relying on unwinding.
    pub fn try_on<F>(&self, key: impl Into<String>, callback: F) -> HandlerId
    where
        F: Fn(&MessageEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.add(Arc::new(KeyedHandler {
            key: key.into(),
            callback,
        }))
    }

    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        before != handlers.len()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Deliver `envelope` to every matching handler. Returns the number of
    /// handlers that completed successfully.
    pub fn dispatch(&self, envelope: &MessageEnvelope) -> usize {
        // Snapshot so handlers may register or remove others.
        let handlers: Vec<_> = self.handlers.read().iter().map(|(_, h)| h.clone()).collect();

        let mut keys = vec![envelope.kind.clone()];
        if let Some(channel_key) = envelope.channel_key() {
            keys.push(channel_key);
        }

        let mut delivered = 0;
        for key in &keys {
            for handler in handlers.iter().filter(|h| h.can_handle(key)) {
                match catch_unwind(AssertUnwindSafe(|| handler.handle(envelope))) {
                    Ok(Ok(())) => delivered += 1,
                    Ok(Err(e)) => {
                        error!(key = %key, id = %envelope.id, error = %e, "Message handler failed");
                    }
                    Err(_) => {
                        error!(key = %key, id = %envelope.id, "Message handler panicked");
                    }
                }
            }
        }
        trace!(kind = %envelope.kind, delivered, "Dispatched message");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn trade_opened() -> MessageEnvelope {
        MessageEnvelope::new("TRADE_OPENED", json!({"id": "1"})).with_channel("trading")
    }

    #[test]
    fn test_dispatch_by_kind_then_channel() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        dispatcher.on("channel:trading", move |env| {
            s.lock().push(format!("channel:{}", env.data["id"]));
        });
        let s = seen.clone();
        dispatcher.on("TRADE_OPENED", move |env| {
            s.lock().push(format!("kind:{}", env.data["id"]));
        });
        dispatcher.on("OTHER", |_| panic!("must not be called"));

        assert_eq!(dispatcher.dispatch(&trade_opened()), 2);
        assert_eq!(
            *seen.lock(),
            vec!["kind:\"1\"".to_string(), "channel:\"1\"".to_string()]
        );
    }

    #[test]
    fn test_failing_handler_isolated() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(Mutex::new(0));

        dispatcher.on("TRADE_OPENED", |_| panic!("bad consumer"));
        let mut failing = MockMessageHandler::new();
        failing.expect_can_handle().returning(|key| key == "TRADE_OPENED");
        failing
            .expect_handle()
            .times(1)
            .returning(|_| Err("handler error".into()));
        dispatcher.add(Arc::new(failing));
        let c = calls.clone();
        dispatcher.on("TRADE_OPENED", move |_| *c.lock() += 1);

        assert_eq!(dispatcher.dispatch(&trade_opened()), 1);
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_try_on_error_isolated() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(Mutex::new(0));

        dispatcher.try_on("TRADE_OPENED", |_| Err("bad consumer".into()));
        let c = calls.clone();
        dispatcher.try_on("channel:trading", move |_| {
            *c.lock() += 1;
            Ok(())
        });

        assert_eq!(dispatcher.dispatch(&trade_opened()), 1);
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_off_removes_handler() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(Mutex::new(0));

        let c = calls.clone();
        let id = dispatcher.on("TRADE_OPENED", move |_| *c.lock() += 1);
        dispatcher.dispatch(&trade_opened());

        assert!(dispatcher.off(id));
        assert!(!dispatcher.off(id));
        dispatcher.dispatch(&trade_opened());
        assert_eq!(*calls.lock(), 1);

        dispatcher.on("x", |_| {});
        dispatcher.clear();
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_envelope_without_channel_only_kind() {
        let dispatcher = Dispatcher::new();
        let mut handler = MockMessageHandler::new();
        handler
            .expect_can_handle()
            .times(1)
            .returning(|key| key == "PRICE");
        handler.expect_handle().times(1).returning(|_| Ok(()));
        dispatcher.add(Arc::new(handler));

        let env = MessageEnvelope::new("PRICE", json!({"px": 1}));
        assert_eq!(dispatcher.dispatch(&env), 1);
    }
}

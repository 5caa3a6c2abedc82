// =============================================================================
// future.rs — per-request correlation: ResponseFuture + FutureRegistry
// =============================================================================
//
// One ResponseFuture per outstanding request. The terminal transition is a
// single compare-and-set from Pending, so under a fulfill/cancel/timeout race
// exactly one path wins, delivers (or drops) the result, and runs the
// registry-removal finalizer exactly once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::NetError;
use crate::host::Host;
use crate::packet::{Packet, RequestId};

const PENDING: u8 = 0;
const FULFILLED: u8 = 1;
const CANCELLED: u8 = 2;
const TIMED_OUT: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Fulfilled,
    Cancelled,
    TimedOut,
}

type Finalizer = Box<dyn Fn(RequestId) + Send + Sync>;

/// A single-result handle for one outstanding request.
pub struct ResponseFuture {
    request_id: RequestId,
    actor: Host,
    request: Packet,
    state: AtomicU8,
    result_tx: Mutex<Option<oneshot::Sender<Packet>>>,
    result_rx: Mutex<Option<oneshot::Receiver<Packet>>>,
    finalizer: Finalizer,
}

// The finalizer and channel slots carry no useful state to print.
impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("request_id", &self.request_id)
            .field("actor", &self.actor)
            .field("state", &self.state())
            .finish()
    }
}

impl ResponseFuture {
    fn new(request_id: RequestId, actor: Host, request: Packet, finalizer: Finalizer) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(ResponseFuture {
            request_id,
            actor,
            request,
            state: AtomicU8::new(PENDING),
            result_tx: Mutex::new(Some(tx)),
            result_rx: Mutex::new(Some(rx)),
            finalizer,
        })
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The destination host this future expects a response from.
    pub fn actor(&self) -> &Host {
        &self.actor
    }

    /// The original request packet.
    pub fn request(&self) -> &Packet {
        &self.request
    }

    pub fn state(&self) -> FutureState {
        match self.state.load(Ordering::Acquire) {
            FULFILLED => FutureState::Fulfilled,
            CANCELLED => FutureState::Cancelled,
            TIMED_OUT => FutureState::TimedOut,
            _ => FutureState::Pending,
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Deliver the response. Returns false when the future is already
    /// terminal (duplicate response, or a response racing a cancel/timeout);
    /// the packet is then dropped by the caller.
    pub(crate) fn set_result(&self, packet: Packet) -> bool {
        if !self.transition(FULFILLED) {
            return false;
        }
        if let Some(tx) = self.result_tx.lock().take() {
            // The waiter may have given up at its own deadline already;
            // a failed send is a drop, not an error.
            let _ = tx.send(packet);
        }
        (self.finalizer)(self.request_id);
        true
    }

    /// Cancel the future: transport shutdown, explicit cancel, or a send
    /// failure. Idempotent; loses cleanly against a concurrent fulfill.
    pub fn cancel(&self) {
        if !self.transition(CANCELLED) {
            return;
        }
        // Dropping the sender wakes the waiter with a cancellation.
        self.result_tx.lock().take();
        (self.finalizer)(self.request_id);
    }

    fn time_out(&self) {
        if !self.transition(TIMED_OUT) {
            return;
        }
        self.result_tx.lock().take();
        (self.finalizer)(self.request_id);
    }

    /// Block until fulfillment, cancellation, or the supplied deadline.
    /// The result is delivered to exactly one waiter; a second caller gets
    /// `ChannelClosed`.
    pub async fn get_result(&self, timeout: Duration) -> Result<Packet, NetError> {
        let rx = self.result_rx.lock().take().ok_or(NetError::ChannelClosed)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(packet)) => Ok(packet),
            Ok(Err(_)) => Err(NetError::Cancelled),
            Err(_) => {
                self.time_out();
                Err(NetError::Timeout(timeout))
            }
        }
    }
}

/// RequestId -> ResponseFuture map. Entries are removed only by the owning
/// future's finalizer, never by a second cleanup path, so the map can never
/// double-account a request.
pub struct FutureRegistry {
    inner: Mutex<HashMap<RequestId, Arc<ResponseFuture>>>,
    weak_self: Weak<FutureRegistry>,
}

impl FutureRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| FutureRegistry {
            inner: Mutex::new(HashMap::new()),
            weak_self: weak_self.clone(),
        })
    }

    /// Register a new future for an outbound request. The finalizer holds a
    /// weak reference back to the registry, so a future outliving its
    /// transport finalizes without touching a dead map.
    pub fn create(&self, request_id: RequestId, actor: Host, request: Packet) -> Arc<ResponseFuture> {
        let registry = self.weak_self.clone();
        let finalizer: Finalizer = Box::new(move |id| {
            if let Some(registry) = registry.upgrade() {
                registry.inner.lock().remove(&id);
            }
        });

        let future = ResponseFuture::new(request_id, actor, request, finalizer);
        self.inner.lock().insert(request_id, Arc::clone(&future));
        future
    }

    pub fn get(&self, request_id: RequestId) -> Option<Arc<ResponseFuture>> {
        self.inner.lock().get(&request_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostId;
    use crate::packet::{Builder, PacketType, ResponseData};

    fn host(port: u16) -> Host {
        Host::new(HostId::random(), format!("127.0.0.1:{}", port).parse().unwrap())
    }

    fn ping_request(from: &Host, to: &Host) -> Packet {
        Packet::ping(from.clone(), to.clone())
    }

    fn ping_response(from: &Host, to: &Host) -> Packet {
        Builder::new()
            .sender(from.clone())
            .receiver(to.clone())
            .kind(PacketType::Ping)
            .response(ResponseData::Ping)
            .build()
    }

    #[test]
    fn test_future_debug_shows_id_and_state() {
        let registry = FutureRegistry::new();
        let (a, b) = (host(2010), host(2011));
        let future = registry.create(21, b.clone(), ping_request(&a, &b));

        // Result<Arc<ResponseFuture>, _> must stay unwrappable in tests.
        let printed = format!("{:?}", future);
        assert!(printed.contains("request_id: 21"));
        assert!(printed.contains("Pending"));

        future.cancel();
        assert!(format!("{:?}", future).contains("Cancelled"));
    }

    #[test]
    fn test_registry_registers_and_finalizer_removes() {
        let registry = FutureRegistry::new();
        let (a, b) = (host(2000), host(2001));
        let future = registry.create(1, b.clone(), ping_request(&a, &b));

        assert_eq!(registry.len(), 1);
        assert_eq!(future.state(), FutureState::Pending);
        assert_eq!(future.actor(), &b);

        assert!(future.set_result(ping_response(&b, &a)));
        assert_eq!(future.state(), FutureState::Fulfilled);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_single_delivery_second_result_dropped() {
        let registry = FutureRegistry::new();
        let (a, b) = (host(2002), host(2003));
        let future = registry.create(7, b.clone(), ping_request(&a, &b));

        assert!(future.set_result(ping_response(&b, &a)));
        assert!(!future.set_result(ping_response(&b, &a)));

        let delivered = future.get_result(Duration::from_millis(100)).await.unwrap();
        assert!(delivered.is_response);

        // One waiter only.
        assert!(matches!(
            future.get_result(Duration::from_millis(10)).await,
            Err(NetError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_wakes_waiter() {
        let registry = FutureRegistry::new();
        let (a, b) = (host(2004), host(2005));
        let future = registry.create(9, b.clone(), ping_request(&a, &b));

        future.cancel();
        future.cancel();
        assert_eq!(future.state(), FutureState::Cancelled);
        assert!(registry.is_empty());

        assert!(matches!(
            future.get_result(Duration::from_secs(1)).await,
            Err(NetError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_result_after_cancel_is_dropped() {
        let registry = FutureRegistry::new();
        let (a, b) = (host(2006), host(2007));
        let future = registry.create(11, b.clone(), ping_request(&a, &b));

        future.cancel();
        assert!(!future.set_result(ping_response(&b, &a)));
        assert_eq!(future.state(), FutureState::Cancelled);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_result_times_out_and_finalizes() {
        let registry = FutureRegistry::new();
        let (a, b) = (host(2008), host(2009));
        let future = registry.create(13, b.clone(), ping_request(&a, &b));

        let err = future.get_result(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, NetError::Timeout(_)));
        assert_eq!(future.state(), FutureState::TimedOut);
        assert!(registry.is_empty());
    }
}

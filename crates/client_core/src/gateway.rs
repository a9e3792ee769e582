use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{
    stream::{AbortHandle, Abortable, BoxStream},
    Stream, StreamExt,
};
use shared::{
    domain::{Address, NetworkId},
    protocol::{BlockTag, CallValue, EventKind, LedgerEvent, RemoteMethod, TxReceipt},
};
use tokio::sync::watch;

use crate::error::{HistoryFetchError, RemoteCallError, RemoteSubmitError, SubscriptionError};

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn block_number(&self) -> Result<u64, RemoteCallError>;
    async fn call(
        &self,
        method: RemoteMethod,
        caller: &Address,
        at: BlockTag,
    ) -> Result<CallValue, RemoteCallError>;
    async fn send(
        &self,
        method: RemoteMethod,
        caller: &Address,
    ) -> Result<TxReceipt, RemoteSubmitError>;
    async fn past_events(
        &self,
        kind: EventKind,
        from: BlockTag,
        to: BlockTag,
    ) -> Result<Vec<LedgerEvent>, HistoryFetchError>;
    async fn subscribe(
        &self,
        kind: EventKind,
        from: BlockTag,
    ) -> Result<EventSubscription, SubscriptionError>;
}

/// Live feed of one event kind.
///
/// Dropping or unsubscribing ends the stream and runs the producer's teardown hook.
pub struct EventSubscription {
    kind: EventKind,
    inner: Abortable<BoxStream<'static, Result<LedgerEvent, SubscriptionError>>>,
    abort: AbortHandle,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    pub fn new<S>(kind: EventKind, stream: S) -> Self
    where
        S: Stream<Item = Result<LedgerEvent, SubscriptionError>> + Send + 'static,
    {
        let (abort, registration) = AbortHandle::new_pair();
        Self {
            kind,
            inner: Abortable::new(stream.boxed(), registration),
            abort,
            teardown: None,
        }
    }

    pub fn with_teardown(mut self, teardown: impl FnOnce() + Send + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Handle that ends the stream from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for EventSubscription {
    type Item = Result<LedgerEvent, SubscriptionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.abort.abort();
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("kind", &self.kind)
            .field("aborted", &self.abort.is_aborted())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account: Address,
    pub network_id: NetworkId,
}

/// Source of the caller's account and network, with change notification.
pub trait IdentitySource: Send + Sync {
    fn watch(&self) -> watch::Receiver<Identity>;
}

/// Identity held in-process; switches notify every watcher.
pub struct LocalIdentity {
    tx: watch::Sender<Identity>,
}

impl LocalIdentity {
    pub fn new(identity: Identity) -> Arc<Self> {
        let (tx, _) = watch::channel(identity);
        Arc::new(Self { tx })
    }

    pub fn current(&self) -> Identity {
        self.tx.borrow().clone()
    }

    pub fn switch_account(&self, account: Address) -> bool {
        self.tx.send_if_modified(|identity| {
            if identity.account == account {
                return false;
            }
            identity.account = account;
            true
        })
    }

    pub fn switch_network(&self, network_id: NetworkId) -> bool {
        self.tx.send_if_modified(|identity| {
            if identity.network_id == network_id {
                return false;
            }
            identity.network_id = network_id;
            true
        })
    }
}

impl IdentitySource for LocalIdentity {
    fn watch(&self) -> watch::Receiver<Identity> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use shared::{
        domain::EventKey,
        protocol::EventPayload,
    };

    use super::*;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().expect("address")
    }

    fn voter_event(n: u8) -> LedgerEvent {
        LedgerEvent {
            key: EventKey::new(format!("0x{n:02x}"), 0),
            block_number: u64::from(n),
            sender: addr(1),
            payload: EventPayload::VoterRegistered { voter: addr(n) },
        }
    }

    #[tokio::test]
    async fn abort_handle_ends_stream_and_drop_runs_teardown() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&torn_down);
        let mut subscription = EventSubscription::new(
            EventKind::VoterRegistered,
            futures::stream::iter(vec![Ok(voter_event(2))]).chain(futures::stream::pending()),
        )
        .with_teardown(move || flag.store(true, Ordering::SeqCst));

        let first = subscription.next().await.expect("item").expect("event");
        assert_eq!(first, voter_event(2));

        subscription.abort_handle().abort();
        assert!(subscription.next().await.is_none());
        assert!(!torn_down.load(Ordering::SeqCst));

        subscription.unsubscribe();
        assert!(torn_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn local_identity_notifies_only_on_real_changes() {
        let identity = LocalIdentity::new(Identity {
            account: addr(1),
            network_id: NetworkId(1337),
        });
        let mut rx = identity.watch();
        rx.borrow_and_update();

        assert!(!identity.switch_account(addr(1)));
        assert!(!rx.has_changed().expect("open"));

        assert!(identity.switch_account(addr(2)));
        rx.changed().await.expect("changed");
        assert_eq!(rx.borrow_and_update().account, addr(2));

        assert!(identity.switch_network(NetworkId(5)));
        rx.changed().await.expect("changed");
        assert_eq!(identity.current().network_id, NetworkId(5));
    }
}

use std::{collections::HashMap, sync::Arc};

use futures::{stream::AbortHandle, Stream, StreamExt};
use shared::{
    domain::{EventKey, ProposalId},
    protocol::{BlockTag, CallValue, EventKind, EventPayload, LedgerEvent, RemoteMethod, TxReceipt},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

pub mod error;
pub mod gate;
pub mod gateway;
pub mod http_gateway;
pub mod phase;
pub mod reconciler;
pub mod session;

use error::{
    LostEventError, RemoteCallError, RemoteSubmitError, SubscriptionError, SyncFault,
    TransitionError,
};
pub use gate::{authorize, Action, ActionDenied, ActionKind, DenialCategory, DenialReason};
pub use gateway::{EventSubscription, Identity, IdentitySource, LocalIdentity, RemoteGateway};
pub use http_gateway::HttpGateway;
use reconciler::EventReconciler;
pub use session::{Proposal, SessionSnapshot, SessionStatus, Voter};
use session::{Effect, InitialRead, SessionState, Transition};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SnapshotUpdated { generation: u64, revision: u64 },
    Fault(SyncFault),
    Submitted { action: ActionKind, receipt: TxReceipt },
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub history_from: BlockTag,
    pub subscribe_from: BlockTag,
    pub inbox_capacity: usize,
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            history_from: BlockTag::Earliest,
            subscribe_from: BlockTag::Earliest,
            inbox_capacity: 1024,
            event_capacity: 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Denied(#[from] ActionDenied),
    #[error(transparent)]
    Submit(#[from] RemoteSubmitError),
}

enum Inbound {
    Ledger { generation: u64, event: LedgerEvent },
    SubscriptionFailed { generation: u64, error: SubscriptionError },
    SubscriptionEnded { generation: u64, kind: EventKind },
    Resync,
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running voting session.
///
/// All snapshot mutation happens on one background task; this handle only reads
/// published snapshots and submits gated actions.
pub struct VotingClient {
    gateway: Arc<dyn RemoteGateway>,
    snapshot: watch::Receiver<Arc<SessionSnapshot>>,
    events: broadcast::Sender<ClientEvent>,
    inbox: mpsc::Sender<Inbound>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VotingClient {
    pub fn start(
        gateway: Arc<dyn RemoteGateway>,
        identity: Arc<dyn IdentitySource>,
        options: ClientOptions,
    ) -> Arc<Self> {
        let state = SessionState::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(state.snapshot()));
        let (events, _) = broadcast::channel(options.event_capacity);
        let (inbox_tx, inbox_rx) = mpsc::channel(options.inbox_capacity);

        let worker = SyncWorker {
            gateway: Arc::clone(&gateway),
            identity: identity.watch(),
            identity_open: true,
            state,
            reconciler: EventReconciler::new(0),
            read_heights: HashMap::new(),
            pending_votes: HashMap::new(),
            subscriptions: Vec::new(),
            inbox_tx: inbox_tx.clone(),
            inbox_rx,
            snapshot_tx,
            events: events.clone(),
            options,
        };
        let task = tokio::spawn(worker.run());

        Arc::new(Self {
            gateway,
            snapshot: snapshot_rx,
            events,
            inbox: inbox_tx,
            worker: Mutex::new(Some(task)),
        })
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.snapshot.clone()
    }

    pub fn snapshot_stream(&self) -> impl Stream<Item = Arc<SessionSnapshot>> + Send + 'static {
        WatchStream::new(self.snapshot.clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn authorize(&self, action: &Action) -> Result<(), ActionDenied> {
        authorize(action, &self.snapshot())
    }

    /// Authorizes and submits `action` as the session's caller.
    ///
    /// The snapshot is not touched here; the effect shows up once the ledger event
    /// comes back through the subscriptions.
    pub async fn submit(&self, action: Action) -> Result<TxReceipt, ActionError> {
        let snapshot = self.snapshot();
        authorize(&action, &snapshot)?;
        let Some(caller) = snapshot.caller.clone() else {
            return Err(ActionDenied {
                action: action.kind(),
                reason: DenialReason::NotSynced {
                    status: snapshot.status,
                },
            }
            .into());
        };

        let kind = action.kind();
        let receipt = self
            .gateway
            .send(action.into_method(), &caller)
            .await
            .inspect_err(|err| warn!(action = %kind, error = %err, "submit: ledger refused action"))?;
        info!(action = %kind, tx = %receipt.tx_hash, caller = %caller, "submit: action sent");
        let _ = self.events.send(ClientEvent::Submitted {
            action: kind,
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }

    /// Discards the current snapshot and synchronises again with the current identity.
    pub async fn resync(&self) {
        let _ = self.inbox.send(Inbound::Resync).await;
    }

    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.inbox.send(Inbound::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
        if let Some(task) = self.worker.lock().await.take() {
            let _ = task.await;
        }
    }
}

impl Drop for VotingClient {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.try_lock() {
            if let Some(task) = worker.take() {
                task.abort();
            }
        }
    }
}

struct ActiveSubscription {
    kind: EventKind,
    abort: AbortHandle,
    pump: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.abort.abort();
        self.pump.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    History,
    Live,
}

struct SyncWorker {
    gateway: Arc<dyn RemoteGateway>,
    identity: watch::Receiver<Identity>,
    identity_open: bool,
    state: SessionState,
    reconciler: EventReconciler,
    /// Height each known proposal was read at; votes at or below it are already counted.
    read_heights: HashMap<ProposalId, u64>,
    /// Votes delivered before the proposal they reference.
    pending_votes: HashMap<ProposalId, Vec<LedgerEvent>>,
    subscriptions: Vec<ActiveSubscription>,
    inbox_tx: mpsc::Sender<Inbound>,
    inbox_rx: mpsc::Receiver<Inbound>,
    snapshot_tx: watch::Sender<Arc<SessionSnapshot>>,
    events: broadcast::Sender<ClientEvent>,
    options: ClientOptions,
}

impl SyncWorker {
    async fn run(mut self) {
        self.rebuild().await;
        loop {
            tokio::select! {
                inbound = self.inbox_rx.recv() => {
                    let Some(inbound) = inbound else { break };
                    match inbound {
                        Inbound::Ledger { generation, event } => {
                            if generation != self.state.generation() {
                                debug!(key = %event.key, generation, "sync: dropping event from a torn-down subscription");
                                continue;
                            }
                            if let Some(event) = self.reconciler.accept_live(event) {
                                self.apply_event(event, Origin::Live).await;
                            }
                        }
                        Inbound::SubscriptionFailed { generation, error } => {
                            if generation == self.state.generation() {
                                self.fault(error.into());
                            }
                        }
                        Inbound::SubscriptionEnded { generation, kind } => {
                            if generation == self.state.generation() {
                                self.fault(SubscriptionError::Closed { kind }.into());
                            }
                        }
                        Inbound::Resync => {
                            let identity = self.identity.borrow_and_update().clone();
                            self.on_identity_changed(identity).await;
                        }
                        Inbound::Shutdown(done) => {
                            self.close_subscriptions().await;
                            self.transition(Transition::Teardown);
                            let stats = self.reconciler.stats();
                            info!(
                                live_applied = stats.live_applied,
                                duplicates = stats.duplicates,
                                "sync: session closed"
                            );
                            let _ = done.send(());
                            break;
                        }
                    }
                }
                changed = self.identity.changed(), if self.identity_open => {
                    match changed {
                        Ok(()) => {
                            let identity = self.identity.borrow_and_update().clone();
                            info!(account = %identity.account, network = %identity.network_id, "sync: identity changed");
                            self.on_identity_changed(identity).await;
                        }
                        Err(_) => {
                            warn!("sync: identity source dropped; keeping current identity");
                            self.identity_open = false;
                        }
                    }
                }
            }
        }
    }

    async fn on_identity_changed(&mut self, identity: Identity) {
        // Old subscriptions must be gone before the rebuilt session can receive anything.
        self.close_subscriptions().await;
        if let Some(effects) = self.transition(Transition::IdentityChanged(identity)) {
            if effects.contains(&Effect::Rebuild) {
                self.rebuild().await;
            }
        }
    }

    async fn rebuild(&mut self) {
        let identity = self.identity.borrow_and_update().clone();
        self.read_heights.clear();
        self.pending_votes.clear();

        let initial = match self.initial_read(&identity).await {
            Ok(initial) => initial,
            Err(err) => {
                error!(account = %identity.account, error = %err, "sync: initial read failed");
                self.fault(err.into());
                return;
            }
        };
        let sync_height = initial.sync_height;
        let Some(init_effects) = self.transition(Transition::Init(initial)) else {
            return;
        };
        self.reconciler = EventReconciler::new(sync_height);
        info!(
            account = %identity.account,
            generation = self.state.generation(),
            sync_height,
            phase = ?self.state.phase(),
            "sync: session initialised"
        );

        self.open_subscriptions().await;

        for kind in EventKind::ALL {
            let fetched = self
                .gateway
                .past_events(kind, self.options.history_from, BlockTag::Number(sync_height))
                .await;
            let ingest = self.reconciler.ingest_history(kind, fetched);
            if let Some(partial) = ingest.partial {
                self.transition(Transition::HistoryDegraded(kind));
                self.fault(partial.into());
            }
            for event in ingest.events {
                self.apply_event(event, Origin::History).await;
            }
        }

        let stats = self.reconciler.stats();
        info!(
            historical = stats.historical,
            pending_votes = self.pending_votes.values().map(Vec::len).sum::<usize>(),
            "sync: history reconciled"
        );
        self.transition(Transition::SyncCompleted);
        self.perform(init_effects).await;
    }

    async fn initial_read(&self, identity: &Identity) -> Result<InitialRead, RemoteCallError> {
        let sync_height = self.gateway.block_number().await?;
        let at = BlockTag::Number(sync_height);
        let owner = match self
            .gateway
            .call(RemoteMethod::Owner, &identity.account, at)
            .await?
        {
            CallValue::Address(owner) => owner,
            other => return Err(unexpected("owner", "address", &other)),
        };
        let phase_ordinal = match self
            .gateway
            .call(RemoteMethod::WorkflowStatus, &identity.account, at)
            .await?
        {
            CallValue::Uint(ordinal) => ordinal,
            other => return Err(unexpected("workflowStatus", "uint", &other)),
        };

        Ok(InitialRead {
            caller: identity.account.clone(),
            network_id: identity.network_id,
            owner,
            phase_ordinal,
            sync_height,
        })
    }

    async fn open_subscriptions(&mut self) {
        let generation = self.state.generation();
        for kind in EventKind::ALL {
            let subscription = match self
                .gateway
                .subscribe(kind, self.options.subscribe_from)
                .await
            {
                Ok(subscription) => subscription,
                Err(err) => {
                    error!(kind = %kind, error = %err, "sync: subscription failed to open");
                    self.fault(err.into());
                    continue;
                }
            };
            let abort = subscription.abort_handle();
            let inbox = self.inbox_tx.clone();
            let pump = tokio::spawn(async move {
                let mut subscription = subscription;
                while let Some(item) = subscription.next().await {
                    let inbound = match item {
                        Ok(event) => Inbound::Ledger { generation, event },
                        Err(error) => Inbound::SubscriptionFailed { generation, error },
                    };
                    if inbox.send(inbound).await.is_err() {
                        return;
                    }
                }
                let _ = inbox
                    .send(Inbound::SubscriptionEnded { generation, kind })
                    .await;
            });
            self.subscriptions.push(ActiveSubscription { kind, abort, pump });
        }
    }

    async fn close_subscriptions(&mut self) {
        for mut active in self.subscriptions.drain(..) {
            active.abort.abort();
            active.pump.abort();
            let _ = (&mut active.pump).await;
            debug!(kind = %active.kind, "sync: subscription torn down");
        }
    }

    async fn apply_event(&mut self, event: LedgerEvent, origin: Origin) {
        match &event.payload {
            EventPayload::VoterRegistered { voter } => {
                self.transition(Transition::VoterObserved(voter.clone()));
            }
            EventPayload::ProposalRegistered { proposal_id } => {
                let proposal_id = *proposal_id;
                if self.state.has_proposal(proposal_id) {
                    debug!(proposal_id = proposal_id.0, "sync: proposal already known");
                    return;
                }
                let read_at = event.block_number.max(self.reconciler.sync_height());
                let proposal = match self.read_proposal(&event, proposal_id, read_at).await {
                    Ok(proposal) => proposal,
                    Err(err) => {
                        warn!(proposal_id = proposal_id.0, error = %err, "sync: proposal read failed");
                        self.proposal_unavailable(event.key.clone(), origin, err);
                        return;
                    }
                };
                if self.transition(Transition::ProposalObserved(proposal)).is_none() {
                    return;
                }
                self.read_heights.insert(proposal_id, read_at);
                if let Err(err) = self.reconciler.acknowledge_proposal(proposal_id) {
                    // History gaps are already reported as partial history.
                    if origin == Origin::Live {
                        self.fault(err.into());
                    }
                }
                if let Some(held) = self.pending_votes.remove(&proposal_id) {
                    debug!(proposal_id = proposal_id.0, votes = held.len(), "sync: applying held votes");
                    for vote in &held {
                        self.apply_vote(vote);
                    }
                }
            }
            EventPayload::Voted { proposal_id, .. } => {
                let proposal_id = *proposal_id;
                if self.state.has_proposal(proposal_id) {
                    self.apply_vote(&event);
                } else {
                    debug!(proposal_id = proposal_id.0, key = %event.key, "sync: holding vote until its proposal is read");
                    self.pending_votes
                        .entry(proposal_id)
                        .or_default()
                        .push(event.clone());
                }
            }
            EventPayload::WorkflowStatusChange { new_status, .. } => {
                if self.reconciler.is_reflected_in_sync(&event) {
                    debug!(key = %event.key, new_status, "sync: phase change already covered by initial read");
                    return;
                }
                if let Some(effects) = self.transition(Transition::PhaseChanged(*new_status)) {
                    self.perform(effects).await;
                }
            }
        }
    }

    fn apply_vote(&mut self, event: &LedgerEvent) {
        let EventPayload::Voted { voter, proposal_id } = &event.payload else {
            return;
        };
        let read_at = self
            .read_heights
            .get(proposal_id)
            .copied()
            .unwrap_or_else(|| self.reconciler.sync_height());
        self.transition(Transition::VoteObserved {
            voter: voter.clone(),
            proposal_id: *proposal_id,
            reflected: event.block_number <= read_at,
        });
    }

    fn proposal_unavailable(&mut self, key: EventKey, origin: Origin, err: RemoteCallError) {
        match origin {
            // Live feeds start at `earliest`, so the replay of this event is still queued.
            Origin::History => {
                self.reconciler.forget(&key);
                self.fault(err.into());
            }
            Origin::Live => {
                self.transition(Transition::HistoryDegraded(EventKind::ProposalRegistered));
                error!(key = %key, "sync: live proposal lost until the next resync");
                self.fault(
                    LostEventError {
                        kind: EventKind::ProposalRegistered,
                        key,
                        source: err,
                    }
                    .into(),
                );
            }
        }
    }

    async fn read_proposal(
        &self,
        event: &LedgerEvent,
        proposal_id: ProposalId,
        read_at: u64,
    ) -> Result<Proposal, RemoteCallError> {
        let Some(caller) = self.state.caller().cloned() else {
            return Err(RemoteCallError::Transport {
                method: "getOneProposal",
                message: "no caller identity".into(),
            });
        };
        match self
            .gateway
            .call(
                RemoteMethod::GetOneProposal { proposal_id },
                &caller,
                BlockTag::Number(read_at),
            )
            .await?
        {
            CallValue::Proposal(record) => Ok(Proposal {
                id: proposal_id,
                description: record.description,
                submitter: event.sender.clone(),
                vote_count: record.vote_count,
                tx_hash: Some(event.key.tx_hash.clone()),
            }),
            other => Err(unexpected("getOneProposal", "proposal", &other)),
        }
    }

    async fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ReadWinner => self.read_winner().await,
                // Rebuilds are driven by identity changes in the main loop.
                Effect::Rebuild => {}
            }
        }
    }

    async fn read_winner(&mut self) {
        let Some(caller) = self.state.caller().cloned() else {
            return;
        };
        let read = self
            .gateway
            .call(RemoteMethod::WinningProposalId, &caller, BlockTag::Latest)
            .await;
        match read {
            Ok(CallValue::Uint(id)) => {
                if self
                    .transition(Transition::WinnerResolved(ProposalId(id)))
                    .is_some()
                {
                    info!(winner = id, "sync: winner resolved");
                }
            }
            Ok(other) => self.fault(unexpected("winningProposalID", "uint", &other).into()),
            Err(err) => {
                warn!(error = %err, "sync: winner read failed");
                self.fault(err.into());
            }
        }
    }

    /// Applies a transition and publishes the new snapshot; rejected transitions are
    /// logged and, when they concern the whole session, broadcast as faults.
    fn transition(&mut self, transition: Transition) -> Option<Vec<Effect>> {
        match self.state.apply(transition) {
            Ok(effects) => {
                self.publish();
                Some(effects)
            }
            Err(err) => {
                self.reject(err);
                None
            }
        }
    }

    fn reject(&self, err: TransitionError) {
        match err {
            TransitionError::UnknownPhase(err) => {
                error!(ordinal = err.ordinal, "sync: ledger reported an unknown workflow phase");
                self.fault(err.into());
            }
            TransitionError::InconsistentWinner(err) => self.fault(err.into()),
            other => warn!(error = %other, "sync: transition rejected"),
        }
    }

    fn publish(&self) {
        let snapshot = Arc::new(self.state.snapshot());
        let (generation, revision) = (snapshot.generation, snapshot.revision);
        self.snapshot_tx.send_replace(snapshot);
        let _ = self.events.send(ClientEvent::SnapshotUpdated {
            generation,
            revision,
        });
    }

    fn fault(&self, fault: SyncFault) {
        let _ = self.events.send(ClientEvent::Fault(fault));
    }
}

fn unexpected(method: &'static str, expected: &'static str, actual: &CallValue) -> RemoteCallError {
    RemoteCallError::UnexpectedValue {
        method,
        expected,
        actual: actual.type_name(),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

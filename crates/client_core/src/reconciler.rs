use std::collections::{BTreeSet, HashSet};

use futures::{future, stream, Stream, StreamExt};
use shared::{
    domain::{EventKey, ProposalId},
    protocol::{EventKind, EventPayload, LedgerEvent},
};
use tracing::{debug, warn};

use crate::error::{HistoryFetchError, PartialHistoryError, PartialHistoryReason, ReconcileError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub historical: usize,
    pub live_applied: usize,
    pub duplicates: usize,
}

#[derive(Debug, Default)]
pub struct HistoryIngest {
    pub events: Vec<LedgerEvent>,
    pub partial: Option<PartialHistoryError>,
}

/// Merges the historical fetch and the live subscription of a session into a single
/// at-most-once sequence.
///
/// Subscriptions start at `earliest`, so every live feed is expected to re-deliver the
/// history already fetched. Events are identified by [`EventKey`], never by content.
#[derive(Debug)]
pub struct EventReconciler {
    seen: HashSet<EventKey>,
    sync_height: u64,
    acknowledged_proposals: BTreeSet<ProposalId>,
    next_proposal: u64,
    stats: ReconcileStats,
}

impl EventReconciler {
    pub fn new(sync_height: u64) -> Self {
        Self {
            seen: HashSet::new(),
            sync_height,
            acknowledged_proposals: BTreeSet::new(),
            next_proposal: 1,
            stats: ReconcileStats::default(),
        }
    }

    pub fn sync_height(&self) -> u64 {
        self.sync_height
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    #[cfg(test)]
    fn has_seen(&self, key: &EventKey) -> bool {
        self.seen.contains(key)
    }

    pub fn ingest_history(
        &mut self,
        kind: EventKind,
        fetched: Result<Vec<LedgerEvent>, HistoryFetchError>,
    ) -> HistoryIngest {
        let events = match fetched {
            Ok(events) => events,
            Err(err) => {
                warn!(kind = %kind, error = %err, "reconcile: history unavailable, continuing live-only");
                return HistoryIngest {
                    events: Vec::new(),
                    partial: Some(PartialHistoryError {
                        kind,
                        reason: PartialHistoryReason::FetchFailed(err.message),
                    }),
                };
            }
        };

        let mut ingest = HistoryIngest::default();
        let mut expected_proposal = self.next_proposal;
        for event in events {
            if event.kind() != kind {
                warn!(
                    requested = %kind,
                    delivered = %event.kind(),
                    key = %event.key,
                    "reconcile: history query returned a foreign event kind"
                );
                continue;
            }
            if !self.seen.insert(event.key.clone()) {
                self.stats.duplicates += 1;
                continue;
            }
            if let EventPayload::ProposalRegistered { proposal_id } = &event.payload {
                if proposal_id.0 != expected_proposal && ingest.partial.is_none() {
                    ingest.partial = Some(PartialHistoryError {
                        kind,
                        reason: PartialHistoryReason::MissingProposals {
                            expected: ProposalId(expected_proposal),
                            found: *proposal_id,
                        },
                    });
                }
                expected_proposal = expected_proposal.max(proposal_id.0 + 1);
            }
            self.stats.historical += 1;
            ingest.events.push(event);
        }
        debug!(
            kind = %kind,
            applied = ingest.events.len(),
            partial = ingest.partial.is_some(),
            "reconcile: history ingested"
        );
        ingest
    }

    /// Returns the event if it has not been absorbed yet, recording it as absorbed.
    pub fn accept_live(&mut self, event: LedgerEvent) -> Option<LedgerEvent> {
        if !self.seen.insert(event.key.clone()) {
            self.stats.duplicates += 1;
            return None;
        }
        self.stats.live_applied += 1;
        Some(event)
    }

    /// Un-records an event whose application failed so a later redelivery is applied.
    pub fn forget(&mut self, key: &EventKey) {
        self.seen.remove(key);
    }

    /// Events at or below the sync height are already included in the pinned reads
    /// taken when the session was initialised.
    pub fn is_reflected_in_sync(&self, event: &LedgerEvent) -> bool {
        event.block_number <= self.sync_height
    }

    /// Stream form for one event kind: the history in returned order, then every live
    /// delivery not absorbed yet.
    pub fn reconcile<S>(
        mut self,
        kind: EventKind,
        historical: Result<Vec<LedgerEvent>, HistoryFetchError>,
        live: S,
    ) -> (Option<PartialHistoryError>, impl Stream<Item = LedgerEvent>)
    where
        S: Stream<Item = LedgerEvent>,
    {
        let ingest = self.ingest_history(kind, historical);
        let live = live.filter_map(move |event| future::ready(self.accept_live(event)));
        (ingest.partial, stream::iter(ingest.events).chain(live))
    }

    pub fn acknowledge_proposal(&mut self, id: ProposalId) -> Result<(), ReconcileError> {
        let expected = ProposalId(self.next_proposal);
        let in_sequence = id.0 <= self.next_proposal;
        self.acknowledged_proposals.insert(id);
        while self
            .acknowledged_proposals
            .contains(&ProposalId(self.next_proposal))
        {
            self.next_proposal += 1;
        }
        if in_sequence {
            Ok(())
        } else {
            Err(ReconcileError::ProposalOutOfSequence { expected, found: id })
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::domain::Address;

    use super::*;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().expect("address")
    }

    fn event(tx: &str, log_index: u32, block_number: u64, payload: EventPayload) -> LedgerEvent {
        LedgerEvent {
            key: EventKey::new(tx, log_index),
            block_number,
            sender: addr(1),
            payload,
        }
    }

    fn voter(tx: &str, n: u8) -> LedgerEvent {
        event(tx, 0, u64::from(n), EventPayload::VoterRegistered { voter: addr(n) })
    }

    fn proposal(tx: &str, id: u64) -> LedgerEvent {
        event(
            tx,
            0,
            10 + id,
            EventPayload::ProposalRegistered {
                proposal_id: ProposalId(id),
            },
        )
    }

    #[test]
    fn live_redelivery_of_history_is_discarded() {
        let mut reconciler = EventReconciler::new(5);
        let history = vec![voter("0x01", 2), voter("0x02", 3)];
        let ingest = reconciler.ingest_history(EventKind::VoterRegistered, Ok(history.clone()));
        assert_eq!(ingest.events, history);
        assert!(ingest.partial.is_none());

        for replayed in history {
            assert!(reconciler.accept_live(replayed).is_none());
        }
        let fresh = voter("0x03", 4);
        assert_eq!(reconciler.accept_live(fresh.clone()), Some(fresh.clone()));
        assert!(reconciler.accept_live(fresh).is_none());

        assert_eq!(
            reconciler.stats(),
            ReconcileStats {
                historical: 2,
                live_applied: 1,
                duplicates: 3,
            }
        );
    }

    #[test]
    fn any_interleaving_of_duplicates_yields_the_distinct_events_in_first_seen_order() {
        let distinct = vec![voter("0x01", 2), voter("0x02", 3), voter("0x03", 4)];
        let deliveries: [Vec<usize>; 3] = [
            vec![0, 0, 1, 2, 2, 1, 0],
            vec![0, 1, 2],
            vec![0, 1, 1, 1, 2, 0, 2],
        ];
        let cases = [(0usize, &deliveries[0]), (2, &deliveries[1]), (1, &deliveries[2])];
        for (history_len, order) in cases {
            let mut reconciler = EventReconciler::new(0);
            let mut applied = reconciler
                .ingest_history(
                    EventKind::VoterRegistered,
                    Ok(distinct[..history_len].to_vec()),
                )
                .events;
            for index in order {
                if let Some(event) = reconciler.accept_live(distinct[*index].clone()) {
                    applied.push(event);
                }
            }
            assert_eq!(applied, distinct);
        }
    }

    #[tokio::test]
    async fn reconcile_stream_extends_history_with_unseen_live_events() {
        let history = vec![voter("0x01", 2), voter("0x02", 3)];
        let live = futures::stream::iter(vec![
            voter("0x01", 2),
            voter("0x03", 4),
            voter("0x02", 3),
            voter("0x03", 4),
        ]);
        let (partial, merged) =
            EventReconciler::new(3).reconcile(EventKind::VoterRegistered, Ok(history), live);
        assert!(partial.is_none());

        let merged: Vec<_> = merged.collect().await;
        assert_eq!(
            merged,
            vec![voter("0x01", 2), voter("0x02", 3), voter("0x03", 4)]
        );
    }

    #[test]
    fn failed_history_is_reported_without_fabricating_events() {
        let mut reconciler = EventReconciler::new(9);
        let ingest = reconciler.ingest_history(
            EventKind::ProposalRegistered,
            Err(HistoryFetchError {
                kind: EventKind::ProposalRegistered,
                message: "node unavailable".into(),
            }),
        );
        assert!(ingest.events.is_empty());
        assert_eq!(
            ingest.partial,
            Some(PartialHistoryError {
                kind: EventKind::ProposalRegistered,
                reason: PartialHistoryReason::FetchFailed("node unavailable".into()),
            })
        );

        let live = proposal("0x10", 1);
        assert_eq!(reconciler.accept_live(live.clone()), Some(live));
    }

    #[test]
    fn gap_in_proposal_history_is_partial() {
        let mut reconciler = EventReconciler::new(20);
        let ingest = reconciler.ingest_history(
            EventKind::ProposalRegistered,
            Ok(vec![proposal("0x11", 1), proposal("0x12", 2), proposal("0x14", 4)]),
        );
        assert_eq!(ingest.events.len(), 3);
        assert_eq!(
            ingest.partial,
            Some(PartialHistoryError {
                kind: EventKind::ProposalRegistered,
                reason: PartialHistoryReason::MissingProposals {
                    expected: ProposalId(3),
                    found: ProposalId(4),
                },
            })
        );
    }

    #[test]
    fn history_with_foreign_kinds_keeps_only_requested_kind() {
        let mut reconciler = EventReconciler::new(20);
        let ingest = reconciler.ingest_history(
            EventKind::VoterRegistered,
            Ok(vec![voter("0x01", 2), proposal("0x11", 1)]),
        );
        assert_eq!(ingest.events, vec![voter("0x01", 2)]);
        assert!(!reconciler.has_seen(&EventKey::new("0x11", 0)));
    }

    #[test]
    fn forgotten_events_can_be_applied_again() {
        let mut reconciler = EventReconciler::new(0);
        let live = proposal("0x11", 1);
        assert!(reconciler.accept_live(live.clone()).is_some());
        reconciler.forget(&live.key);
        assert!(reconciler.accept_live(live).is_some());
    }

    #[test]
    fn proposal_acknowledgement_tracks_sequence_and_tolerates_late_fill() {
        let mut reconciler = EventReconciler::new(0);
        assert!(reconciler.acknowledge_proposal(ProposalId(1)).is_ok());
        assert_eq!(
            reconciler.acknowledge_proposal(ProposalId(3)),
            Err(ReconcileError::ProposalOutOfSequence {
                expected: ProposalId(2),
                found: ProposalId(3),
            })
        );
        assert!(reconciler.acknowledge_proposal(ProposalId(2)).is_ok());
        assert!(reconciler.acknowledge_proposal(ProposalId(4)).is_ok());
        assert!(reconciler.acknowledge_proposal(ProposalId(1)).is_ok());
    }

    #[test]
    fn events_at_or_below_sync_height_are_reflected() {
        let reconciler = EventReconciler::new(12);
        assert!(reconciler.is_reflected_in_sync(&proposal("0x11", 1)));
        assert!(reconciler.is_reflected_in_sync(&proposal("0x12", 2)));
        assert!(!reconciler.is_reflected_in_sync(&proposal("0x13", 3)));
    }
}

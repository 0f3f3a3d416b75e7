/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The synchronizer (pacemaker): view advancement, timeouts, and the New-View handshake.
//!
//! The [`Synchronizer`] owns the replica's view state: the current view, the highest verified
//! quorum and timeout certificates, the deadline of the running view, and the per-view tallies of
//! timeout messages. The handlers that drive it live on
//! [`ReplicaCore`](crate::replica::ReplicaCore) because advancing a view touches half the
//! replica: certificates must be verified, leaders computed, and proposals or new-view messages
//! sent.
//!
//! A view lives from entered to exited. It exits through [`ReplicaCore::advance_view`], fed by
//! one of three sources: a quorum certificate (from a proposal, collected votes, or a new-view
//! message), a timeout certificate assembled from a quorum of timeout messages, or an aggregated
//! QC. Either way the replica transitions to the certificate's view plus one, fires a
//! [`ViewChange`](crate::events::Event::ViewChange) event, and re-arms its timer with a duration
//! from the [estimator](view_duration::ViewDuration). Timeouts are the sole liveness mechanism:
//! nothing in the core ever waits for a specific message.

pub mod view_duration;

use std::collections::BTreeMap;
use std::time::Instant;

use crate::events::{Event, TimeoutElapsedEvent, ViewChangeEvent};
use crate::event_loop::EventSink;
use crate::messages::{NewViewMessage, TimeoutMessage};
use crate::replica::ReplicaCore;
use crate::types::{
    AggregateQC, QuorumCertificate, ReplicaID, SyncInfo, TimeoutCertificate, ViewNumber,
};

use view_duration::ViewDuration;

/// View state of one replica. The synchronizer is the authoritative source for the current view;
/// everything else queries it.
pub struct Synchronizer {
    current_view: ViewNumber,
    high_qc: QuorumCertificate,
    high_tc: Option<TimeoutCertificate>,
    last_timeout: Option<TimeoutMessage>,
    timeouts: BTreeMap<ViewNumber, BTreeMap<ReplicaID, TimeoutMessage>>,
    pending_agg_qc: Option<AggregateQC>,
    duration: Box<dyn ViewDuration>,
    deadline: Instant,
}

impl Synchronizer {
    /// Create a synchronizer entering view 1, with `genesis_qc` as the initial high QC.
    pub fn new(genesis_qc: QuorumCertificate, mut duration: Box<dyn ViewDuration>) -> Synchronizer {
        duration.view_started();
        let deadline = Instant::now() + duration.duration();
        Synchronizer {
            current_view: ViewNumber::new(1),
            high_qc: genesis_qc,
            high_tc: None,
            last_timeout: None,
            timeouts: BTreeMap::new(),
            pending_agg_qc: None,
            duration,
            deadline,
        }
    }

    pub fn current_view(&self) -> ViewNumber {
        self.current_view
    }

    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.high_qc
    }

    /// The evidence bundle this replica would attach to a view-change message right now.
    pub fn sync_info(&self) -> SyncInfo {
        let mut sync_info = SyncInfo::new().with_qc(self.high_qc.clone());
        if let Some(tc) = &self.high_tc {
            sync_info = sync_info.with_tc(tc.clone());
        }
        sync_info
    }

    /// Adopt `qc` as the high QC if it is higher than the current one. Callers must have
    /// verified `qc`. The high QC view never decreases.
    pub(crate) fn update_high_qc(&mut self, qc: QuorumCertificate) {
        if qc.view > self.high_qc.view {
            self.high_qc = qc;
        }
    }

    pub(crate) fn update_high_tc(&mut self, tc: TimeoutCertificate) {
        if self
            .high_tc
            .as_ref()
            .map_or(true, |high| tc.view > high.view)
        {
            self.high_tc = Some(tc);
        }
    }

    /// Enter `view`. Clears per-view state, notifies the estimator, and re-arms the deadline.
    ///
    /// # Panics
    /// Panics if `view` is not ahead of the current view: the view of a correct replica never
    /// moves backwards.
    pub(crate) fn enter_view(&mut self, view: ViewNumber) {
        if view <= self.current_view {
            panic!(
                "view moved backwards: {} -> {}",
                self.current_view, view
            );
        }
        self.current_view = view;
        self.last_timeout = None;
        self.timeouts = self.timeouts.split_off(&view);
        self.duration.view_started();
        self.rearm_deadline();
    }

    pub(crate) fn view_succeeded(&mut self) {
        self.duration.view_succeeded();
    }

    pub(crate) fn view_timed_out(&mut self) {
        self.duration.view_timeout();
    }

    pub(crate) fn rearm_deadline(&mut self) {
        self.deadline = Instant::now() + self.duration.duration();
    }

    pub(crate) fn deadline_passed(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub(crate) fn last_timeout(&self) -> Option<&TimeoutMessage> {
        self.last_timeout.as_ref()
    }

    pub(crate) fn set_last_timeout(&mut self, msg: TimeoutMessage) {
        self.last_timeout = Some(msg);
    }

    /// Tally `msg` against its view. When the tally reaches `quorum`, the whole tally is removed
    /// and returned for certificate assembly.
    pub(crate) fn record_timeout(
        &mut self,
        msg: TimeoutMessage,
        quorum: usize,
    ) -> Option<(ViewNumber, BTreeMap<ReplicaID, TimeoutMessage>)> {
        let view = msg.view;
        let tally = self.timeouts.entry(view).or_default();
        tally.entry(msg.id).or_insert(msg);
        if tally.len() >= quorum {
            let tally = self.timeouts.remove(&view).unwrap();
            return Some((view, tally));
        }
        None
    }

    pub(crate) fn set_pending_agg_qc(&mut self, agg: AggregateQC) {
        self.pending_agg_qc = Some(agg);
    }

    pub(crate) fn take_pending_agg_qc(&mut self) -> Option<AggregateQC> {
        self.pending_agg_qc.take()
    }

    pub(crate) fn clear_pending_agg_qc(&mut self) {
        self.pending_agg_qc = None;
    }
}

impl ReplicaCore {
    /// Advance the view according to `sync_info`.
    ///
    /// A timeout certificate for view `v` moves the replica to `v + 1`; a quorum certificate for
    /// `v` does the same and wins ties against the timeout certificate, so a view that produced
    /// both counts as having made progress. Certificates are verified here, before any of them
    /// touches synchronizer state; invalid evidence drops the whole bundle. Transitions are
    /// forward-only.
    pub(crate) fn advance_view(&mut self, sync_info: &SyncInfo, sink: &mut EventSink) {
        let quorum = self.config.quorum_size();
        let mut cert_view: Option<ViewNumber> = None;
        let mut timeout = false;

        if let Some(tc) = &sync_info.tc {
            if !self.signer.verify_timeout_cert(tc, quorum) {
                log::debug!("replica {}: invalid timeout certificate, dropping", self.id);
                return;
            }
            self.synchronizer.update_high_tc(tc.clone());
            cert_view = Some(tc.view);
            timeout = true;
        }

        if let Some(agg) = &sync_info.agg_qc {
            let Some(high_qc) = self.signer.verify_aggregate_qc(agg, quorum) else {
                log::debug!("replica {}: invalid aggregate qc, dropping", self.id);
                return;
            };
            self.synchronizer.update_high_qc(high_qc);
        }

        if let Some(qc) = &sync_info.qc {
            if !self.signer.verify_quorum_cert(qc, quorum) {
                log::debug!("replica {}: invalid quorum certificate, dropping", self.id);
                return;
            }
            self.synchronizer.update_high_qc(qc.clone());
            if cert_view.map_or(true, |v| qc.view >= v) {
                cert_view = Some(qc.view);
                timeout = false;
            }
        }

        let Some(cert_view) = cert_view else {
            return;
        };
        if cert_view < self.synchronizer.current_view() {
            return;
        }

        if !timeout {
            self.synchronizer.view_succeeded();
            self.synchronizer.clear_pending_agg_qc();
        }
        let new_view = cert_view.next();
        self.synchronizer.enter_view(new_view);
        sink.add_event(Event::ViewChange(ViewChangeEvent {
            view: new_view,
            timeout,
        }));
    }

    /// Handler for [`Event::ViewChange`]: take up the new view's role. The leader proposes; every
    /// other replica hands its evidence to the leader.
    pub(crate) fn on_view_change(&mut self, event: ViewChangeEvent, sink: &mut EventSink) {
        self.config.view_entered(event.view);
        self.consensus.discard_stale_votes(event.view);

        let leader = self.leader_of(event.view);
        log::debug!(
            "replica {}: entered view {} (timeout: {}), leader is {}",
            self.id,
            event.view,
            event.timeout,
            leader
        );
        if leader == self.id {
            self.propose(sink);
        } else {
            let msg = NewViewMessage {
                id: self.id,
                sync_info: self.synchronizer.sync_info(),
            };
            self.config.new_view(leader, msg);
        }
    }

    /// Handler for [`Event::Tick`]: check the view deadline against the wall clock.
    pub(crate) fn on_tick(&mut self, sink: &mut EventSink) {
        if self.synchronizer.deadline_passed(Instant::now()) {
            self.on_local_timeout(sink);
        }
    }

    /// Handler for [`Event::TimeoutElapsed`]: an externally driven timer (the simulated clock)
    /// declared `view` failed. Ignored if the view has moved on since the timer was armed.
    pub(crate) fn on_timeout_elapsed(&mut self, event: TimeoutElapsedEvent, sink: &mut EventSink) {
        if event.view == self.synchronizer.current_view() {
            self.on_local_timeout(sink);
        }
    }

    /// Give up on the current view: sign and broadcast a timeout message, and count it toward
    /// the local tally. A second timeout in the same view re-broadcasts the recorded message
    /// instead of signing a new one.
    pub(crate) fn on_local_timeout(&mut self, sink: &mut EventSink) {
        let view = self.synchronizer.current_view();
        if let Some(last) = self.synchronizer.last_timeout() {
            if last.view == view {
                let msg = last.clone();
                self.synchronizer.rearm_deadline();
                self.config.timeout(msg);
                return;
            }
        }

        self.synchronizer.view_timed_out();
        let sync_info = self.synchronizer.sync_info();
        let signature = self.signer.sign_timeout(view, sync_info.high_qc_view());
        let msg = TimeoutMessage {
            id: self.id,
            view,
            sync_info,
            signature,
        };
        log::debug!("replica {}: view {} timed out", self.id, view);
        self.synchronizer.set_last_timeout(msg.clone());
        self.synchronizer.rearm_deadline();
        self.config.timeout(msg.clone());
        self.on_timeout_message(msg, sink);
    }

    /// Handler for [`Event::Timeout`]: verify and tally a peer's timeout message; at quorum,
    /// assemble the timeout certificate (and, for rule variants that need it, the aggregated QC)
    /// and advance.
    pub(crate) fn on_timeout_message(&mut self, msg: TimeoutMessage, sink: &mut EventSink) {
        if msg.view < self.synchronizer.current_view() {
            log::debug!(
                "replica {}: stale timeout for view {} from {}",
                self.id,
                msg.view,
                msg.id
            );
            return;
        }
        if !self.signer.verify_timeout_message(&msg) {
            log::debug!(
                "replica {}: invalid timeout signature from {}",
                self.id,
                msg.id
            );
            return;
        }

        let quorum = self.config.quorum_size();
        // adopt any usable certificate the sender attached
        if let Some(qc) = &msg.sync_info.qc {
            if self.signer.verify_quorum_cert(qc, quorum) {
                self.synchronizer.update_high_qc(qc.clone());
            }
        }

        let Some((view, tally)) = self.synchronizer.record_timeout(msg, quorum) else {
            return;
        };
        let tc = match self.signer.create_timeout_cert(view, &tally) {
            Ok(tc) => tc,
            Err(err) => {
                log::debug!("replica {}: failed to assemble tc: {}", self.id, err);
                return;
            }
        };
        log::debug!("replica {}: collected tc for view {}", self.id, view);

        if self.rules.uses_aggregate_qc() {
            let genesis_qc = QuorumCertificate::genesis_qc(self.chain.borrow().genesis_hash());
            if let Ok(agg) = self.signer.create_aggregate_qc(view, &genesis_qc, &tally) {
                self.synchronizer.set_pending_agg_qc(agg);
            }
        }

        let best_qc = tally
            .values()
            .filter_map(|timeout| timeout.sync_info.qc.clone())
            .max_by_key(|qc| qc.view);
        let mut sync_info = SyncInfo::new().with_tc(tc);
        if let Some(qc) = best_qc {
            sync_info = sync_info.with_qc(qc);
        }
        self.advance_view(&sync_info, sink);
    }

    /// Handler for [`Event::NewView`]: fold the sender's evidence into our own view state.
    pub(crate) fn on_new_view(&mut self, msg: NewViewMessage, sink: &mut EventSink) {
        self.advance_view(&msg.sync_info, sink);
    }
}

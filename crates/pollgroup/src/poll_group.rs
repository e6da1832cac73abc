//! Per-thread poll group
//!
//! A `PollGroup` is created on, used on, and dropped on one event-loop
//! thread. It holds boxed transport poll groups and I/O channels, neither
//! of which is `Send`, so the compiler keeps every other thread out; they
//! reach it only by posting a message to its thread.
//!
//! Owns:
//! - one transport poll group per registered transport, in creation order
//! - one subsystem slot per subsystem id, holding that subsystem's
//!   namespace channels on this thread
//! - the qpairs bound to it
//! - the id of its poller, while registered

use pollgroup_core::{
    IoChannel, PollError, PollGroupId, PollGroupRef, PollerId, Qpair, QpairId, QpairState,
    Subsystem, SubsystemId, ThreadId, Transport, TransportPollGroup,
};
use tracing::{debug, error, trace};

use crate::error::{AdmitError, Result, TargetError};

#[derive(Default)]
struct SubsystemSlot {
    attached: bool,
    channels: Vec<Box<dyn IoChannel>>,
}

impl SubsystemSlot {
    fn close(&mut self) -> usize {
        let n = self.channels.len();
        for ch in self.channels.drain(..) {
            ch.close();
        }
        self.attached = false;
        n
    }
}

pub struct PollGroup {
    id: PollGroupId,
    thread: ThreadId,
    tgroups: Vec<Box<dyn TransportPollGroup>>,
    sgroups: Vec<SubsystemSlot>,
    qpairs: Vec<Qpair>,
    poller: Option<PollerId>,
}

impl PollGroup {
    /// Empty poll group with `num_slots` subsystem slots.
    pub fn new(id: PollGroupId, thread: ThreadId, num_slots: u32) -> Result<Self> {
        let mut sgroups = Vec::new();
        sgroups
            .try_reserve_exact(num_slots as usize)
            .map_err(|_| TargetError::ResourceExhausted("subsystem slot array"))?;
        sgroups.resize_with(num_slots as usize, SubsystemSlot::default);
        Ok(Self {
            id,
            thread,
            tgroups: Vec::new(),
            sgroups,
            qpairs: Vec::new(),
            poller: None,
        })
    }

    #[inline]
    pub fn id(&self) -> PollGroupId {
        self.id
    }

    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn group_ref(&self) -> PollGroupRef {
        PollGroupRef {
            id: self.id,
            thread: self.thread,
        }
    }

    pub(crate) fn set_poller(&mut self, poller: PollerId) {
        self.poller = Some(poller);
    }

    pub(crate) fn take_poller(&mut self) -> Option<PollerId> {
        self.poller.take()
    }

    /// Create this group's poll group for `transport`.
    ///
    /// Returns `false` if one of the same kind already exists.
    pub fn add_transport(&mut self, transport: &dyn Transport) -> Result<bool> {
        let kind = transport.kind();
        if self.tgroups.iter().any(|tg| tg.kind() == kind) {
            return Ok(false);
        }
        let tgroup = transport.create_poll_group()?;
        self.tgroups.push(tgroup);
        debug!(group = %self.id, %kind, "transport poll group created");
        Ok(true)
    }

    /// Open a channel to every namespace of `subsystem` into slot `sid`.
    ///
    /// All or nothing: if any channel fails to open, the ones already
    /// opened are closed again.
    pub fn attach_subsystem(&mut self, sid: SubsystemId, subsystem: &dyn Subsystem) -> Result<()> {
        let slot = self
            .sgroups
            .get_mut(sid.index())
            .ok_or(TargetError::InvalidSubsystem(sid))?;
        if slot.attached {
            return Ok(());
        }
        for ns in subsystem.namespaces() {
            match ns.open_channel() {
                Ok(ch) => slot.channels.push(ch),
                Err(e) => {
                    slot.close();
                    return Err(e.into());
                }
            }
        }
        slot.attached = true;
        trace!(group = %self.id, %sid, channels = slot.channels.len(), "subsystem attached");
        Ok(())
    }

    /// Close every channel in slot `sid`. Returns `false` if it was empty.
    pub fn detach_subsystem(&mut self, sid: SubsystemId) -> bool {
        match self.sgroups.get_mut(sid.index()) {
            Some(slot) if slot.attached => {
                slot.close();
                true
            }
            _ => false,
        }
    }

    /// Bind `qpair` through the transport poll group of its kind.
    ///
    /// On failure the qpair is dropped in the state it arrived in.
    pub fn add_qpair(&mut self, mut qpair: Qpair) -> std::result::Result<(), AdmitError> {
        let kind = qpair.kind();
        let tgroup = self
            .tgroups
            .iter_mut()
            .find(|tg| tg.kind() == kind)
            .ok_or(AdmitError::NoTransportGroup(kind))?;
        tgroup
            .add(&mut qpair)
            .map_err(AdmitError::TransportRejected)?;
        qpair.activate();
        trace!(group = %self.id, qpair = %qpair.id(), "qpair bound");
        self.qpairs.push(qpair);
        Ok(())
    }

    /// Take `id` out of this group.
    pub fn remove_qpair(&mut self, id: QpairId) -> Option<Qpair> {
        let pos = self.qpairs.iter().position(|q| q.id() == id)?;
        Some(self.qpairs.remove(pos))
    }

    /// Disconnect the first qpair not yet disconnected.
    pub fn disconnect_first(&mut self) -> Option<QpairId> {
        let qpair = self
            .qpairs
            .iter_mut()
            .find(|q| q.state() != QpairState::Disconnected)?;
        qpair.disconnect();
        Some(qpair.id())
    }

    /// One pass of the poll loop.
    ///
    /// Polls transport poll groups in creation order and sums their work.
    /// The first failure ends the pass; later groups are not polled.
    pub fn poll(&mut self) -> std::result::Result<usize, PollError> {
        let mut total = 0;
        for tgroup in &mut self.tgroups {
            match tgroup.poll() {
                Ok(n) => total += n,
                Err(e) => {
                    error!(group = %self.id, error = %e, "transport poll group failed");
                    return Err(e);
                }
            }
        }
        Ok(total)
    }

    /// Release every transport poll group, channel and qpair.
    pub fn destroy(&mut self) {
        self.tgroups.clear();
        let closed: usize = self.sgroups.iter_mut().map(SubsystemSlot::close).sum();
        self.sgroups = Vec::new();
        self.qpairs.clear();
        trace!(group = %self.id, closed, "poll group resources released");
    }

    pub fn num_transport_groups(&self) -> usize {
        self.tgroups.len()
    }

    pub fn num_qpairs(&self) -> usize {
        self.qpairs.len()
    }

    /// Open I/O channels across all subsystem slots.
    pub fn open_channels(&self) -> usize {
        self.sgroups.iter().map(|s| s.channels.len()).sum()
    }

    pub fn qpair_state(&self, id: QpairId) -> Option<QpairState> {
        self.qpairs.iter().find(|q| q.id() == id).map(|q| q.state())
    }
}

impl Drop for PollGroup {
    fn drop(&mut self) {
        self.destroy();
    }
}

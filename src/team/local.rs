//! In-process team: one thread per place, connected by channels.
//!
//! Every ordered pair of places has a FIFO channel carrying collective
//! frames. Each frame is tagged with the collective that produced it, so two
//! places calling collectives in a different order get a transport error
//! rather than silently reading each other's bytes. Posts travel through a
//! per-place inbox and are acknowledged through a per-place ack channel.

use super::{Delivery, Place, Posted, Team, Ticket};
use crate::error::{DistError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectiveKind {
    Barrier,
    AllToAll,
    AllToAllV,
    AllGather,
    Broadcast,
    Gather,
}

struct Frame {
    kind: CollectiveKind,
    bytes: Vec<u8>,
}

struct Ack {
    seq: u64,
    outcome: Delivery,
}

pub struct LocalTeam {
    place: Place,
    size: usize,
    /// Indexed by destination.
    to_peer: Vec<Sender<Frame>>,
    /// Indexed by source.
    from_peer: Vec<Receiver<Frame>>,
    inboxes: Vec<Sender<Posted>>,
    inbox: Receiver<Posted>,
    ack_senders: Vec<Sender<Ack>>,
    acks: Receiver<Ack>,
    /// Acks that arrived while waiting for a different ticket.
    stashed_acks: Mutex<FxHashMap<u64, Delivery>>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for LocalTeam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTeam")
            .field("place", &self.place)
            .field("size", &self.size)
            .finish()
    }
}

fn disconnected(peer: usize) -> DistError {
    DistError::Transport(format!("place {peer} disconnected"))
}

impl LocalTeam {
    /// Build a connected group of `size` places; element `p` is place `p`'s handle.
    pub fn group(size: usize) -> Vec<LocalTeam> {
        // pairs[src][dst]
        let mut senders: Vec<Vec<Option<Sender<Frame>>>> = Vec::with_capacity(size);
        let mut receivers: Vec<Vec<Option<Receiver<Frame>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        for src in 0..size {
            let mut row = Vec::with_capacity(size);
            for dst_receivers in receivers.iter_mut() {
                let (tx, rx) = unbounded();
                row.push(Some(tx));
                dst_receivers[src] = Some(rx);
            }
            senders.push(row);
        }

        let (inbox_tx, inbox_rx): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let (ack_tx, ack_rx): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();

        senders
            .into_iter()
            .zip(receivers)
            .zip(inbox_rx.into_iter().zip(ack_rx))
            .enumerate()
            .map(|(p, ((to_peer, from_peer), (inbox, acks)))| LocalTeam {
                place: Place::new(p),
                size,
                to_peer: to_peer.into_iter().flatten().collect(),
                from_peer: from_peer.into_iter().flatten().collect(),
                inboxes: inbox_tx.clone(),
                inbox,
                ack_senders: ack_tx.clone(),
                acks,
                stashed_acks: Mutex::new(FxHashMap::default()),
                next_seq: AtomicU64::new(0),
            })
            .collect()
    }

    fn send_frame(&self, dest: usize, kind: CollectiveKind, bytes: Vec<u8>) -> Result<()> {
        self.to_peer[dest]
            .send(Frame { kind, bytes })
            .map_err(|_| disconnected(dest))
    }

    fn recv_frame(&self, source: usize, kind: CollectiveKind) -> Result<Vec<u8>> {
        let frame = self.from_peer[source]
            .recv()
            .map_err(|_| disconnected(source))?;
        if frame.kind != kind {
            return Err(DistError::Transport(format!(
                "place {} expected {:?} from place {}, got {:?}",
                self.place, kind, source, frame.kind
            )));
        }
        Ok(frame.bytes)
    }

    /// Send one buffer to every place, then receive one from every place.
    fn exchange(&self, kind: CollectiveKind, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        if outgoing.len() != self.size {
            return Err(DistError::Transport(format!(
                "{:?} needs {} buffers, got {}",
                kind,
                self.size,
                outgoing.len()
            )));
        }
        for (dest, bytes) in outgoing.into_iter().enumerate() {
            self.send_frame(dest, kind, bytes)?;
        }
        (0..self.size)
            .map(|source| self.recv_frame(source, kind))
            .collect()
    }

    fn check_place(&self, place: Place) -> Result<()> {
        if place.index() >= self.size {
            return Err(DistError::Transport(format!(
                "place {} is outside a team of {}",
                place, self.size
            )));
        }
        Ok(())
    }
}

impl Team for LocalTeam {
    fn place(&self) -> Place {
        self.place
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<()> {
        self.exchange(CollectiveKind::Barrier, vec![Vec::new(); self.size])
            .map(|_| ())
    }

    fn all_to_all(&self, send: &[u64]) -> Result<Vec<u64>> {
        let outgoing = send.iter().map(|v| v.to_le_bytes().to_vec()).collect();
        self.exchange(CollectiveKind::AllToAll, outgoing)?
            .into_iter()
            .enumerate()
            .map(|(source, bytes)| {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    DistError::Transport(format!("malformed size from place {source}"))
                })?;
                Ok(u64::from_le_bytes(raw))
            })
            .collect()
    }

    fn all_to_all_v(&self, send: Vec<Vec<u8>>, recv_sizes: &[u64]) -> Result<Vec<Vec<u8>>> {
        let received = self.exchange(CollectiveKind::AllToAllV, send)?;
        for (source, (bytes, expected)) in received.iter().zip(recv_sizes).enumerate() {
            if bytes.len() as u64 != *expected {
                return Err(DistError::Transport(format!(
                    "place {} announced {} bytes but sent {}",
                    source,
                    expected,
                    bytes.len()
                )));
            }
        }
        Ok(received)
    }

    fn all_gather(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        self.exchange(CollectiveKind::AllGather, vec![bytes; self.size])
    }

    fn broadcast(&self, root: Place, bytes: Option<Vec<u8>>) -> Result<Vec<u8>> {
        self.check_place(root)?;
        if root == self.place {
            let bytes = bytes.ok_or_else(|| {
                DistError::Transport("broadcast root supplied no payload".to_string())
            })?;
            for dest in 0..self.size {
                self.send_frame(dest, CollectiveKind::Broadcast, bytes.clone())?;
            }
        }
        self.recv_frame(root.index(), CollectiveKind::Broadcast)
    }

    fn gather(&self, root: Place, bytes: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>> {
        self.check_place(root)?;
        self.send_frame(root.index(), CollectiveKind::Gather, bytes)?;
        if root != self.place {
            return Ok(None);
        }
        (0..self.size)
            .map(|source| self.recv_frame(source, CollectiveKind::Gather))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn post(&self, dest: Place, bytes: Vec<u8>) -> Result<Ticket> {
        self.check_place(dest)?;
        let ticket = Ticket {
            origin: self.place,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        debug!(
            "place {} posting {} bytes to place {} (seq {})",
            self.place,
            bytes.len(),
            dest,
            ticket.seq
        );
        self.inboxes[dest.index()]
            .send(Posted {
                source: self.place,
                ticket,
                bytes,
            })
            .map_err(|_| disconnected(dest.index()))?;
        Ok(ticket)
    }

    fn next_posted(&self, timeout: Duration) -> Result<Option<Posted>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(posted) => Ok(Some(posted)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DistError::Transport(
                "every sender to this inbox is gone".to_string(),
            )),
        }
    }

    fn acknowledge(&self, posted: &Posted, outcome: Delivery) -> Result<()> {
        let origin = posted.ticket.origin;
        self.check_place(origin)?;
        self.ack_senders[origin.index()]
            .send(Ack {
                seq: posted.ticket.seq,
                outcome,
            })
            .map_err(|_| disconnected(origin.index()))
    }

    fn poll_delivered(&self, ticket: Ticket, timeout: Duration) -> Result<Option<Delivery>> {
        if ticket.origin != self.place {
            return Err(DistError::Transport(format!(
                "ticket from place {} cannot be awaited at place {}",
                ticket.origin, self.place
            )));
        }
        if let Some(outcome) = self.stashed_acks.lock().remove(&ticket.seq) {
            return Ok(Some(outcome));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.acks.recv_timeout(remaining) {
                Ok(ack) if ack.seq == ticket.seq => return Ok(Some(ack.outcome)),
                Ok(ack) => {
                    self.stashed_acks.lock().insert(ack.seq, ack.outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Another waiter may have stashed ours meanwhile.
                    return Ok(self.stashed_acks.lock().remove(&ticket.seq));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DistError::Transport(
                        "acknowledgement channel closed".to_string(),
                    ))
                }
            }
        }
    }
}

/// Run `f` once per place, each on its own thread with its own [`LocalTeam`],
/// and collect the results in place order.
///
/// The first failing place (in place order) determines the error. A place
/// that panics is reported as a transport error.
pub fn run_places<R, F>(size: usize, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(LocalTeam) -> Result<R> + Sync,
{
    let teams = LocalTeam::group(size);
    let f = &f;
    let outcomes: Vec<Result<R>> = std::thread::scope(|scope| {
        let handles: Vec<_> = teams
            .into_iter()
            .map(|team| {
                let place = team.place();
                let handle = std::thread::Builder::new()
                    .name(format!("place-{place}"))
                    .spawn_scoped(scope, move || f(team));
                (place, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(place, handle)| match handle {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    Err(DistError::Transport(format!("place {place} panicked")))
                }),
                Err(e) => Err(DistError::Transport(format!(
                    "failed to spawn place {place}: {e}"
                ))),
            })
            .collect()
    });
    outcomes.into_iter().collect()
}

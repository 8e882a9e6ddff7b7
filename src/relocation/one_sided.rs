//! One-sided move manager: ships requests to a single fixed destination
//! without involving any other place.
//!
//! The destination consumes posted payloads either by calling
//! [`deliver_incoming`] from its own control thread or by running a
//! [`Dispatcher`] in the background. A sender waiting on an acknowledgement
//! keeps serving its own inbox, so two places sending to each other do not
//! deadlock.

use super::{decode_batch, encode_batch, Encoder, MoveManager, Request};
use crate::context::PlaceContext;
use crate::error::{DistError, Result};
use crate::registry::DecoderId;
use crate::team::{Place, Ticket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct OneSidedMoveManager {
    ctx: PlaceContext,
    dest: Place,
    pending: Vec<Request>,
}

impl std::fmt::Debug for OneSidedMoveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneSidedMoveManager")
            .field("place", &self.ctx.place())
            .field("dest", &self.dest)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl OneSidedMoveManager {
    pub fn new(ctx: &PlaceContext, dest: Place) -> Result<Self> {
        if dest.index() >= ctx.size() {
            return Err(DistError::IllegalState(format!(
                "place {} is outside a team of {}",
                dest,
                ctx.size()
            )));
        }
        Ok(Self {
            ctx: ctx.clone(),
            dest,
            pending: Vec::new(),
        })
    }

    pub fn destination(&self) -> Place {
        self.dest
    }

    /// Post what encodes; a failed encoder's request is left out and its
    /// error is returned alongside the ticket for the rest.
    fn post_pending(&mut self) -> (Option<Ticket>, Option<DistError>) {
        if self.pending.is_empty() {
            return (None, None);
        }
        let requests = std::mem::take(&mut self.pending);
        let batch = encode_batch(self.ctx.place(), self.dest, requests);
        if batch.encoded == 0 {
            return (None, batch.first_error);
        }
        debug!(
            "place {} sending {} requests ({} bytes) to place {}",
            self.ctx.place(),
            batch.encoded,
            batch.bytes.len(),
            self.dest
        );
        match self.ctx.team().post(self.dest, batch.bytes) {
            Ok(ticket) => (Some(ticket), batch.first_error),
            Err(err) => (None, Some(batch.first_error.unwrap_or(err))),
        }
    }

    /// Ship every queued request and block until the destination has
    /// decoded them. A decode failure at the destination comes back as
    /// [`DistError::Remote`]. A local encoder failure is returned after the
    /// other requests have been delivered.
    pub fn send(&mut self) -> Result<()> {
        let (ticket, encode_error) = self.post_pending();
        let delivered = match ticket {
            Some(ticket) => wait_delivered(&self.ctx, self.dest, ticket),
            None => Ok(()),
        };
        match encode_error {
            Some(err) => Err(err),
            None => delivered,
        }
    }

    /// Ship every queued request and return once the bytes are posted.
    /// Decoding happens at the destination on its own schedule; wait on the
    /// handle to observe it. If an encoder fails, the requests that did
    /// encode are still posted and the error is returned instead of a handle.
    pub fn async_send(&mut self) -> Result<SendHandle> {
        let (ticket, encode_error) = self.post_pending();
        if let Some(err) = encode_error {
            return Err(err);
        }
        Ok(SendHandle {
            ctx: self.ctx.clone(),
            dest: self.dest,
            ticket,
        })
    }
}

impl MoveManager for OneSidedMoveManager {
    fn context(&self) -> &PlaceContext {
        &self.ctx
    }

    fn request_boxed(&mut self, dest: Place, decoder: DecoderId, encoder: Encoder) -> Result<()> {
        if dest != self.dest {
            return Err(DistError::WrongDestination {
                expected: self.dest,
                requested: dest,
            });
        }
        self.pending.push(Request::new(decoder, encoder));
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Completion of an [`OneSidedMoveManager::async_send`].
#[derive(Debug)]
#[must_use = "dropping the handle gives up on observing the remote decode"]
pub struct SendHandle {
    ctx: PlaceContext,
    dest: Place,
    ticket: Option<Ticket>,
}

impl SendHandle {
    /// Check once, without waiting, whether the destination has finished.
    pub fn is_delivered(&mut self) -> Result<bool> {
        let Some(ticket) = self.ticket else {
            return Ok(true);
        };
        match self.ctx.team().poll_delivered(ticket, Duration::ZERO)? {
            Some(outcome) => {
                self.ticket = None;
                outcome.map(|()| true).map_err(|message| DistError::Remote {
                    place: self.dest,
                    message,
                })
            }
            None => Ok(false),
        }
    }

    /// Block until the destination has decoded the payload.
    pub fn wait(self) -> Result<()> {
        match self.ticket {
            Some(ticket) => wait_delivered(&self.ctx, self.dest, ticket),
            None => Ok(()),
        }
    }
}

fn wait_delivered(ctx: &PlaceContext, dest: Place, ticket: Ticket) -> Result<()> {
    let poll = ctx.config().relocation.ack_poll();
    loop {
        if let Some(outcome) = ctx.team().poll_delivered(ticket, poll)? {
            return outcome.map_err(|message| DistError::Remote {
                place: dest,
                message,
            });
        }
        deliver_incoming(ctx, Duration::ZERO)?;
    }
}

/// Decode and acknowledge payloads posted to this place, waiting at most
/// `timeout` for the first one. Returns how many payloads were handled.
///
/// Decode failures are reported back to the sender, not returned here. If
/// another thread of this place is already delivering, returns 0 at once.
pub fn deliver_incoming(ctx: &PlaceContext, timeout: Duration) -> Result<usize> {
    let Some(_guard) = ctx.delivery_lock().try_lock() else {
        return Ok(0);
    };
    let team = ctx.team();
    let mut delivered = 0;
    let mut wait = timeout;
    while let Some(posted) = team.next_posted(wait)? {
        let outcome = decode_batch(ctx, posted.source, &posted.bytes);
        if let Err(err) = &outcome {
            warn!(
                "place {} failed to decode payload from place {}: {}",
                ctx.place(),
                posted.source,
                err
            );
        }
        team.acknowledge(&posted, outcome.map(|_| ()).map_err(|e| e.to_string()))?;
        delivered += 1;
        wait = Duration::ZERO;
    }
    Ok(delivered)
}

/// Background thread that delivers one-sided payloads as they arrive.
#[derive(Debug)]
pub struct Dispatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<usize>>>,
}

impl Dispatcher {
    pub fn spawn(ctx: &PlaceContext) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let ctx = ctx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("dispatch-{}", ctx.place()))
            .spawn(move || -> Result<usize> {
                let poll = ctx.config().relocation.dispatch_poll();
                let mut delivered = 0;
                while !flag.load(Ordering::Acquire) {
                    delivered += deliver_incoming(&ctx, poll)?;
                }
                // Drain whatever arrived before the stop request.
                delivered += deliver_incoming(&ctx, Duration::ZERO)?;
                info!(
                    "place {} dispatcher stopped after {} payloads",
                    ctx.place(),
                    delivered
                );
                Ok(delivered)
            })
            .map_err(|e| DistError::Transport(format!("failed to spawn dispatcher: {e}")))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and return how many payloads it delivered.
    pub fn stop(mut self) -> Result<usize> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<usize> {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(DistError::Transport("dispatcher panicked".to_string()))),
            None => Ok(0),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("dispatcher stopped with error: {}", err);
        }
    }
}

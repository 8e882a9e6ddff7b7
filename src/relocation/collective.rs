//! Collective move manager: every place calls [`CollectiveMoveManager::sync`]
//! together and all queued requests are exchanged in one round.

use super::{decode_batch, encode_batch, Encoder, MoveManager, Request};
use crate::context::PlaceContext;
use crate::error::{DistError, Result};
use crate::registry::DecoderId;
use crate::team::Place;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Traffic of one `sync` round as seen by the calling place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub requests_sent: usize,
    pub requests_received: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

pub struct CollectiveMoveManager {
    ctx: PlaceContext,
    pending: BTreeMap<Place, Vec<Request>>,
}

impl std::fmt::Debug for CollectiveMoveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectiveMoveManager")
            .field("place", &self.ctx.place())
            .field("pending", &self.pending())
            .finish()
    }
}

impl CollectiveMoveManager {
    pub fn new(ctx: &PlaceContext) -> Self {
        Self {
            ctx: ctx.clone(),
            pending: BTreeMap::new(),
        }
    }

    /// Collective: exchange every queued request with every place and run the
    /// decoders of everything received.
    ///
    /// Phases: encode per destination, exchange sizes, exchange bytes, decode
    /// per source in place order. A request whose encoder fails is left out
    /// of its destination's payload while the other requests still ship, and
    /// this place takes part in the exchange either way. The first encode or decode
    /// failure is returned after the round completes; nothing is rolled back.
    /// The queue is empty afterwards either way, ready for the next round.
    #[instrument(skip(self), level = "debug", fields(place = %self.ctx.place()))]
    pub fn sync(&mut self) -> Result<SyncReport> {
        let team = self.ctx.team();
        let size = team.size();
        let pending = std::mem::take(&mut self.pending);

        let mut report = SyncReport::default();
        let mut first_error: Option<DistError> = None;
        let mut buffers: Vec<Vec<u8>> = vec![Vec::new(); size];
        for (dest, requests) in pending {
            let batch = encode_batch(self.ctx.place(), dest, requests);
            report.requests_sent += batch.encoded;
            buffers[dest.index()] = batch.bytes;
            if let Some(err) = batch.first_error {
                first_error.get_or_insert(err);
            }
        }

        let sizes: Vec<u64> = buffers.iter().map(|b| b.len() as u64).collect();
        report.bytes_sent = sizes.iter().sum();
        let recv_sizes = team.all_to_all(&sizes)?;
        let received = team.all_to_all_v(buffers, &recv_sizes)?;
        report.bytes_received = recv_sizes.iter().sum();

        for (source, bytes) in received.iter().enumerate() {
            if bytes.is_empty() {
                continue;
            }
            match decode_batch(&self.ctx, Place::new(source), bytes) {
                Ok(count) => report.requests_received += count,
                Err(err) => {
                    warn!(
                        "place {} failed to decode payload from place {}: {}",
                        self.ctx.place(),
                        source,
                        err
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(
            "place {} sync: sent {} requests ({} bytes), received {} requests ({} bytes)",
            self.ctx.place(),
            report.requests_sent,
            report.bytes_sent,
            report.requests_received,
            report.bytes_received
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

impl MoveManager for CollectiveMoveManager {
    fn context(&self) -> &PlaceContext {
        &self.ctx
    }

    /// Requests for the calling place itself are dropped without running
    /// the encoder.
    fn request_boxed(&mut self, dest: Place, decoder: DecoderId, encoder: Encoder) -> Result<()> {
        if dest.index() >= self.ctx.size() {
            return Err(DistError::IllegalState(format!(
                "place {} is outside a team of {}",
                dest,
                self.ctx.size()
            )));
        }
        if dest == self.ctx.place() {
            debug!(
                "place {} skipping request {} addressed to itself",
                dest, decoder
            );
            return Ok(());
        }
        self.pending
            .entry(dest)
            .or_default()
            .push(Request::new(decoder, encoder));
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DecoderId;
    use crate::team::{run_places, Team};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_decoders_run_in_registration_order() {
        let logs = run_places(3, |team| {
            let ctx = PlaceContext::with_defaults(team);
            let collection = ctx.registry().allocate_collection();
            let id = DecoderId::new(collection, 0);
            let log = Arc::new(Mutex::new(Vec::new()));
            let sink = log.clone();
            ctx.registry().register(id, move |source, reader| {
                let value: u32 = reader.read()?;
                sink.lock().push((source.0, value));
                Ok(())
            })?;

            let me = ctx.place().0;
            let mut mm = CollectiveMoveManager::new(&ctx);
            for dest in ctx.places() {
                for k in 0..3u32 {
                    mm.request(dest, id, move |w| w.write(&(me * 10 + k)))?;
                }
            }
            assert_eq!(mm.pending(), 6);
            let report = mm.sync()?;
            assert_eq!(report.requests_sent, 6);
            assert_eq!(report.requests_received, 6);
            assert_eq!(mm.pending(), 0);

            // Reusable for a second round.
            if me == 0 {
                mm.request(Place(1), id, |w| w.write(&99u32))?;
            }
            mm.sync()?;
            let log = log.lock().clone();
            Ok(log)
        })
        .unwrap();

        assert_eq!(
            logs[0],
            vec![(1, 10), (1, 11), (1, 12), (2, 20), (2, 21), (2, 22)]
        );
        assert_eq!(logs[1].last(), Some(&(0, 99)));
        assert_eq!(logs[1].len(), 7);
    }

    #[test]
    fn test_encode_failure_does_not_stall_peers() {
        let results = run_places(2, |team| {
            let ctx = PlaceContext::with_defaults(team);
            let id = DecoderId::new(ctx.registry().allocate_collection(), 0);
            ctx.registry().register(id, |_, reader| reader.read::<u8>().map(|_| ()))?;
            let mut mm = CollectiveMoveManager::new(&ctx);
            if ctx.place() == Place(0) {
                mm.request(Place(1), id, |_| Err(DistError::callback("cannot encode")))?;
            } else {
                mm.request(Place(0), id, |w| w.write(&1u8))?;
            }
            let outcome = mm.sync().map(|r| r.requests_received);
            ctx.team().barrier()?;
            Ok(outcome)
        })
        .unwrap();

        assert!(matches!(results[0], Err(DistError::Callback(_))));
        assert!(matches!(results[1], Ok(0)));
    }

    #[test]
    fn test_failed_encoder_is_left_out_of_its_batch() {
        let results = run_places(2, |team| {
            let ctx = PlaceContext::with_defaults(team);
            let id = DecoderId::new(ctx.registry().allocate_collection(), 0);
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = seen.clone();
            ctx.registry().register(id, move |_, reader| {
                sink.lock().push(reader.read::<u8>()?);
                Ok(())
            })?;
            let mut mm = CollectiveMoveManager::new(&ctx);
            if ctx.place() == Place(0) {
                mm.request(Place(1), id, |w| w.write(&1u8))?;
                mm.request(Place(1), id, |_| Err(DistError::callback("cannot encode")))?;
                mm.request(Place(1), id, |w| w.write(&3u8))?;
            }
            let outcome = mm.sync();
            let seen = seen.lock().clone();
            Ok((outcome, seen))
        })
        .unwrap();

        assert!(matches!(results[0].0, Err(DistError::Callback(_))));
        let report = results[1].0.as_ref().unwrap();
        assert_eq!(report.requests_received, 2);
        assert_eq!(results[1].1, vec![1, 3]);
    }

    #[test]
    fn test_unknown_decoder_surfaces_at_receiver() {
        let results = run_places(2, |team| {
            let ctx = PlaceContext::with_defaults(team);
            let id = DecoderId::new(ctx.registry().allocate_collection(), 7);
            let mut mm = CollectiveMoveManager::new(&ctx);
            if ctx.place() == Place(0) {
                mm.request(Place(1), id, |w| w.write(&0u8))?;
            }
            Ok(mm.sync().is_err())
        })
        .unwrap();
        assert_eq!(results, vec![false, true]);
    }
}

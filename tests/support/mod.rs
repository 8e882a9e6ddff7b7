use rangedist::{Chunk, DistChunkedList, Interval, LocalTeam, PlaceContext, Result};
use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test subscriber once per test binary; honours `RUST_LOG`.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[allow(dead_code)]
pub fn iv(from: i64, to: i64) -> Interval {
    Interval::new(from, to).expect("valid interval")
}

#[allow(dead_code)]
pub fn context(team: LocalTeam) -> PlaceContext {
    init_tracing();
    PlaceContext::with_defaults(team)
}

/// A list whose element at `i` is `i * 10`, with the given chunks added on
/// the calling place.
#[allow(dead_code)]
pub fn seeded_list(ctx: &PlaceContext, ranges: &[Interval]) -> Result<DistChunkedList<i64>> {
    let list = DistChunkedList::new(ctx)?;
    for range in ranges {
        list.add_chunk(Chunk::from_fn(*range, |i| i * 10)?)?;
    }
    Ok(list)
}

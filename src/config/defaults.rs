//! Default constants for rangedist configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Chunk Storage Defaults
// =============================================================================

/// Hard upper bound on the number of elements in one chunk.
/// Buffer offsets must stay addressable as 32-bit signed values on every
/// platform a place may run on.
pub const MAX_CHUNK_ELEMENTS: u64 = i32::MAX as u64;

/// Default per-collection chunk limit.
/// Collections may lower this, never raise it above [`MAX_CHUNK_ELEMENTS`].
pub const DEFAULT_MAX_CHUNK_ELEMENTS: u64 = MAX_CHUNK_ELEMENTS;

// =============================================================================
// Parallel Loop Defaults
// =============================================================================

/// Default number of parts a local parallel loop is split into.
/// Uses the number of CPU cores.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(DEFAULT_PARALLELISM)
}

/// Fallback when the core count cannot be determined.
pub const DEFAULT_PARALLELISM: usize = 4;

// =============================================================================
// Relocation Defaults
// =============================================================================

/// How long a blocking one-sided send waits per poll for its acknowledgement
/// before checking the inbox again (milliseconds).
pub const DEFAULT_ACK_POLL_MILLIS: u64 = 10;

/// How long the background dispatcher waits per poll for an incoming
/// one-sided payload before re-checking its stop flag (milliseconds).
pub const DEFAULT_DISPATCH_POLL_MILLIS: u64 = 20;

// =============================================================================
// Environment
// =============================================================================

/// Prefix of environment variables read by [`DistConfig::load`](super::DistConfig::load).
pub const ENV_PREFIX: &str = "RANGEDIST_";

/// Separator between nested keys in environment variable names.
pub const ENV_SEPARATOR: &str = "__";

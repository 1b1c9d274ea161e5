//! Default configuration constants for takepick.
//!
//! Shared between the config layer, the gate thresholds and the ranker so
//! that the documented defaults live in one place.

/// Analysis sample rate in Hz.
///
/// Every candidate is decoded to mono PCM at this rate before extraction.
/// 24kHz matches the native output of most neural speech synthesizers.
pub const SAMPLE_RATE: u32 = 24000;

/// Analysis frame length in samples (~43ms at 24kHz).
pub const FRAME_LEN: usize = 1024;

/// Hop between analysis frames in samples.
pub const HOP_LEN: usize = 512;

/// Shortest candidate that can be analyzed, in milliseconds.
///
/// Anything shorter cannot produce a stable pitch track and is rejected
/// as an extraction failure rather than scored.
pub const MIN_ANALYZABLE_MS: u32 = 250;

/// Length of the continuity window at each end of a candidate, in milliseconds.
///
/// Tonal distance compares the last window of the previous selection with
/// the first window of the candidate.
pub const CONTINUITY_WINDOW_MS: u32 = 500;

/// Number of log-spaced bands in a tonal profile.
pub const TONAL_BANDS: usize = 24;

/// Frame RMS below which a frame counts as unvoiced.
pub const VOICED_RMS_FLOOR: f32 = 0.01;

/// Pitch search range in Hz (covers adult narrators).
pub const PITCH_MIN_HZ: f32 = 70.0;
pub const PITCH_MAX_HZ: f32 = 400.0;

/// Echo delay search range in milliseconds.
///
/// The lower bound sits above the longest pitch period (and its first
/// rahmonic) so voicing periodicity is not mistaken for a reflection.
pub const ECHO_MIN_DELAY_MS: u32 = 40;
pub const ECHO_MAX_DELAY_MS: u32 = 250;

/// Frame length for cepstral echo analysis (~341ms at 24kHz).
pub const CEPSTRUM_LEN: usize = 8192;

/// Lower edge of the hiss analysis band in Hz.
pub const HISS_BAND_HZ: f32 = 4000.0;

/// Full octave, the default pitch-breakout limit.
pub const OCTAVE_SEMITONES: f64 = 12.0;

/// Typical narration speaking rate in characters per second.
pub const TARGET_CHARS_PER_SEC: f64 = 14.0;

/// Default number of candidates requested per top-up.
pub const TOPUP_BATCH_SIZE: u32 = 3;

/// Default number of top-up rounds before a chunk is declared exhausted.
pub const TOPUP_MAX_ROUNDS: u32 = 3;

/// Default number of attempts per synthesis request.
pub const SYNTH_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff delay after a transient synthesis failure.
pub const SYNTH_INITIAL_BACKOFF: &str = "500ms";

/// Default backoff ceiling.
pub const SYNTH_MAX_BACKOFF: &str = "30s";

/// Default per-request synthesis timeout.
pub const SYNTH_TIMEOUT: &str = "60s";

/// Number of ranked candidates considered for the top-3 validation metric.
pub const VALIDATION_TOP_K: usize = 3;

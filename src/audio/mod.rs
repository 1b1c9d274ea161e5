//! Audio decoding and signal analysis primitives.

pub mod decoder;
pub mod dsp;
pub mod wav;

pub use decoder::{AudioDecoder, CommandExecutor, FfmpegDecoder, SystemCommandExecutor, WavDecoder};
pub use wav::AudioBuffer;

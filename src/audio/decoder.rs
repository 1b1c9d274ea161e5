//! Candidate audio decoding with a testable command seam.
//!
//! Candidates arrive as files in whatever container the synthesizer emits.
//! WAV is decoded in-process; anything else goes through `ffmpeg`, invoked via
//! the `CommandExecutor` trait so tests never spawn processes.

use crate::audio::wav::AudioBuffer;
use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, TakepickError};
use std::io::Cursor;
use std::path::Path;
use std::process::Command;

/// Decodes a candidate's audio reference into analysis-format PCM.
pub trait AudioDecoder: Send + Sync {
    /// Decode the file at `path` to mono PCM at the analysis sample rate.
    fn decode(&self, path: &Path) -> Result<AudioBuffer>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Trait for executing system commands.
///
/// Object-safe, Send + Sync for use from extraction workers.
pub trait CommandExecutor: Send + Sync {
    /// Execute a command with arguments and return its raw stdout.
    fn execute(&self, command: &str, args: &[&str]) -> Result<Vec<u8>>;
}

/// Production command executor using std::process::Command.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn execute(&self, command: &str, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(command).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TakepickError::Other(format!("{} not found on PATH", command))
            } else {
                TakepickError::Other(format!("Failed to execute {}: {}", command, e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TakepickError::Other(format!(
                "{} failed with status {:?}: {}",
                command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

/// In-process WAV decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<AudioBuffer> {
        AudioBuffer::from_path(path)
    }

    fn name(&self) -> &str {
        "wav"
    }
}

/// Decoder that transcodes through `ffmpeg` to a WAV stream on stdout.
///
/// Plain `.wav` files skip the subprocess.
pub struct FfmpegDecoder<E: CommandExecutor> {
    executor: E,
    binary: String,
}

impl FfmpegDecoder<SystemCommandExecutor> {
    pub fn system(binary: &str) -> Self {
        Self::new(SystemCommandExecutor, binary)
    }
}

impl<E: CommandExecutor> FfmpegDecoder<E> {
    pub fn new(executor: E, binary: &str) -> Self {
        Self {
            executor,
            binary: binary.to_string(),
        }
    }
}

impl<E: CommandExecutor> AudioDecoder for FfmpegDecoder<E> {
    fn decode(&self, path: &Path) -> Result<AudioBuffer> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            return AudioBuffer::from_path(path);
        }

        let input = path.to_string_lossy();
        let rate = SAMPLE_RATE.to_string();
        let args = [
            "-nostdin",
            "-loglevel",
            "error",
            "-i",
            input.as_ref(),
            "-ac",
            "1",
            "-ar",
            rate.as_str(),
            "-f",
            "wav",
            "-",
        ];
        let stdout =
            self.executor
                .execute(&self.binary, &args)
                .map_err(|e| TakepickError::AudioDecode {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;

        AudioBuffer::from_reader(Cursor::new(stdout), &path.display().to_string())
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

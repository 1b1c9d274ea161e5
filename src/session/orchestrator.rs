//! Session runs: chunks in index order, top-up on exhaustion, resumable
//! progress and the final manifest.

use crate::audio::{AudioBuffer, AudioDecoder, FfmpegDecoder, WavDecoder};
use crate::config::{Config, DecoderKind};
use crate::error::{Result, TakepickError};
use crate::features::cache::{self, FeatureCache};
use crate::features::{AcousticExtractor, ExtractionContext, FeatureExtractor, FeatureVector};
use crate::gates::{GatePipeline, ThresholdConfig};
use crate::model::{Candidate, Chunk};
use crate::rank::{ConfidenceCutoffs, WeightConfig};
use crate::selection::{self, ChunkSelector, ChunkState, RunLog, SelectionConfig, SelectionLogEntry};
use crate::session::checklist::Checklist;
use crate::session::manifest::{ChunkFailure, CostConfig, SessionManifest};
use crate::session::store::{Progress, SessionStore};
use crate::session::synth::{
    NullSynthesizer, RetryPolicy, SynthesisRequest, Synthesizer, synthesize_with_retry,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Validated, immutable knobs for one orchestrator.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub thresholds: ThresholdConfig,
    pub weights: WeightConfig,
    pub confidence: ConfidenceCutoffs,
    pub selection: SelectionConfig,
    pub continuity_window_ms: u32,
    /// RMS below which trailing winner audio is not kept as continuity context.
    pub voiced_rms_floor: f32,
    /// Extraction worker threads; 0 uses available parallelism.
    pub workers: usize,
    pub topup_batch_size: u32,
    pub topup_max_rounds: u32,
    pub retry: RetryPolicy,
    pub cost: CostConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let config = Config::default();
        Self {
            thresholds: config.thresholds,
            weights: config.weights,
            confidence: config.confidence,
            selection: config.selection,
            continuity_window_ms: config.extraction.continuity_window_ms,
            voiced_rms_floor: config.extraction.voiced_rms_floor,
            workers: config.extraction.workers,
            topup_batch_size: config.topup.batch_size,
            topup_max_rounds: config.topup.max_rounds,
            retry: RetryPolicy::default(),
            cost: config.cost,
        }
    }
}

impl SessionSettings {
    /// Validate `config` and take the values a run needs.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            thresholds: config.thresholds.clone(),
            weights: config.weights.clone(),
            confidence: config.confidence.clone(),
            selection: config.selection.clone(),
            continuity_window_ms: config.extraction.continuity_window_ms,
            voiced_rms_floor: config.extraction.voiced_rms_floor,
            workers: config.extraction.workers,
            topup_batch_size: config.topup.batch_size,
            topup_max_rounds: config.topup.max_rounds,
            retry: config.topup.retry_policy()?,
            cost: config.cost.clone(),
        })
    }

    fn worker_count(&self, jobs: usize) -> usize {
        let wanted = if self.workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            self.workers
        };
        wanted.clamp(1, jobs.max(1))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Ignore the checklist and stored progress; decide every chunk again.
    pub run_all: bool,
    /// Never request synthesis; exhausted chunks stay exhausted.
    pub no_topup: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub manifest: SessionManifest,
    /// The session was already resolved and nothing ran.
    pub skipped: bool,
    /// Run number of the selection log written, if any chunk was processed.
    pub run: Option<u32>,
    pub synthesis_requests: usize,
}

struct ExtractionJob {
    candidate: Candidate,
    path: PathBuf,
}

struct Extracted {
    candidate: Candidate,
    audio_digest: Option<String>,
    context_digest: String,
    cached: bool,
    result: Result<FeatureVector>,
}

/// Result of driving one chunk to a terminal state.
struct ChunkOutcome {
    entry: SelectionLogEntry,
    failure: Option<ChunkFailure>,
    synthesis_requests: usize,
}

pub struct Orchestrator {
    store: SessionStore,
    settings: SessionSettings,
    extractor: Arc<dyn FeatureExtractor>,
    decoder: Arc<dyn AudioDecoder>,
    synthesizer: Arc<dyn Synthesizer>,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        store: SessionStore,
        settings: SessionSettings,
        extractor: Arc<dyn FeatureExtractor>,
        decoder: Arc<dyn AudioDecoder>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            store,
            settings,
            extractor,
            decoder,
            synthesizer,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Production wiring: acoustic extractor, configured decoder, and the
    /// HTTP synthesizer when an endpoint is set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = SessionSettings::from_config(config)?;
        let decoder: Arc<dyn AudioDecoder> = match config.audio.decoder {
            DecoderKind::Wav => Arc::new(WavDecoder),
            DecoderKind::Ffmpeg => Arc::new(FfmpegDecoder::system(&config.audio.ffmpeg_binary)),
        };
        let extractor = Arc::new(AcousticExtractor::new(config.extraction.clone()));
        Ok(Self::new(
            SessionStore::new(config.sessions_root()),
            settings,
            extractor,
            decoder,
            synthesizer_for(config)?,
        ))
    }

    /// Shared flag; setting it stops the run before the next chunk.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Decide every chunk of `session` and write its manifest.
    ///
    /// A session already on the checklist returns its stored manifest
    /// without touching anything. Otherwise the run resumes from the first
    /// chunk without a settled decision; decisions after that point are
    /// recomputed because their continuity context may change.
    pub async fn run(&self, session: &str, options: RunOptions) -> Result<RunOutcome> {
        let checklist = Checklist::new(self.store.root());
        if options.run_all {
            checklist.clear(session)?;
        } else if checklist.is_complete(session)? {
            if let Some(manifest) = self.store.load_manifest(session)? {
                tracing::info!(session, "session already resolved, skipping");
                return Ok(RunOutcome {
                    manifest,
                    skipped: true,
                    run: None,
                    synthesis_requests: 0,
                });
            }
            tracing::warn!(session, "session on checklist but manifest missing, rerunning");
        }

        let spec = self.store.load_session(session)?;
        let mut pools: BTreeMap<u32, Vec<Candidate>> = BTreeMap::new();
        for candidate in self.store.load_pool(session, &spec)? {
            pools.entry(candidate.chunk_index).or_default().push(candidate);
        }
        let mut progress = if options.run_all {
            Progress::default()
        } else {
            self.store.load_progress(session)?
        };

        let resume_at = spec.chunks.iter().position(|c| {
            !progress
                .entries
                .get(&c.index)
                .is_some_and(|e| e.state.is_settled())
        });

        let mut failures = Vec::new();
        let mut synthesis_requests = 0;
        let mut run = None;

        if let Some(start) = resume_at {
            let first = spec.chunks[start].index;
            if start > 0 {
                tracing::info!(session, chunk = first, "resuming from first unresolved chunk");
            }
            progress.entries.retain(|&index, _| index < first);

            let features_path = self.store.features_path(session);
            let mut feature_cache = FeatureCache::load(&features_path)?;
            let mut log = RunLog::create(&self.store.runs_dir(session))?;
            run = Some(log.run());
            let pipeline = GatePipeline::new(&self.settings.thresholds);

            let mut previous_tail = match start.checked_sub(1) {
                Some(prev) => progress
                    .entries
                    .get(&spec.chunks[prev].index)
                    .and_then(|e| e.selected.as_ref())
                    .and_then(|w| self.winner_tail(session, &w.candidate)),
                None => None,
            };

            for chunk in &spec.chunks[start..] {
                if self.cancel.load(Ordering::SeqCst) {
                    self.store.save_progress(session, &progress)?;
                    tracing::warn!(session, next_chunk = chunk.index, "run cancelled");
                    return Err(TakepickError::Cancelled {
                        next_chunk: chunk.index,
                    });
                }

                let initial = pools.remove(&chunk.index).unwrap_or_default();
                let outcome = self
                    .select_chunk(
                        session,
                        chunk,
                        initial,
                        previous_tail.clone(),
                        &mut feature_cache,
                        &pipeline,
                        options,
                    )
                    .await?;

                log.append(&outcome.entry)?;
                synthesis_requests += outcome.synthesis_requests;
                if let Some(failure) = outcome.failure {
                    failures.push(failure);
                }
                previous_tail = outcome
                    .entry
                    .selected
                    .as_ref()
                    .and_then(|w| self.winner_tail(session, &w.candidate));
                progress.entries.insert(chunk.index, outcome.entry);
                self.store.save_progress(session, &progress)?;
                feature_cache.save(&features_path)?;
            }
        }

        let manifest = self.build_manifest(session, &spec.chunks, &progress, failures)?;
        self.store.save_manifest(session, &manifest)?;
        if manifest.is_fully_resolved() {
            checklist.mark_complete(session)?;
        }

        let s = &manifest.summary;
        tracing::info!(
            session,
            resolved = s.resolved,
            flagged = s.flagged,
            exhausted = s.exhausted,
            blocked = s.blocked,
            synthesis_requests,
            "session run finished"
        );

        Ok(RunOutcome {
            manifest,
            skipped: false,
            run,
            synthesis_requests,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn select_chunk(
        &self,
        session: &str,
        chunk: &Chunk,
        initial: Vec<Candidate>,
        previous_tail: Option<Arc<AudioBuffer>>,
        feature_cache: &mut FeatureCache,
        pipeline: &GatePipeline,
        options: RunOptions,
    ) -> Result<ChunkOutcome> {
        let policy = self.settings.selection.low_confidence_policy;
        let mut selector = ChunkSelector::new(chunk.clone());
        selector.admit(initial)?;
        let mut last: Option<SelectionLogEntry> = None;
        let mut synthesis_requests = 0;

        loop {
            if selector.state() == ChunkState::Gating {
                let pending = selector.unevaluated();
                let extracted = self
                    .extract(session, chunk, pending, previous_tail.clone(), feature_cache)
                    .await?;
                for item in extracted {
                    if !item.cached
                        && let (Ok(features), Some(audio_digest)) = (&item.result, item.audio_digest)
                    {
                        feature_cache.insert(
                            item.candidate.id(),
                            audio_digest,
                            item.context_digest,
                            features.clone(),
                        );
                    }
                    selector.record(item.candidate.version, item.result, pipeline)?;
                }

                let entry =
                    selector.decide(&self.settings.weights, &self.settings.confidence, policy)?;
                if entry.state != ChunkState::Exhausted {
                    return Ok(ChunkOutcome {
                        entry,
                        failure: None,
                        synthesis_requests,
                    });
                }
                last = Some(entry);
            }

            let rounds = selector.topup_rounds();
            if options.no_topup || rounds >= self.settings.topup_max_rounds {
                let err = TakepickError::EmptyPool {
                    chunk_index: chunk.index,
                    rounds,
                };
                tracing::error!(session, chunk = chunk.index, error = %err, "chunk exhausted");
                return Ok(ChunkOutcome {
                    entry: self.exhausted_entry(chunk, last, rounds),
                    failure: Some(ChunkFailure {
                        chunk_index: chunk.index,
                        error: err.to_string(),
                    }),
                    synthesis_requests,
                });
            }

            selector.note_topup();
            let request = SynthesisRequest {
                session: session.to_string(),
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                count: self.settings.topup_batch_size,
                first_version: selector
                    .pool()
                    .iter()
                    .map(|c| c.version + 1)
                    .max()
                    .unwrap_or(0),
            };
            tracing::info!(
                session,
                chunk = chunk.index,
                round = selector.topup_rounds(),
                count = request.count,
                synthesizer = self.synthesizer.name(),
                "requesting top-up candidates"
            );
            synthesis_requests += 1;

            match synthesize_with_retry(self.synthesizer.as_ref(), &request, &self.settings.retry)
                .await
            {
                Ok(candidates) => {
                    let candidates: Vec<Candidate> = candidates
                        .into_iter()
                        .filter(|c| c.chunk_index == chunk.index)
                        .collect();
                    let before = selector.pool().len();
                    let added = selector.admit(candidates)?;
                    // only what the pool took is recorded, so reloads see the same pool
                    self.store.append_topup(session, &selector.pool()[before..])?;
                    tracing::debug!(chunk = chunk.index, added, "top-up admitted");
                }
                Err(err) => {
                    let rounds = selector.topup_rounds();
                    return Ok(ChunkOutcome {
                        entry: self.exhausted_entry(chunk, last, rounds),
                        failure: Some(ChunkFailure {
                            chunk_index: chunk.index,
                            error: err.to_string(),
                        }),
                        synthesis_requests,
                    });
                }
            }
        }
    }

    fn exhausted_entry(
        &self,
        chunk: &Chunk,
        last: Option<SelectionLogEntry>,
        rounds: u32,
    ) -> SelectionLogEntry {
        let mut entry = last.unwrap_or_else(|| {
            selection::decide(
                chunk.index,
                &[],
                &self.settings.weights,
                &self.settings.confidence,
                self.settings.selection.low_confidence_policy,
            )
        });
        entry.topup_rounds = rounds;
        entry
    }

    /// Extract features for `candidates` on a blocking worker pool.
    async fn extract(
        &self,
        session: &str,
        chunk: &Chunk,
        candidates: Vec<Candidate>,
        previous_tail: Option<Arc<AudioBuffer>>,
        feature_cache: &mut FeatureCache,
    ) -> Result<Vec<Extracted>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let jobs: Vec<ExtractionJob> = candidates
            .into_iter()
            .map(|candidate| ExtractionJob {
                path: self.store.audio_path(session, &candidate),
                candidate,
            })
            .collect();
        let workers = self.settings.worker_count(jobs.len());
        let extractor = Arc::clone(&self.extractor);
        let decoder = Arc::clone(&self.decoder);
        let chunk = chunk.clone();
        let snapshot = std::mem::take(feature_cache);

        let (snapshot, results) = tokio::task::spawn_blocking(move || {
            let results = extract_all(
                jobs,
                &chunk,
                previous_tail.as_deref(),
                &snapshot,
                extractor.as_ref(),
                decoder.as_ref(),
                workers,
            );
            (snapshot, results)
        })
        .await
        .map_err(|e| TakepickError::Other(format!("extraction workers failed: {}", e)))?;

        *feature_cache = snapshot;
        Ok(results)
    }

    fn winner_tail(&self, session: &str, winner: &Candidate) -> Option<Arc<AudioBuffer>> {
        let path = self.store.audio_path(session, winner);
        match self.decoder.decode(&path) {
            Ok(audio) => {
                let tail = audio.audible_tail_buffer(
                    self.settings.continuity_window_ms,
                    self.settings.voiced_rms_floor,
                );
                if tail.is_none() {
                    tracing::debug!(
                        candidate = %winner.id(),
                        "selected candidate is silent, next chunk runs without continuity context"
                    );
                }
                tail.map(Arc::new)
            }
            Err(e) => {
                tracing::warn!(
                    candidate = %winner.id(),
                    error = %e,
                    "cannot decode selected candidate, next chunk runs without continuity context"
                );
                None
            }
        }
    }

    fn build_manifest(
        &self,
        session: &str,
        chunks: &[Chunk],
        progress: &Progress,
        failures: Vec<ChunkFailure>,
    ) -> Result<SessionManifest> {
        let entries: Vec<SelectionLogEntry> = chunks
            .iter()
            .filter_map(|c| progress.entries.get(&c.index).cloned())
            .collect();
        let spec = self.store.load_session(session)?;
        let bar = self.settings.selection.prefilter_quality_bar;
        let below_prefilter = self
            .store
            .load_pool(session, &spec)?
            .iter()
            .filter(|c| c.quality_score < bar)
            .count();
        Ok(SessionManifest::build(
            session,
            chunks.len(),
            entries,
            failures,
            below_prefilter,
            &self.settings.cost,
        ))
    }
}

fn synthesizer_for(config: &Config) -> Result<Arc<dyn Synthesizer>> {
    match &config.topup.synth_url {
        #[cfg(feature = "http-synth")]
        Some(url) => Ok(Arc::new(crate::session::synth::HttpSynthesizer::new(
            url,
            config.topup.timeout()?,
        )?)),
        #[cfg(not(feature = "http-synth"))]
        Some(url) => {
            tracing::warn!(url = %url, "built without http-synth, top-up disabled");
            Ok(Arc::new(NullSynthesizer))
        }
        None => Ok(Arc::new(NullSynthesizer)),
    }
}

/// Fan jobs out over `workers` scoped threads; results come back in
/// version order.
fn extract_all(
    jobs: Vec<ExtractionJob>,
    chunk: &Chunk,
    previous_tail: Option<&AudioBuffer>,
    feature_cache: &FeatureCache,
    extractor: &dyn FeatureExtractor,
    decoder: &dyn AudioDecoder,
    workers: usize,
) -> Vec<Extracted> {
    let (job_tx, job_rx) = crossbeam_channel::bounded::<ExtractionJob>(workers * 2);
    let (out_tx, out_rx) = crossbeam_channel::unbounded::<Extracted>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let out_tx = out_tx.clone();
            scope.spawn(move || {
                for job in job_rx.iter() {
                    let done =
                        extract_one(job, chunk, previous_tail, feature_cache, extractor, decoder);
                    if out_tx.send(done).is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_tx);
        for job in jobs {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);
    });

    let mut results: Vec<Extracted> = out_rx.try_iter().collect();
    results.sort_by_key(|e| e.candidate.version);
    results
}

fn extract_one(
    job: ExtractionJob,
    chunk: &Chunk,
    previous_tail: Option<&AudioBuffer>,
    feature_cache: &FeatureCache,
    extractor: &dyn FeatureExtractor,
    decoder: &dyn AudioDecoder,
) -> Extracted {
    let id = job.candidate.id();
    let context = ExtractionContext::new(id, chunk).with_previous(previous_tail);
    let context_digest = cache::context_digest(&context);
    let fail = |message: String| TakepickError::Extraction {
        chunk_index: id.chunk_index,
        version: id.version,
        message,
    };

    let bytes = match fs::read(&job.path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Extracted {
                candidate: job.candidate,
                audio_digest: None,
                context_digest,
                cached: false,
                result: Err(fail(format!("cannot read {}: {}", job.path.display(), e))),
            };
        }
    };
    let audio_digest = cache::digest_bytes(&bytes);

    if let Some(features) = feature_cache.lookup(id, &audio_digest, &context_digest) {
        tracing::debug!(candidate = %id, "feature cache hit");
        return Extracted {
            candidate: job.candidate,
            audio_digest: Some(audio_digest),
            context_digest,
            cached: true,
            result: Ok(features.clone()),
        };
    }

    let result = decoder
        .decode(&job.path)
        .map_err(|e| fail(e.to_string()))
        .and_then(|audio| extractor.extract(&audio, &context));
    Extracted {
        candidate: job.candidate,
        audio_digest: Some(audio_digest),
        context_digest,
        cached: false,
        result,
    }
}

//! End-to-end selection runs against a session directory on disk.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use takepick::audio::WavDecoder;
use takepick::features::{ContextFlags, Feature, FeatureVector, MockExtractor};
use takepick::selection::log::LOG_FILE;
use takepick::selection::{ChunkState, read_log};
use takepick::session::{
    MockSynthesizer, RetryPolicy, SessionSettings, SessionSpec, Synthesizer,
};
use takepick::rank::Confidence;
use takepick::{
    Candidate, CandidateId, Chunk, Orchestrator, RunOptions, SessionStore, validate,
};

fn clean() -> FeatureVector {
    FeatureVector::new(ContextFlags::default())
        .with(Feature::DurationSecs, 2.0)
        .with(Feature::CharsPerSec, 14.0)
        .with(Feature::PitchRangeSemitones, 8.0)
        .with(Feature::MaxPitchJumpSemitones, 3.0)
        .with(Feature::CentroidJumpRatio, 1.3)
        .with(Feature::CepstralPeak, 0.05)
        .with(Feature::AutocorrEcho, 0.1)
        .with(Feature::HfFlatness, 0.2)
        .with(Feature::NoiseFloorDb, -60.0)
        .with(Feature::TonalDistance, 1.0)
}

fn id(chunk_index: u32, version: u32) -> CandidateId {
    CandidateId {
        chunk_index,
        version,
    }
}

fn write_wav(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 24000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..12000 {
        let t = i as f32 / 24000.0;
        let s = (t * 180.0 * std::f32::consts::TAU).sin() * 0.25;
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Write one session whose chunk `i` has `qualities[i].len()` candidates.
fn write_session(store: &SessionStore, session: &str, qualities: &[&[f64]]) {
    let mut candidates = Vec::new();
    for (chunk, versions) in qualities.iter().enumerate() {
        for (version, &q) in versions.iter().enumerate() {
            let rel = format!("takes/c{}_v{}.wav", chunk, version);
            write_wav(&store.session_dir(session).join(&rel));
            candidates.push(Candidate::new(chunk as u32, version as u32, rel).with_quality(q));
        }
    }
    let spec = SessionSpec {
        chunks: (0..qualities.len() as u32)
            .map(|i| Chunk::new(i, "The quick brown fox jumps over the lazy dog."))
            .collect(),
        candidates,
    };
    store.save_session(session, &spec).unwrap();
}

fn settings() -> SessionSettings {
    SessionSettings {
        workers: 2,
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(1),
            multiplier: 2.0,
        },
        ..SessionSettings::default()
    }
}

fn orchestrator(
    store: &SessionStore,
    extractor: MockExtractor,
    synthesizer: Arc<dyn Synthesizer>,
) -> Orchestrator {
    Orchestrator::new(
        store.clone(),
        settings(),
        Arc::new(extractor),
        Arc::new(WavDecoder),
        synthesizer,
    )
}

#[tokio::test]
async fn pitch_breakouts_are_removed_and_best_survivor_wins() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    write_session(&store, "ep01", &[&[0.99, 0.95, 0.5, 0.45, 0.3]]);

    let breakout = clean().with(Feature::MaxPitchJumpSemitones, 15.0);
    let extractor = MockExtractor::new()
        .with_fallback(clean())
        .with_vector(id(0, 0), breakout.clone())
        .with_vector(id(0, 3), breakout);
    let orch = orchestrator(&store, extractor, Arc::new(MockSynthesizer::new()));

    let outcome = orch.run("ep01", RunOptions::default()).await.unwrap();
    let entry = outcome.manifest.entry(0).unwrap();

    assert_eq!(entry.state, ChunkState::Selected);
    assert_eq!(entry.total_candidates, 5);
    assert_eq!(entry.eliminated.len(), 2);
    for record in &entry.eliminated {
        assert!(
            record
                .reason_codes()
                .iter()
                .any(|r| r.starts_with("pitch_breakout:")),
            "unexpected reasons {:?}",
            record.reason_codes()
        );
    }
    let remaining: Vec<u32> = entry.remaining.iter().map(|r| r.version()).collect();
    assert_eq!(remaining, vec![1, 2, 4]);
    assert_eq!(entry.selected_version(), Some(1));
    assert!(entry.margin.unwrap() >= settings().confidence.high_margin);
    assert_eq!(entry.confidence, Confidence::High);
    assert!(!entry.needs_human_review);
}

#[tokio::test]
async fn all_echoey_chunk_requests_topup_and_ends_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    write_session(&store, "ep02", &[&[0.9, 0.8, 0.7], &[0.9]]);

    let echo = clean().with(Feature::AutocorrEcho, 0.8);
    let extractor = MockExtractor::new()
        .with_fallback(clean())
        .with_vector(id(0, 0), echo.clone())
        .with_vector(id(0, 1), echo.clone())
        .with_vector(id(0, 2), echo);
    let synth = Arc::new(MockSynthesizer::new());
    let orch = orchestrator(&store, extractor, synth.clone());

    let outcome = orch.run("ep02", RunOptions::default()).await.unwrap();
    let entry = outcome.manifest.entry(0).unwrap();

    assert_eq!(entry.state, ChunkState::Exhausted);
    assert!(entry.needs_human_review);
    assert!(entry.selected.is_none());
    assert!(
        entry
            .eliminated
            .iter()
            .all(|r| r.reason_codes().iter().any(|c| c.starts_with("echo_risk:")))
    );

    let requests = synth.requests();
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|r| r.chunk_index == 0));
    assert_eq!(requests[0].first_version, 3);
    assert_eq!(requests[0].count, settings().topup_batch_size);

    // The next chunk is still decided
    assert_eq!(outcome.manifest.entry(1).unwrap().state, ChunkState::Selected);
    assert!(outcome.manifest.has_exhausted());
    assert_eq!(outcome.manifest.failures.len(), 1);
}

#[tokio::test]
async fn identical_inputs_give_byte_identical_logs() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    write_session(&store, "ep03", &[&[0.7, 0.71, 0.69], &[0.5, 0.9], &[0.8]]);
    let orch = orchestrator(
        &store,
        MockExtractor::new().with_fallback(clean()),
        Arc::new(MockSynthesizer::new()),
    );

    let options = RunOptions {
        run_all: true,
        no_topup: false,
    };
    let first = orch.run("ep03", options).await.unwrap();
    let second = orch.run("ep03", options).await.unwrap();
    assert_eq!(first.run, Some(1));
    assert_eq!(second.run, Some(2));

    let runs = store.runs_dir("ep03");
    let a = fs::read(runs.join("0001").join(LOG_FILE)).unwrap();
    let b = fs::read(runs.join("0002").join(LOG_FILE)).unwrap();
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

#[tokio::test]
async fn rerun_of_resolved_session_does_no_work() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    write_session(&store, "ep04", &[&[0.9, 0.4], &[0.6]]);
    let synth = Arc::new(MockSynthesizer::new());
    let orch = orchestrator(
        &store,
        MockExtractor::new().with_fallback(clean()),
        synth.clone(),
    );

    let first = orch.run("ep04", RunOptions::default()).await.unwrap();
    assert!(first.manifest.is_fully_resolved());

    let second = orch.run("ep04", RunOptions::default()).await.unwrap();
    assert!(second.skipped);
    assert_eq!(second.manifest, first.manifest);
    assert_eq!(synth.calls(), 0);
    assert!(!store.runs_dir("ep04").join("0002").exists());
}

#[tokio::test]
async fn unresolved_session_resumes_and_keeps_settled_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    write_session(&store, "ep05", &[&[0.9], &[0.8, 0.7], &[0.6]]);

    // First pass: chunk 1 is unusable and top-up is off
    let echo = clean().with(Feature::AutocorrEcho, 0.9);
    let broken = MockExtractor::new()
        .with_fallback(clean())
        .with_vector(id(1, 0), echo.clone())
        .with_vector(id(1, 1), echo);
    let orch = orchestrator(&store, broken, Arc::new(MockSynthesizer::new()));
    let no_topup = RunOptions {
        run_all: false,
        no_topup: true,
    };
    let first = orch.run("ep05", no_topup).await.unwrap();
    assert_eq!(first.manifest.entry(1).unwrap().state, ChunkState::Exhausted);
    assert!(!first.manifest.is_fully_resolved());

    // Second pass with fixed measurements re-decides from chunk 1 onwards
    let orch = orchestrator(
        &store,
        MockExtractor::new().with_fallback(clean()),
        Arc::new(MockSynthesizer::new()),
    );
    let second = orch.run("ep05", RunOptions::default()).await.unwrap();
    assert!(second.manifest.is_fully_resolved());
    assert_eq!(second.run, Some(2));

    let log = read_log(&store.runs_dir("ep05").join("0002").join(LOG_FILE)).unwrap();
    let chunks: Vec<u32> = log.iter().map(|e| e.chunk_index).collect();
    assert_eq!(chunks, vec![1, 2]);
    assert_eq!(second.manifest.entry(1).unwrap().selected_version(), Some(0));
}

#[tokio::test]
async fn validate_scores_selections_against_human_picks() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    write_session(&store, "ep06", &[&[0.9, 0.3], &[0.2, 0.95], &[0.5, 0.6, 0.99]]);
    let orch = orchestrator(
        &store,
        MockExtractor::new().with_fallback(clean()),
        Arc::new(MockSynthesizer::new()),
    );
    let outcome = orch.run("ep06", RunOptions::default()).await.unwrap();

    let picks = [(0, 0), (1, 1), (2, 1)].into_iter().collect();
    store.save_human_picks("ep06", &picks).unwrap();
    let picks = store.load_human_picks("ep06").unwrap().unwrap();

    let result = validate(&outcome.manifest, &picks);
    assert_eq!(result.judged, 3);
    assert_eq!(result.exact, 2);
    assert_eq!(result.top3, 3);
    assert!((result.exact_pct - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(result.top3_pct, 100.0);

    let misses: Vec<u32> = result.misses().map(|m| m.chunk_index).collect();
    assert_eq!(misses, vec![2]);
}

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use takepick::cli::{Cli, Commands, ConfigAction, WeightList};
use takepick::config::Config;
use takepick::gates::GatePipeline;
use takepick::output::{self, Style};
use takepick::session::{Checklist, Orchestrator, RunOptions, SessionManifest, SessionStore};
use takepick::validation::{
    GatedSession, VALIDATION_FILE, ValidationResult, WeightGrid, sweep, validate,
};
use takepick::TakepickError;

/// Exit code when any chunk ended EXHAUSTED.
const EXIT_EXHAUSTED: u8 = 2;
/// Exit code when chunks are blocked or undecided but none exhausted.
const EXIT_UNRESOLVED: u8 = 3;
/// Exit code after Ctrl+C.
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Select {
            session,
            run_all,
            no_topup,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), cli.root.as_deref())?;
            let options = RunOptions { run_all, no_topup };
            handle_select(&config, &session, options, json, cli.quiet).await
        }
        Commands::Validate {
            session,
            previous,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), cli.root.as_deref())?;
            handle_validate(&config, &session, previous.as_deref(), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sweep {
            sessions,
            quality,
            echo,
            tonal,
            hiss,
            duration,
            top,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), cli.root.as_deref())?;
            let axis = |list: Option<WeightList>| list.map(|l| l.0).unwrap_or_default();
            let grid = WeightGrid {
                quality: axis(quality),
                echo: axis(echo),
                tonal: axis(tonal),
                hiss: axis(hiss),
                duration: axis(duration),
            };
            handle_sweep(&config, &sessions, &grid, top, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let config = load_config(cli.config.as_deref(), cli.root.as_deref())?;
            handle_status(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref(), cli.root.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "takepick",
                &mut std::io::stdout(),
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// RUST_LOG wins; otherwise -q, -v and -vv pick the level.
fn init_tracing(quiet: bool, verbose: u8) {
    let fallback = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file, then apply env overrides and `--root`.
fn load_config(custom_path: Option<&Path>, root: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    let mut config = config.with_env_overrides()?;
    if let Some(root) = root {
        config.paths.root = Some(root.to_path_buf());
    }
    config.validate()?;
    Ok(config)
}

fn style() -> Style {
    Style::new(std::io::stdout().is_terminal())
}

fn exit_code_for(manifest: &SessionManifest) -> ExitCode {
    if manifest.is_fully_resolved() {
        ExitCode::SUCCESS
    } else if manifest.has_exhausted() {
        ExitCode::from(EXIT_EXHAUSTED)
    } else {
        ExitCode::from(EXIT_UNRESOLVED)
    }
}

async fn handle_select(
    config: &Config,
    session: &str,
    options: RunOptions,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let orchestrator = Orchestrator::from_config(config)?;

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStopping after the current chunk...");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let outcome = match orchestrator.run(session, options).await {
        Ok(outcome) => outcome,
        Err(TakepickError::Cancelled { next_chunk }) => {
            eprintln!(
                "Cancelled. Progress saved; rerun to resume at chunk {}.",
                next_chunk
            );
            return Ok(ExitCode::from(EXIT_CANCELLED));
        }
        Err(e) => return Err(e).with_context(|| format!("selecting session {}", session)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.manifest)?);
    } else {
        if outcome.skipped && !quiet {
            println!("{}", "Session already resolved; showing stored manifest.".dimmed());
        }
        print!("{}", output::render_manifest(&outcome.manifest, style()));
        if let Some(run) = outcome.run
            && !quiet
        {
            println!(
                "{}",
                format!(
                    "run {:04}, {} synthesis request(s)",
                    run, outcome.synthesis_requests
                )
                .dimmed()
            );
        }
    }
    Ok(exit_code_for(&outcome.manifest))
}

fn handle_validate(
    config: &Config,
    session: &str,
    previous: Option<&Path>,
    json: bool,
) -> Result<()> {
    let store = SessionStore::new(config.sessions_root());
    let manifest = store
        .load_manifest(session)?
        .with_context(|| {
            format!(
                "no manifest for {}; run `takepick select {}` first",
                session, session
            )
        })?;
    let picks = store
        .load_human_picks(session)?
        .with_context(|| format!("no human_picks.json for {}", session))?;

    let stored = store.session_dir(session).join(VALIDATION_FILE);
    let previous = match previous {
        Some(path) => Some(
            ValidationResult::load(path)?
                .with_context(|| format!("{} does not exist", path.display()))?,
        ),
        None => ValidationResult::load(&stored)?,
    };

    let mut result = validate(&manifest, &picks);
    if let Some(previous) = &previous {
        result = result.compared_to(previous);
    }
    result.save(&stored)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", output::render_validation(&result, style()));
    }
    Ok(())
}

fn handle_sweep(
    config: &Config,
    sessions: &[String],
    grid: &WeightGrid,
    top: usize,
    json: bool,
) -> Result<()> {
    let store = SessionStore::new(config.sessions_root());
    let pipeline = GatePipeline::new(&config.thresholds);
    let gated = sessions
        .iter()
        .map(|s| {
            GatedSession::load(&store, s, &pipeline).with_context(|| format!("loading {}", s))
        })
        .collect::<Result<Vec<_>>>()?;

    let report = sweep(
        &gated,
        grid,
        &config.weights,
        &config.confidence,
        config.selection.low_confidence_policy,
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", output::render_sweep(&report, top, style()));
    }
    Ok(())
}

fn handle_status(config: &Config) -> Result<()> {
    let root = config.sessions_root();
    let store = SessionStore::new(&root);
    let completed = Checklist::new(&root).completed()?;
    let sessions = store.list_sessions()?;
    if sessions.is_empty() {
        println!("No sessions under {}", root.display());
        return Ok(());
    }

    for id in sessions {
        let mark = if completed.contains(&id) {
            "done".green().to_string()
        } else {
            "open".yellow().to_string()
        };
        match store.load_manifest(&id)? {
            Some(manifest) => {
                let s = &manifest.summary;
                println!(
                    "{}  {:<24} {}/{} resolved, {} flagged, {} blocked, {} exhausted",
                    mark, id, s.resolved, s.chunk_count, s.flagged, s.blocked, s.exhausted
                );
            }
            None => println!("{}  {:<24} {}", mark, id, "not run".dimmed()),
        }
    }
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&Path>,
    root: Option<&Path>,
) -> Result<()> {
    let config_path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path, root)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            let toml = Config::default().to_toml()?;
            takepick::persist::write_atomic(&config_path, toml.as_bytes())?;
            println!("Wrote {}", config_path.display());
        }
    }
    Ok(())
}

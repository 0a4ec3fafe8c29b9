//! Command-line front end for the artifact action protocol.
//!
//! Reads an agent response from a file (or `-` for stdin), then parses,
//! checks, applies or assesses it for continuation. Protocol failures map to
//! the stable codes in [`artifact::exit_codes`].

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use artifact::core::continuation::{Assessment, ContinuationMarker, Coordinator};
use artifact::core::error::ProtocolError;
use artifact::core::manifest::CapabilityManifest;
use artifact::core::state::ProjectState;
use artifact::core::validator::Validator;
use artifact::exit_codes;
use artifact::io::apply_log::{ApplyLogRecorder, write_apply_log};
use artifact::io::config::{ProtocolSettings, load_settings, write_settings};
use artifact::io::directive::DirectiveRenderer;
use artifact::io::host::WorkdirHost;
use artifact::io::manifest::{load_manifest, write_manifest};
use artifact::io::snapshot::{capture_dir, load_snapshot, write_snapshot};
use artifact::logging;
use artifact::pipeline::{ApplyOutcome, DryRunHost, Pipeline};

#[derive(Parser)]
#[command(
    name = "artifact",
    version,
    about = "Parse, validate and apply agent action streams"
)]
struct Cli {
    /// Protocol settings (TOML). Defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "artifact.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default settings (`--config`) and capability manifest with
    /// every value spelled out, skipping files that already exist.
    Init {
        #[arg(long, default_value = "manifest.toml")]
        manifest: PathBuf,
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the parsed action stream as JSON.
    Parse {
        /// Agent response file, or `-` for stdin.
        stream: PathBuf,
    },
    /// Parse and check every action against the capability manifest.
    Check {
        stream: PathBuf,
        /// Capability manifest (TOML). Defaults to the WebContainer rules.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Validate and apply the stream on top of a project state.
    Apply {
        stream: PathBuf,
        /// Initial state snapshot (JSON).
        #[arg(long, conflicts_with = "dir")]
        state: Option<PathBuf>,
        /// Project directory to capture the initial state from.
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Write the final state snapshot here.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Write a JSON apply log here.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Write files and run commands in `--dir` instead of a dry run.
        #[arg(long, requires = "dir")]
        execute: bool,
    },
    /// Report whether the stream is complete, or print the directive for the
    /// next turn.
    Resume {
        stream: PathBuf,
        /// Actions the host has already applied.
        #[arg(long)]
        applied: usize,
        /// Print the continuation marker as JSON instead of the directive.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = cli.config;
    match cli.command {
        Command::Init { manifest, force } => cmd_init(&config, &manifest, force),
        Command::Parse { stream } => cmd_parse(&load_settings(&config)?, &stream),
        Command::Check { stream, manifest } => {
            cmd_check(&load_settings(&config)?, &stream, manifest.as_deref())
        }
        Command::Apply {
            stream,
            state,
            dir,
            out,
            manifest,
            log,
            execute,
        } => cmd_apply(
            &load_settings(&config)?,
            &stream,
            ApplyArgs {
                state,
                dir,
                out,
                manifest,
                log,
                execute,
            },
        ),
        Command::Resume {
            stream,
            applied,
            json,
        } => cmd_resume(&load_settings(&config)?, &stream, applied, json),
    }
}

struct ApplyArgs {
    state: Option<PathBuf>,
    dir: Option<PathBuf>,
    out: Option<PathBuf>,
    manifest: Option<PathBuf>,
    log: Option<PathBuf>,
    execute: bool,
}

fn cmd_init(config: &Path, manifest: &Path, force: bool) -> Result<i32> {
    if force || !config.exists() {
        write_settings(config, &ProtocolSettings::default())?;
        println!("wrote {}", config.display());
    }
    if force || !manifest.exists() {
        write_manifest(manifest, &CapabilityManifest::webcontainer())?;
        println!("wrote {}", manifest.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_parse(settings: &ProtocolSettings, stream: &Path) -> Result<i32> {
    let text = read_stream(stream)?;
    let pipeline = Pipeline::new(settings.protocol_config(), Validator::permissive());
    match pipeline.parse(&text) {
        Ok(parsed) => {
            let mut payload = serde_json::to_string_pretty(&parsed).context("serialize stream")?;
            payload.push('\n');
            print!("{payload}");
            Ok(exit_codes::OK)
        }
        Err(err) => Ok(protocol_failure(&err)),
    }
}

fn cmd_check(settings: &ProtocolSettings, stream: &Path, manifest: Option<&Path>) -> Result<i32> {
    let text = read_stream(stream)?;
    let pipeline = Pipeline::new(settings.protocol_config(), validator(manifest)?);
    let parsed = match pipeline.parse(&text) {
        Ok(parsed) => parsed,
        Err(err) => return Ok(protocol_failure(&err)),
    };
    match pipeline.validator().validate_stream(&parsed) {
        Ok(warnings) => {
            for warning in &warnings {
                println!(
                    "warning: action {} {}: {}",
                    warning.index, warning.kind, warning.reason
                );
            }
            println!("ok: {} actions", parsed.len());
            Ok(exit_codes::OK)
        }
        Err(err) => Ok(protocol_failure(&err)),
    }
}

fn cmd_apply(settings: &ProtocolSettings, stream: &Path, args: ApplyArgs) -> Result<i32> {
    let text = read_stream(stream)?;
    let initial = match (&args.state, &args.dir) {
        (Some(path), _) => load_snapshot(path)?,
        (None, Some(dir)) => capture_dir(dir)?,
        (None, None) => ProjectState::new(),
    };
    debug!(files = initial.len(), "initial state loaded");

    let config = settings.protocol_config();
    let coordinator = Coordinator::new(config.clone());
    let pipeline = Pipeline::new(config, validator(args.manifest.as_deref())?);
    let recorder = ApplyLogRecorder::start(&text, &initial);

    let mut dry_run = DryRunHost::default();
    let result = match coordinator.assess(&text, 0) {
        Ok(Assessment::Complete(parsed)) => {
            for note in &parsed.warnings {
                warn!(%note, "skipped block");
            }
            match (&args.dir, args.execute) {
                (Some(dir), true) => {
                    let mut host = WorkdirHost::new(dir, settings.shell.clone());
                    pipeline.apply_stream(&parsed, &initial, &mut host)
                }
                _ => pipeline.apply_stream(&parsed, &initial, &mut dry_run),
            }
        }
        Ok(Assessment::Incomplete(marker)) => {
            eprintln!(
                "incomplete stream: {} actions parsed; run `artifact resume` for the next turn",
                marker.parsed
            );
            return Ok(exit_codes::INCOMPLETE);
        }
        Err(err) => Err(err),
    };

    if let Some(path) = &args.log {
        write_apply_log(path, &recorder.finish(&result))?;
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => return Ok(protocol_failure(&err)),
    };
    if let Some(path) = &args.out {
        write_snapshot(path, &outcome.state)?;
    }
    print_outcome(&outcome, (!args.execute).then_some(&dry_run));
    Ok(exit_codes::OK)
}

fn print_outcome(outcome: &ApplyOutcome, dry_run: Option<&DryRunHost>) {
    for note in &outcome.parse_warnings {
        println!("skipped: {note}");
    }
    for warning in &outcome.warnings {
        println!(
            "warning: action {} {}: {}",
            warning.index, warning.kind, warning.reason
        );
    }
    if let Some(host) = dry_run {
        for path in &host.writes {
            println!("would write: {path}");
        }
        for command in &host.commands {
            println!("would run: {command}");
        }
    }
    println!(
        "applied: {} actions, {} files, state {}",
        outcome.applied.len(),
        outcome.state.len(),
        &outcome.state.digest()[..12]
    );
    info!(applied = outcome.applied.len(), "apply finished");
}

fn cmd_resume(
    settings: &ProtocolSettings,
    stream: &Path,
    applied: usize,
    json: bool,
) -> Result<i32> {
    let text = read_stream(stream)?;
    let coordinator = Coordinator::new(settings.protocol_config());
    let marker = match coordinator.assess(&text, applied) {
        Ok(Assessment::Complete(_)) => {
            println!("complete");
            return Ok(exit_codes::OK);
        }
        Ok(Assessment::Incomplete(marker)) => marker,
        Err(err) => return Ok(protocol_failure(&err)),
    };
    if json {
        print_marker(&marker)?;
    } else {
        let renderer = DirectiveRenderer::new(settings.grammar.clone())?;
        print!("{}", renderer.render(&marker)?);
    }
    Ok(exit_codes::INCOMPLETE)
}

fn print_marker(marker: &ContinuationMarker) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(marker).context("serialize marker")?;
    payload.push('\n');
    print!("{payload}");
    Ok(())
}

fn validator(manifest: Option<&Path>) -> Result<Validator> {
    let manifest = match manifest {
        Some(path) => load_manifest(path)?,
        None => CapabilityManifest::webcontainer(),
    };
    Validator::from_manifest(&manifest).context("compile manifest rules")
}

fn read_stream(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("read stream from stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("read stream {}", path.display()))
}

fn protocol_failure(err: &ProtocolError) -> i32 {
    eprintln!("error: {err}");
    exit_codes::for_error(err)
}

//! `astro-analyzer` command line

use anyhow::Context;
use astro_analyzer::logging::init_tracing;
use astro_analyzer::prelude::*;
use astro_store::JsonFileStore;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

fn cli() -> Command {
    Command::new("astro-analyzer")
        .version(astro_analyzer::VERSION)
        .about("Bring a session's derived products up to date")
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Session directory holding astro_db.json"),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .default_value("*")
                .help("Target name, or * for every target set"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Rebuild everything reachable from the target"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Print the commands that would run and exit"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the report and logs as JSON"),
        )
        .arg(
            Arg::new("max-passes")
                .long("max-passes")
                .value_parser(value_parser!(usize))
                .help("Reconciliation passes per target"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();
    let json = matches.get_flag("json");
    init_tracing(json);

    let dir = matches
        .get_one::<PathBuf>("dir")
        .cloned()
        .context("session directory is required")?;
    let selector: TargetSelector = matches
        .get_one::<String>("target")
        .map_or("*", String::as_str)
        .parse()?;
    let force = matches.get_flag("force");

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => AnalyzerConfig::load(path)?,
        None => AnalyzerConfig::default(),
    };
    if let Some(&passes) = matches.get_one::<usize>("max-passes") {
        config = config.with_max_passes(passes);
        config.validate()?;
    }
    if config.base_directory.is_none() {
        config = config.with_base_directory(&dir);
    }

    let store = JsonFileStore::in_session_dir(&dir);
    let probe = Arc::new(FsProbe::new(config.catalogue_suffix.clone()));
    let runner = Arc::new(ProcessRunner::new().with_timeout(config.command_timeout()));
    let mut analyzer = Analyzer::new(store, probe, runner, config);

    if matches.get_flag("dry-run") {
        let report = analyzer.plan(&selector, force)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print!("{report}");
        }
        return Ok(if report.unknown_targets.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing the running command");
            on_signal.cancel();
        }
    });

    let report = analyzer.resolve_with_cancel(&selector, force, &cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn target_defaults_to_wildcard() {
        let matches = cli().get_matches_from(["astro-analyzer", "-d", "/tmp/session", "-f"]);
        assert_eq!(matches.get_one::<String>("target").unwrap(), "*");
        assert!(matches.get_flag("force"));
        assert!(!matches.get_flag("dry-run"));
    }
}

//! neardup CLI
//!
//! - `neardup fit CORPUS`: load a crawl result file, fit, print the summary
//! - `neardup similar`: ranked similar documents for an article
//! - `neardup cluster`: cluster assignment for an article
//! - `neardup init-config`: write a commented default `neardup.toml`
//!
//! `similar` and `cluster` restore state from the artifact directory written
//! by a previous `fit`.

use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use neardup::{ClusterService, Config, CorpusSource, Record, CONFIG_FILE_NAME};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn build_cli() -> Command {
    Command::new("neardup")
        .about("Near-duplicate news detection and clustering")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .help("Config file (default: ./neardup.toml if present)")
                .global(true),
        )
        .arg(
            Arg::new("artifacts")
                .long("artifacts")
                .help("Artifact directory (overrides artifact_dir)")
                .global(true),
        )
        .subcommand(
            Command::new("fit")
                .about("Load a corpus, fit the similarity index and cluster")
                .arg(Arg::new("corpus").required(true).help("Corpus JSON file")),
        )
        .subcommand(with_record_args(
            Command::new("similar").about("List stored documents similar to an article"),
        ))
        .subcommand(with_record_args(
            Command::new("cluster")
                .about("Assign an article to a cluster")
                .arg(Arg::new("key").long("key").help("Document key, if already stored")),
        ))
        .subcommand(
            Command::new("init-config")
                .about("Write a default config file if none exists")
                .arg(Arg::new("path").help("Target path (default: ./neardup.toml)")),
        )
}

fn with_record_args(command: Command) -> Command {
    command
        .arg(Arg::new("title").long("title").default_value(""))
        .arg(Arg::new("content").long("content").default_value(""))
        .arg(
            Arg::new("url")
                .long("url")
                .action(ArgAction::Append)
                .help("Contained URL (repeatable)"),
        )
        .arg(
            Arg::new("record")
                .long("record")
                .conflicts_with_all(["title", "content", "url"])
                .help("Article as a JSON file"),
        )
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    if let Err(e) = run(&matches) {
        error!(target: "neardup::service", "{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("init-config", sub)) => {
            let path = sub
                .get_one::<String>("path")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            Config::write_default_if_missing(&path)?;
            println!("{}", path.display());
        }
        Some(("fit", sub)) => {
            let config = load_config(matches)?;
            let corpus = sub
                .get_one::<String>("corpus")
                .map(PathBuf::from)
                .context("missing corpus path")?;
            let service = ClusterService::new(config)?;
            let summary = service.fit(CorpusSource::Path(corpus))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some(("similar", sub)) => {
            let service = open_service(matches)?;
            let similar = service.similar(&record(sub)?)?;
            println!("{}", serde_json::to_string_pretty(&similar)?);
        }
        Some(("cluster", sub)) => {
            let service = open_service(matches)?;
            let key = sub.get_one::<String>("key").map(String::as_str);
            let assignment = service.cluster(&record(sub)?, key)?;
            let output = json!({
                "cluster": assignment.cluster_index(),
                "assignment": assignment,
                "explanation": assignment.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => bail!("unknown command"),
    }
    Ok(())
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(Path::new(path))?,
        None if Path::new(CONFIG_FILE_NAME).exists() => {
            Config::from_file(Path::new(CONFIG_FILE_NAME))?
        }
        None => Config::default(),
    };
    if let Some(dir) = matches.get_one::<String>("artifacts") {
        config.artifact_dir = Some(PathBuf::from(dir));
    }
    config.validate()?;
    Ok(config)
}

fn open_service(matches: &ArgMatches) -> anyhow::Result<ClusterService> {
    let config = load_config(matches)?;
    if config.artifact_dir.is_none() {
        bail!("queries need fitted artifacts: pass --artifacts or set artifact_dir");
    }
    Ok(ClusterService::open(config)?)
}

fn record(sub: &ArgMatches) -> anyhow::Result<Record> {
    if let Some(path) = sub.get_one::<String>("record") {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read record file {}", path))?;
        return Ok(serde_json::from_str(&text)?);
    }
    let field = |name: &str| sub.get_one::<String>(name).cloned().unwrap_or_default();
    let urls: BTreeMap<String, String> = sub
        .get_many::<String>("url")
        .into_iter()
        .flatten()
        .map(|url| (url.clone(), String::new()))
        .collect();
    Ok(Record::new(field("title"), field("content"), urls))
}

#![deny(missing_docs)]
#![deny(warnings)]

//! CLI entry point for the PHOENIX metadata tracker.
//!
//! The external scheduler invokes the subcommands once per day, in order:
//! `crawl`, `summarize`, `report` (or `run` for all three).

use std::path::PathBuf;

use phoenix_tracker::app_dirs;
use phoenix_tracker::catalog::{
    CatalogDb, ConventionScheme, SummarizeOutcome, crawl, format_date, parse_snapshot_date,
    report, summarize,
};
use phoenix_tracker::config::TrackerConfig;
use phoenix_tracker::logging;
use phoenix_tracker::notify::{Notify, NullNotifier, WebhookNotifier};
use phoenix_tracker::pipeline;

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };

    let config_path = match &options.config {
        Some(path) => path.clone(),
        None => app_dirs::default_config_path().map_err(|err| err.to_string())?,
    };
    let config = TrackerConfig::load(&config_path).map_err(|err| err.to_string())?;
    let scheme =
        ConventionScheme::compile(&config.convention_rules).map_err(|err| err.to_string())?;

    let db_path = config.database_path().map_err(|err| err.to_string())?;
    let db = CatalogDb::open(&db_path)
        .map_err(|err| format!("Cannot open catalog at {}: {err}", db_path.display()))?;

    let date = match &options.date {
        Some(raw) => parse_snapshot_date(raw).map_err(|err| err.to_string())?,
        None => logging::now_local_or_utc().date(),
    };

    let notifier: Box<dyn Notify> = match (&config.webhook_url, options.dry_run) {
        (Some(url), false) => Box::new(WebhookNotifier::new(url.clone())),
        _ => Box::new(NullNotifier),
    };

    match options.command {
        Command::Crawl => {
            for root in &config.data_roots {
                let stats = crawl(&db, root, &scheme).map_err(|err| err.to_string())?;
                println!(
                    "{}: {} added, {} updated, {} unchanged, {} skipped",
                    root.display(),
                    stats.added,
                    stats.updated,
                    stats.unchanged,
                    stats.skipped
                );
            }
        }
        Command::Summarize => match summarize(&db, date).map_err(|err| err.to_string())? {
            SummarizeOutcome::Written(rows) => {
                println!("Wrote {} snapshot rows for {}", rows.len(), format_date(date));
            }
            SummarizeOutcome::AlreadySummarized => {
                println!("Snapshot for {} already exists; nothing to do", format_date(date));
            }
        },
        Command::Report => {
            let prior = db
                .latest_snapshot_date_before(date)
                .map_err(|err| err.to_string())?;
            let outcome =
                report(&db, date, prior, notifier.as_ref()).map_err(|err| err.to_string())?;
            print!("{}", outcome.message);
            if !outcome.delivered {
                println!("(delivery failed; see log)");
            }
        }
        Command::Run => {
            let outcome = pipeline::run_daily(&db, &config, &scheme, date, notifier.as_ref());
            println!(
                "Run for {}: {} root(s) crawled, {} failed, summarized: {}, reported: {}",
                format_date(date),
                outcome.crawled.len(),
                outcome.crawl_failures,
                outcome.summarize.is_some(),
                outcome.report.is_some()
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Crawl,
    Summarize,
    Report,
    Run,
}

#[derive(Debug, Clone)]
struct CliOptions {
    command: Command,
    config: Option<PathBuf>,
    date: Option<String>,
    dry_run: bool,
}

fn parse_args(args: Vec<String>) -> Result<Option<CliOptions>, String> {
    let mut command: Option<Command> = None;
    let mut config: Option<PathBuf> = None;
    let mut date: Option<String> = None;
    let mut dry_run = false;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--config" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            "--date" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--date requires a value".to_string())?;
                date = Some(value.clone());
            }
            "--dry-run" => dry_run = true,
            "crawl" if command.is_none() => command = Some(Command::Crawl),
            "summarize" if command.is_none() => command = Some(Command::Summarize),
            "report" if command.is_none() => command = Some(Command::Report),
            "run" if command.is_none() => command = Some(Command::Run),
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    let Some(command) = command else {
        return Err(format!("A command is required\n\n{}", help_text()));
    };
    Ok(Some(CliOptions {
        command,
        config,
        date,
        dry_run,
    }))
}

fn help_text() -> String {
    [
        "phoenix-tracker",
        "",
        "Usage:",
        "  phoenix-tracker <command> [--config <path>] [--date <YYYY-MM-DD>] [--dry-run]",
        "",
        "Commands:",
        "  crawl      Walk the configured data roots and sync the catalog",
        "  summarize  Freeze today's per-group volume snapshot",
        "  report     Send the day-over-day delta to the webhook",
        "  run        crawl, then summarize, then report",
    ]
    .join("\n")
}

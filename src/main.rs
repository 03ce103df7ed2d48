use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use reqwest::blocking::Client;
use tracing::debug;

use gh_repo_stats::backend::{
    BigQueryBackend, GcloudTokenProvider, StaticTokenProvider, TokenProvider,
};
use gh_repo_stats::catalog::{BuiltinSource, DocsPageSource, EventTypeSource, EventsFeedSource};
use gh_repo_stats::http::create_http_client;
use gh_repo_stats::runner::RunError;
use gh_repo_stats::{
    setup_logging, Args, CatalogKind, CommandRunner, InputValidator, Mode, OutputTarget,
    ReportFormatter, RunOutcome,
};

const USAGE_ERROR: u8 = 2;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    eprint!("{}", e);
                    ExitCode::SUCCESS
                }
                _ => {
                    let _ = e.print();
                    ExitCode::from(USAGE_ERROR)
                }
            };
        }
    };
    setup_logging(args.verbosity);

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(USAGE_ERROR)
        }
    }
}

fn run(args: &Args) -> Result<u8> {
    let client = create_http_client().context("Failed to create HTTP client")?;

    let catalog: Box<dyn EventTypeSource> = match args.catalog {
        CatalogKind::Feed => Box::new(EventsFeedSource::new(
            client.clone(),
            args.events_url.as_str(),
        )),
        CatalogKind::Docs => Box::new(DocsPageSource::new(
            client.clone(),
            args.event_types_url.as_str(),
        )),
        CatalogKind::Builtin => Box::new(BuiltinSource),
    };
    debug!(component = "main", catalog = %catalog.describe(), "Event type source selected");

    let mode = if args.archive_urls {
        Mode::ArchiveUrls
    } else {
        Mode::Query
    };
    // Credential problems surface only after the input has been validated.
    let backend = match mode {
        Mode::Query => Some(build_backend(args, client)),
        Mode::ArchiveUrls => None,
    };

    let report = ReportFormatter::new(OutputTarget::from_arg(&args.format), args.output.clone());
    let validator = InputValidator::new(args.limits(), catalog.as_ref());
    let mut runner = CommandRunner::new(validator, report).with_mode(mode);
    match backend.as_ref() {
        Some(Ok(backend)) => runner = runner.with_backend(backend),
        Some(Err(e)) => runner = runner.with_backend_unavailable(format!("{:#}", e)),
        None => {}
    }

    let outcome = runner.run(&args.command_params(), &mut io::stdout().lock());
    if let RunOutcome::Failed(e @ RunError::NoBackend(_)) = &outcome {
        eprintln!("Error: {}", e);
    }
    Ok(outcome.exit_code())
}

fn build_backend(args: &Args, client: Client) -> Result<BigQueryBackend> {
    let project_id = args
        .project_id
        .as_deref()
        .context("--project-id (or GH_REPO_STATS_PROJECT) is required to run the query")?;

    let tokens: Box<dyn TokenProvider> = if args.gcloud_token {
        Box::new(GcloudTokenProvider::new())
    } else {
        let token = args.access_token.clone().context(
            "--access-token (or GH_REPO_STATS_TOKEN) or --gcloud-token is required to run the query",
        )?;
        Box::new(StaticTokenProvider::new(token))
    };

    let backend = BigQueryBackend::new(client, &args.bigquery_url, project_id, args.max_millis, tokens)
        .context("Failed to configure the aggregation backend")?;
    Ok(backend)
}

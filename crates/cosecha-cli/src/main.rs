//! Cosechador CLI entry point

use clap::Parser;
use console::Term;
use cosechador::{
    catalog, logging, render_catalog, render_settings, runner, AppConfig, CatalogRow, CheckArgs,
    Cli, CliError, CliResult, Commands, ListArgs, ProgressReporter, RunArgs, CATALOG,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "cosechador failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let mut app = AppConfig::load(cli.config.as_deref())?;
    if let Commands::Run(ref args) = cli.command {
        app.apply_run_args(args);
    }
    logging::init(
        cli.verbose,
        cli.quiet,
        cli.log_format,
        app.log_dir.as_deref(),
    )?;
    let use_color = Term::stderr().features().colors_supported();

    match cli.command {
        Commands::List(args) => list(&args),
        Commands::Check(args) => check(&app, &args),
        Commands::Run(args) => run_reports(&app, &args, use_color, cli.quiet),
    }
}

fn list(args: &ListArgs) -> CliResult<()> {
    if args.json {
        let rows: Vec<CatalogRow> = CATALOG.iter().map(CatalogRow::from).collect();
        let json = serde_json::to_string_pretty(&rows)
            .map_err(|e| CliError::config(format!("cannot render catalog: {e}")))?;
        println!("{json}");
    } else {
        print!("{}", render_catalog(CATALOG, false));
    }
    Ok(())
}

fn check(app: &AppConfig, args: &CheckArgs) -> CliResult<()> {
    let entries = catalog::select(&args.reports)?;
    app.validate(&entries)?;
    print!("{}", render_settings(&app.redacted()));
    println!("configuration OK for {} report(s)", entries.len());
    Ok(())
}

fn run_reports(app: &AppConfig, args: &RunArgs, use_color: bool, quiet: bool) -> CliResult<()> {
    let entries = catalog::select(&args.reports)?;
    app.validate(&entries)?;

    let mut reporter = ProgressReporter::new(use_color, quiet);
    reporter.info(&format!(
        "running {} report(s) into {}",
        entries.len(),
        app.output_dir.display()
    ));
    reporter.start_progress(entries.len() as u64, "starting browser");

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::report(format!("failed to create runtime: {e}")))?;
    let result = rt.block_on(runner::execute(app, &entries, &reporter));
    reporter.finish();
    let summary = result?;

    reporter.summary(
        summary.ok_count(),
        summary.failed_count(),
        summary.skipped.len(),
        summary.elapsed,
    );
    if summary.is_success() {
        Ok(())
    } else {
        Err(runner::failure_error(&summary))
    }
}

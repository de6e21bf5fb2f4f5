//! resource-migrator - Parallel Bulk Resource Migration
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use resource_migrator::config::{CliArgs, Command, MigrateConfig};
use resource_migrator::enumerate::{load_files, write_files, StoreEnumerator};
use resource_migrator::error::MigrateError;
use resource_migrator::error_sink::ErrorSink;
use resource_migrator::migrate::{save_to_store, visit_fn, ApiVersionMigration, ResourceVisitor};
use resource_migrator::output::SharedWriter;
use resource_migrator::progress::{print_header, ProgressReporter};
use resource_migrator::store::{MemoryStore, ObjectStore};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Per-resource failures were already reported line by line
            let without_success = e
                .downcast_ref::<MigrateError>()
                .is_some_and(MigrateError::is_exit_without_success);
            if without_success {
                eprintln!("error: {}", e);
                ExitCode::from(1)
            } else {
                error!("{:#}", e);
                eprintln!("Error: {:#}", e);
                ExitCode::from(2)
            }
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = MigrateConfig::from_args(&args).context("Invalid configuration")?;

    let migration = match &args.command {
        Command::ApiVersion { kind, from, to } => {
            ApiVersionMigration::new(kind.as_str(), from.as_str(), to.as_str())
                .context("Invalid migration")?
        }
    };

    let loaded = load_files(&config.filenames);
    info!(
        resources = loaded.resources.len(),
        failures = loaded.failures.len(),
        "Loaded input files"
    );

    let store = Arc::new(MemoryStore::with_objects(loaded.resources));
    let mut enumerator = StoreEnumerator::new(store.clone(), config.selector.clone())
        .with_failures(loaded.failures);

    // In print mode stdout carries the objects, so report lines move to stderr
    let report_out = if config.output.is_some() {
        SharedWriter::stderr()
    } else {
        SharedWriter::stdout()
    };

    let mut visitor = ResourceVisitor::new(&config, report_out)?
        .with_save(save_to_store(store.clone()))
        .with_error_sink(Arc::new(ErrorSink::default()));
    if let Some(format) = config.output {
        visitor = visitor.with_output(SharedWriter::stdout(), format);
    }

    if config.show_progress {
        print_header(
            &migration.describe(),
            config.parallel,
            config.filenames.len(),
            visitor.is_dry_run(),
        );
        visitor = visitor.with_progress(ProgressReporter::new());
    }

    let result = visitor.run(&mut enumerator, visit_fn(Arc::new(migration)));

    // Keep whatever was saved, even when some resources failed
    if !config.dry_run && store.write_count() > 0 {
        let files = write_files(&store.list()?).context("Failed to write migrated objects")?;
        info!(files, writes = store.write_count(), "Saved migrated objects");
    }

    let summary = result?;
    info!(migrated = summary.migrated(), "Migration succeeded");
    Ok(())
}

fn setup_logging(verbose: u8) -> Result<()> {
    let default = if verbose > 0 {
        "resource_migrator=debug,warn"
    } else {
        "resource_migrator=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}

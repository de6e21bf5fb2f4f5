//! Configuration types for resource-migrator
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - The key-range filter derived from `--from-key` / `--to-key`

use crate::enumerate::Selector;
use crate::error::ConfigError;
use crate::migrate::FilterFn;
use crate::resource::ResourceInfo;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Maximum reasonable worker count
pub const MAX_PARALLEL: usize = 256;

/// Minimum queue size
const MIN_QUEUE_SIZE: usize = 1;

/// Default per-resource retry budget
pub const DEFAULT_RETRIES: u32 = 10;

/// Default capacity of the work and result queues
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Bulk resource migration runner
#[derive(Parser, Debug, Clone)]
#[command(
    name = "resource-migrator",
    version,
    about = "Migrate cluster resources in bulk with parallel, retrying workers",
    long_about = "Visits every selected resource, decides whether it needs migration and \
                  persists the migrated object.\n\n\
                  Runs as a dry run unless --confirm is given. With --output the migrated \
                  objects are printed instead of saved.",
    after_help = "EXAMPLES:\n    \
        resource-migrator -f objects.json api-version --kind Deployment --from extensions/v1beta1 --to apps/v1\n    \
        resource-migrator -f objects.json -A --confirm --parallel 8 api-version --kind Ingress --from extensions/v1beta1 --to networking.k8s.io/v1\n    \
        resource-migrator -f objects.json --from-key prod/ --to-key prod0 -o json api-version --kind Job --from batch/v2 --to batch/v1"
)]
pub struct CliArgs {
    /// Migration to run
    #[command(subcommand)]
    pub command: Command,

    /// Visit resources in every namespace
    #[arg(short = 'A', long, global = true)]
    pub all_namespaces: bool,

    /// Namespace to visit when --all-namespaces is not set
    #[arg(short = 'n', long, global = true, default_value = "default", value_name = "NS")]
    pub namespace: String,

    /// Resource kinds to visit, comma separated; '*' for all
    #[arg(long, global = true, value_delimiter = ',', default_value = "*", value_name = "KINDS")]
    pub include: Vec<String>,

    /// JSON files to read resources from (can be repeated)
    #[arg(short = 'f', long = "filename", global = true, value_name = "FILE", action = clap::ArgAction::Append)]
    pub filenames: Vec<PathBuf>,

    /// Persist changes; without this the run is a dry run
    #[arg(long, global = true)]
    pub confirm: bool,

    /// Only visit resources whose namespace/name sorts at or after this key
    #[arg(long, global = true, value_name = "KEY")]
    pub from_key: Option<String>,

    /// Only visit resources whose namespace/name sorts before this key
    #[arg(long, global = true, value_name = "KEY")]
    pub to_key: Option<String>,

    /// Number of parallel workers
    #[arg(long, global = true, default_value_t = 1, value_name = "NUM")]
    pub parallel: usize,

    /// Print migrated objects (json|name) instead of saving them
    #[arg(short = 'o', long, global = true, value_name = "FORMAT")]
    pub output: Option<String>,

    /// Retry attempts per resource for retriable failures
    #[arg(long, global = true, default_value_t = DEFAULT_RETRIES, value_name = "NUM")]
    pub retries: u32,

    /// Work and result queue capacity
    #[arg(long, global = true, default_value_t = DEFAULT_QUEUE_SIZE, value_name = "NUM")]
    pub queue_size: usize,

    /// Report unchanged and ignored resources too (repeat for more)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the progress spinner
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

/// Available migrations
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Rewrite apiVersion on resources of one kind
    ApiVersion {
        /// Kind to migrate
        #[arg(long)]
        kind: String,

        /// apiVersion that needs migration
        #[arg(long = "from")]
        from: String,

        /// apiVersion to migrate to
        #[arg(long = "to")]
        to: String,
    },
}

/// How migrated objects are printed in print-only mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Name,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "json" => Ok(OutputFormat::Json),
            "name" => Ok(OutputFormat::Name),
            other => Err(ConfigError::InvalidOutputFormat(other.to_string())),
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Resource selection for live enumeration
    pub selector: Selector,

    /// Static inputs
    pub filenames: Vec<PathBuf>,

    /// Compute but do not persist
    pub dry_run: bool,

    /// Print-only mode; implies dry run
    pub output: Option<OutputFormat>,

    /// Inclusive lower bound on namespace/name
    pub from_key: Option<String>,

    /// Exclusive upper bound on namespace/name
    pub to_key: Option<String>,

    /// Number of worker threads
    pub parallel: usize,

    /// Retry budget per resource
    pub retries: u32,

    /// Queue capacity
    pub queue_size: usize,

    /// Report verbosity: 1 adds migrated lines, 2 adds unchanged/ignored
    pub verbosity: u8,

    /// Show progress spinner
    pub show_progress: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            selector: Selector::default(),
            filenames: Vec::new(),
            dry_run: true,
            output: None,
            from_key: None,
            to_key: None,
            parallel: 1,
            retries: DEFAULT_RETRIES,
            queue_size: DEFAULT_QUEUE_SIZE,
            verbosity: 0,
            show_progress: false,
        }
    }
}

impl MigrateConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        if args.filenames.is_empty() {
            return Err(ConfigError::NoInput);
        }

        let include: Vec<String> = args
            .include
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if include.is_empty() {
            return Err(ConfigError::EmptyInclude);
        }

        let output = args.output.as_deref().map(OutputFormat::parse).transpose()?;

        let config = Self {
            selector: Selector {
                namespace: (!args.all_namespaces).then(|| args.namespace.clone()),
                include,
            },
            filenames: args.filenames.clone(),
            // Print-only mode overrides --confirm
            dry_run: !args.confirm || output.is_some(),
            output,
            from_key: args.from_key.clone().filter(|k| !k.is_empty()),
            to_key: args.to_key.clone().filter(|k| !k.is_empty()),
            parallel: args.parallel,
            retries: args.retries,
            queue_size: args.queue_size,
            verbosity: args.verbose,
            show_progress: !args.quiet,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that `from_args` and library callers must uphold
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 || self.parallel > MAX_PARALLEL {
            return Err(ConfigError::InvalidParallel {
                count: self.parallel,
                max: MAX_PARALLEL,
            });
        }

        if self.queue_size < MIN_QUEUE_SIZE {
            return Err(ConfigError::InvalidQueueSize {
                size: self.queue_size,
                min: MIN_QUEUE_SIZE,
            });
        }

        if let (Some(from), Some(to)) = (&self.from_key, &self.to_key) {
            if from >= to {
                return Err(ConfigError::InvalidKeyRange {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }

        Ok(())
    }

    /// Check if a resource falls inside the configured key range
    pub fn in_key_range(&self, info: &ResourceInfo) -> bool {
        let key = info.key.range_key();
        if let Some(from) = &self.from_key {
            if key.as_str() < from.as_str() {
                return false;
            }
        }
        if let Some(to) = &self.to_key {
            if key.as_str() >= to.as_str() {
                return false;
            }
        }
        true
    }

    /// Key-range filter, or `None` when no bounds are set
    pub fn key_range_filter(&self) -> Option<FilterFn> {
        if self.from_key.is_none() && self.to_key.is_none() {
            return None;
        }
        let config = self.clone();
        let filter: FilterFn = Arc::new(move |info: &ResourceInfo| Ok(config.in_key_range(info)));
        Some(filter)
    }
}

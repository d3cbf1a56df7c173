use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use insulin_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dosetl")]
#[command(about = "Insulin delivery timeline builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a dose event in the dose log
    Add {
        /// Event kind (bolus, temp-basal, suspend, resume)
        kind: DoseEntryType,

        /// Start of the event (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,

        /// End of the event (RFC 3339); defaults to the start
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Units for a bolus, units/hour for rate events
        #[arg(long, allow_negative_numbers = true)]
        value: Option<f64>,

        /// Free-text note
        #[arg(long)]
        description: Option<String>,
    },

    /// Print the reconciled dose history as JSON lines
    Reconcile {
        /// Dose log to read (defaults to the data directory log)
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Build a bucketed delivery timeline
    Timeline {
        /// Dose log to read (defaults to the data directory log)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Express rate doses relative to the configured basal schedule
        #[arg(long)]
        normalize: bool,

        /// Bucket width in minutes (overrides the configuration)
        #[arg(long)]
        delta_minutes: Option<i64>,

        /// Start of the first bucket (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// End of the timeline (RFC 3339)
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Write the timeline to a CSV file instead of stdout
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Export the dose log as CSV
    ExportDoses {
        /// Destination file
        #[arg(long)]
        csv: PathBuf,

        /// Dose log to read (defaults to the data directory log)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Export the reconciled history instead of the raw events
        #[arg(long)]
        reconciled: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    insulin_core::logging::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    match cli.command {
        Commands::Add {
            kind,
            start,
            end,
            value,
            description,
        } => cmd_add(&config, kind, start, end, value, description),
        Commands::Reconcile { input } => cmd_reconcile(&config, input.as_deref()),
        Commands::Timeline {
            input,
            normalize,
            delta_minutes,
            start,
            end,
            csv,
        } => {
            let mut options = config.timeline.options()?;
            if let Some(minutes) = delta_minutes {
                options.delta = insulin_core::timeline::delta_from_minutes(minutes)?;
            }
            options.start = start;
            options.end = end;
            cmd_timeline(&config, input.as_deref(), normalize, &options, csv.as_deref())
        }
        Commands::ExportDoses {
            csv,
            input,
            reconciled,
        } => cmd_export_doses(&config, input.as_deref(), &csv, reconciled),
    }
}

fn load_doses(config: &Config, input: Option<&Path>) -> Result<Vec<DoseEntry>> {
    let path = input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.dose_log_path());
    read_doses(&path)
}

fn cmd_add(
    config: &Config,
    kind: DoseEntryType,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    value: Option<f64>,
    description: Option<String>,
) -> Result<()> {
    let mut dose = DoseEntry::new(kind, start, end, value, DoseUnit::conventional_for(kind));
    dose.description = description;

    let mut log = JsonlDoseLog::new(config.dose_log_path());
    log.append(&dose)?;

    println!("✓ Logged {}", dose);
    Ok(())
}

fn cmd_reconcile(config: &Config, input: Option<&Path>) -> Result<()> {
    let doses = load_doses(config, input)?;
    let reconciled = reconcile_doses(&doses)?;

    for dose in &reconciled {
        println!("{}", serde_json::to_string(dose)?);
    }
    Ok(())
}

fn cmd_timeline(
    config: &Config,
    input: Option<&Path>,
    normalize_to_schedule: bool,
    options: &TimelineOptions,
    csv: Option<&Path>,
) -> Result<()> {
    let doses = load_doses(config, input)?;
    let mut doses = reconcile_doses(&doses)?;

    if normalize_to_schedule {
        let schedule = config.basal.schedule()?;
        doses = normalize(&doses, &schedule)?;
    }

    let timeline = interpolate_doses_to_timeline(&doses, options)?;

    match csv {
        Some(path) => {
            let count = write_timeline_csv(path, &timeline)?;
            println!("✓ Wrote {} buckets to {}", count, path.display());
        }
        None => {
            for value in &timeline {
                println!("{}", serde_json::to_string(value)?);
            }
        }
    }
    Ok(())
}

fn cmd_export_doses(
    config: &Config,
    input: Option<&Path>,
    csv: &Path,
    reconciled: bool,
) -> Result<()> {
    let mut doses = load_doses(config, input)?;
    if reconciled {
        doses = reconcile_doses(&doses)?;
    }

    let count = write_doses_csv(csv, &doses)?;
    println!("✓ Exported {} doses to {}", count, csv.display());
    Ok(())
}

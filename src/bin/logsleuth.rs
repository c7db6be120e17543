use std::path::PathBuf;

use structopt::StructOpt;

use logsleuth::config::Config;
use logsleuth::correlate::correlate_cases;
use logsleuth::detection::run_all_detectors;
use logsleuth::ingest::parse_jsonl;
use logsleuth::models::Severity;
use logsleuth::report::{write_alerts_json, write_cases_json, write_cases_md};

/// Suspicious login detector and case report generator
#[derive(StructOpt, Debug)]
#[structopt(name = "logsleuth", about = "Suspicious login detector and case report generator")]
enum Cli {
    /// Analyze an authentication log and generate security reports
    Analyze {
        /// Path to JSONL log file
        #[structopt(short, long)]
        input: PathBuf,
        /// Path to a TOML configuration file
        #[structopt(short, long)]
        config: Option<PathBuf>,
        /// Output directory for reports [default: out]
        #[structopt(short, long)]
        outdir: Option<PathBuf>,
        /// Impossible travel speed threshold (km/h) [default: 900]
        #[structopt(long)]
        speed_threshold: Option<f64>,
        /// Max hours between logins for travel detection [default: 6]
        #[structopt(long)]
        max_travel_hours: Option<f64>,
        /// Failure chain detection window (minutes) [default: 20]
        #[structopt(long)]
        failure_window: Option<i64>,
        /// Min failures from one IP before a success to trigger [default: 8]
        #[structopt(long)]
        min_failures: Option<usize>,
        /// Min total failures across IPs before a success to trigger [default: 15]
        #[structopt(long)]
        min_failures_multi_ip: Option<usize>,
        /// Days of history for the device baseline [default: 30]
        #[structopt(long)]
        lookback_days: Option<u32>,
        /// Case correlation window (hours) [default: 8]
        #[structopt(long)]
        case_window: Option<f64>,
        /// Enable debug logging
        #[structopt(long)]
        debug: bool,
    },
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

/// Flags explicitly passed on the command line. Each set value wins over
/// the configuration file.
#[derive(Debug, Default)]
struct Overrides {
    outdir: Option<PathBuf>,
    speed_threshold: Option<f64>,
    max_travel_hours: Option<f64>,
    failure_window: Option<i64>,
    min_failures: Option<usize>,
    min_failures_multi_ip: Option<usize>,
    lookback_days: Option<u32>,
    case_window: Option<f64>,
}

fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    if let Some(outdir) = &overrides.outdir {
        config.output.outdir = outdir.clone();
    }
    if let Some(value) = overrides.speed_threshold {
        config.detection.speed_threshold_kmh = value;
    }
    if let Some(value) = overrides.max_travel_hours {
        config.detection.max_travel_hours = value;
    }
    if let Some(value) = overrides.failure_window {
        config.detection.failure_window_minutes = value;
    }
    if let Some(value) = overrides.min_failures {
        config.detection.min_failures_same_ip = value;
    }
    if let Some(value) = overrides.min_failures_multi_ip {
        config.detection.min_failures_multi_ip = value;
    }
    if let Some(value) = overrides.lookback_days {
        config.detection.device_lookback_days = value;
    }
    if let Some(value) = overrides.case_window {
        config.correlation.window_hours = value;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::from_args() {
        Cli::Analyze {
            input,
            config: config_path,
            outdir,
            speed_threshold,
            max_travel_hours,
            failure_window,
            min_failures,
            min_failures_multi_ip,
            lookback_days,
            case_window,
            debug,
        } => {
            let level = if debug {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            };
            env_logger::Builder::from_default_env()
                .filter_level(level)
                .init();

            if !input.exists() {
                eprintln!("Input file not found: {:?}", input);
                std::process::exit(1);
            }

            let mut config = match &config_path {
                Some(path) => {
                    log::info!("Loading configuration from {}", path.display());
                    Config::from_file(path)?
                }
                None => Config::default(),
            };
            apply_overrides(
                &mut config,
                &Overrides {
                    outdir,
                    speed_threshold,
                    max_travel_hours,
                    failure_window,
                    min_failures,
                    min_failures_multi_ip,
                    lookback_days,
                    case_window,
                },
            );

            analyze(&input, &config)?;
        }
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
    }

    Ok(())
}

fn analyze(input: &PathBuf, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Logsleuth v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Analyzing: {}", input.display());

    std::fs::create_dir_all(&config.output.outdir)?;

    log::info!("Step 1/4: Ingesting logs...");
    let (events, event_index) = parse_jsonl(input)?;
    log::info!("  Parsed {} events", events.len());

    log::info!("Step 2/4: Running detectors...");
    let alerts = run_all_detectors(&events, &config.detection);
    log::info!("  Generated {} alerts", alerts.len());

    log::info!("Step 3/4: Correlating alerts into cases...");
    let cases = correlate_cases(&alerts, &event_index, config.correlation.window_hours);
    log::info!("  Created {} cases", cases.len());

    log::info!("Step 4/4: Generating reports...");
    let alerts_path = config.output.outdir.join("alerts.json");
    let cases_json_path = config.output.outdir.join("cases.json");
    let cases_md_path = config.output.outdir.join("cases.md");

    write_alerts_json(&alerts, &alerts_path)?;
    write_cases_json(&cases, &cases_json_path)?;
    write_cases_md(&cases, &cases_md_path)?;

    println!();
    println!("{}", "=".repeat(60));
    println!("  ANALYSIS COMPLETE");
    println!("{}", "=".repeat(60));
    println!("  Events parsed:    {}", events.len());
    println!("  Alerts generated: {}", alerts.len());
    println!("  Cases created:    {}", cases.len());
    println!();
    println!("  Output files:");
    println!("    - {}", alerts_path.display());
    println!("    - {}", cases_json_path.display());
    println!("    - {}", cases_md_path.display());
    println!("{}", "=".repeat(60));

    if !cases.is_empty() {
        println!();
        println!("  Case Severity Breakdown:");
        for severity in [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
        ] {
            let count = cases
                .iter()
                .filter(|c| c.overall_severity == severity)
                .count();
            if count > 0 {
                println!("    {}: {}", severity.as_str().to_uppercase(), count);
            }
        }
    }

    Ok(())
}

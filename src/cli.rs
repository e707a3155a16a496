use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

use flowguard::config::Config;
use flowguard::ml::PerformanceMetrics;
use flowguard::pipeline::{DetectionBundle, DetectionPipeline, Report};

#[derive(Parser)]
#[command(name = "flowguard")]
#[command(author, version, about = "Network traffic anomaly detection")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit, train, detect on the held-out split, evaluate and report
    Full {
        /// Input dataset (CSV or JSON); synthetic traffic when omitted
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Fit and train, then save artifacts for later detection
    Train {
        /// Input dataset (CSV or JSON); synthetic traffic when omitted
        #[arg(long)]
        data: Option<PathBuf>,

        /// Artifact directory (defaults to output.model_dir)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },

    /// Score a dataset with previously saved artifacts
    Detect {
        /// Input dataset (CSV or JSON)
        #[arg(long)]
        data: PathBuf,

        /// Artifact directory (defaults to output.model_dir)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for per-method results
#[derive(Tabled)]
struct MethodRow {
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Anomalies")]
    anomalies: usize,
    #[tabled(rename = "Rate")]
    rate: String,
}

/// Table row for supervised metrics
#[derive(Tabled)]
struct MetricsRow {
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "F1")]
    f1_score: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

pub fn run_command(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Full { data } => cmd_full(config, data.as_deref()),
        Commands::Train { data, model_dir } => cmd_train(config, data.as_deref(), model_dir),
        Commands::Detect { data, model_dir } => cmd_detect(config, &data, model_dir),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn cmd_full(config: Config, data: Option<&Path>) -> Result<()> {
    println!("Running full detection pipeline...");

    let mut pipeline = DetectionPipeline::new(config);
    let report = pipeline.run_full(data).context("Full pipeline run failed")?;

    print_report(&report);
    println!(
        "\nReport written to {}",
        pipeline.config().report_path().display()
    );
    Ok(())
}

fn cmd_train(config: Config, data: Option<&Path>, model_dir: Option<PathBuf>) -> Result<()> {
    let model_dir = model_dir.unwrap_or_else(|| config.output.model_dir.clone());
    let mut pipeline = DetectionPipeline::new(config);

    let dataset = match data {
        Some(path) => pipeline
            .load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => pipeline.load_sample()?,
    };

    let prepared = pipeline.preprocess(&dataset, true)?;
    let train = prepared
        .train
        .as_ref()
        .context("Preprocessor produced no training partition")?;
    pipeline.train(train)?;
    pipeline
        .save_artifacts(&model_dir)
        .with_context(|| format!("Failed to save artifacts to {}", model_dir.display()))?;

    if let Some(timings) = pipeline.timings().train {
        println!(
            "Trained isolation_forest in {:.2}s, autoencoder in {:.2}s",
            timings.isolation_forest_sec, timings.autoencoder_sec
        );
    }
    println!(
        "{} {}",
        "Artifacts saved to".green(),
        model_dir.display()
    );
    Ok(())
}

fn cmd_detect(config: Config, data: &Path, model_dir: Option<PathBuf>) -> Result<()> {
    let model_dir = model_dir.unwrap_or_else(|| config.output.model_dir.clone());
    let mut pipeline = <DetectionPipeline>::from_artifacts(config, &model_dir)
        .with_context(|| format!("Failed to load artifacts from {}", model_dir.display()))?;

    let bundle = pipeline
        .run_detect_only(data)
        .with_context(|| format!("Detection failed for {}", data.display()))?;

    print_bundle(&bundle);
    if let Some(report) = pipeline.last_report() {
        print_metrics(&report.performance_metrics);
    }
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn rate(count: usize, total: usize) -> String {
    if total == 0 {
        return "-".to_string();
    }
    format!("{:.2}%", count as f64 * 100.0 / total as f64)
}

fn method_rows(counts: [(&str, usize); 3], total: usize) -> Vec<MethodRow> {
    counts
        .iter()
        .map(|&(method, anomalies)| MethodRow {
            method: method.to_string(),
            anomalies,
            rate: rate(anomalies, total),
        })
        .collect()
}

fn print_bundle(bundle: &DetectionBundle) {
    let counts = bundle.metadata.anomalies_detected;
    println!(
        "{} ({} samples, {} policy)",
        "Detection results".bold(),
        bundle.total_samples(),
        bundle.metadata.ensemble_method
    );
    println!(
        "{}",
        Table::new(method_rows(
            [
                ("isolation_forest", counts.isolation_forest),
                ("autoencoder", counts.autoencoder),
                ("ensemble", counts.ensemble),
            ],
            bundle.total_samples(),
        ))
    );
}

fn print_report(report: &Report) {
    let summary = &report.summary;
    let counts = summary.anomalies_detected;
    println!(
        "{} ({} samples)",
        "Detection summary".bold(),
        summary.total_samples
    );
    println!(
        "{}",
        Table::new(method_rows(
            [
                ("isolation_forest", counts.isolation_forest),
                ("autoencoder", counts.autoencoder),
                ("ensemble", counts.ensemble),
            ],
            summary.total_samples,
        ))
    );
    print_metrics(&report.performance_metrics);
}

fn print_metrics(metrics: &PerformanceMetrics) {
    match metrics {
        PerformanceMetrics::Supervised(m) => {
            let rows: Vec<MetricsRow> = [
                ("isolation_forest", &m.isolation_forest),
                ("autoencoder", &m.autoencoder),
                ("ensemble", &m.ensemble),
            ]
            .iter()
            .map(|(method, c)| MetricsRow {
                method: method.to_string(),
                precision: format!("{:.3}", c.precision),
                recall: format!("{:.3}", c.recall),
                f1_score: format!("{:.3}", c.f1_score),
                accuracy: format!("{:.3}", c.accuracy),
            })
            .collect();
            println!("\n{}", "Performance".bold());
            println!("{}", Table::new(rows));
        }
        PerformanceMetrics::Unsupervised(m) => {
            println!(
                "\nMethod agreement: {}",
                format!("{:.2}%", m.method_agreement * 100.0).cyan()
            );
        }
    }
}

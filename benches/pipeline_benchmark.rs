//! Pipeline stage benchmark
//!
//! Times preprocessing, training and detection over synthetic traffic of
//! increasing size. Run with `cargo bench --bench pipeline_benchmark`.

use std::time::{Duration, Instant};

use flowguard::data::generate_sample_data;
use flowguard::{Config, DetectionPipeline};

/// Benchmark dimensions
#[derive(Debug, Clone, Copy)]
struct BenchmarkDimensions {
    /// Synthetic rows generated
    rows: usize,
    /// Isolation forest trees
    estimators: usize,
    /// Autoencoder epochs
    epochs: usize,
}

/// Wall-clock time per stage
#[derive(Debug, Clone, Default)]
struct StageDurations {
    fit: Duration,
    train: Duration,
    transform: Duration,
    detect: Duration,
}

impl StageDurations {
    fn total(&self) -> Duration {
        self.fit + self.train + self.transform + self.detect
    }
}

fn run(dims: BenchmarkDimensions) -> flowguard::Result<StageDurations> {
    let mut config = Config::default();
    config.models.isolation_forest.n_estimators = dims.estimators;
    config.models.autoencoder.epochs = dims.epochs;

    let data = generate_sample_data(dims.rows, 42)?;
    let mut pipeline = DetectionPipeline::new(config);
    let mut durations = StageDurations::default();

    let start = Instant::now();
    let prepared = pipeline.preprocess(&data, true)?;
    durations.fit = start.elapsed();

    let start = Instant::now();
    if let Some(train) = prepared.train.as_ref() {
        pipeline.train(train)?;
    }
    durations.train = start.elapsed();

    let start = Instant::now();
    let all = pipeline.preprocess(&data, false)?;
    durations.transform = start.elapsed();

    let start = Instant::now();
    pipeline.detect(&all.test)?;
    durations.detect = start.elapsed();

    Ok(durations)
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn main() {
    let matrix = [
        BenchmarkDimensions { rows: 1_000, estimators: 50, epochs: 5 },
        BenchmarkDimensions { rows: 5_000, estimators: 100, epochs: 5 },
        BenchmarkDimensions { rows: 10_000, estimators: 100, epochs: 10 },
    ];

    println!(
        "{:>8} {:>6} {:>6} | {:>10} {:>10} {:>10} {:>10} | {:>10} {:>12}",
        "rows", "trees", "epochs", "fit ms", "train ms", "xform ms", "detect ms", "total ms", "detect rows/s"
    );
    println!("{}", "-".repeat(104));

    for dims in matrix {
        match run(dims) {
            Ok(d) => {
                let throughput = dims.rows as f64 / d.detect.as_secs_f64().max(1e-9);
                println!(
                    "{:>8} {:>6} {:>6} | {:>10.1} {:>10.1} {:>10.1} {:>10.1} | {:>10.1} {:>12.0}",
                    dims.rows,
                    dims.estimators,
                    dims.epochs,
                    ms(d.fit),
                    ms(d.train),
                    ms(d.transform),
                    ms(d.detect),
                    ms(d.total()),
                    throughput
                );
            }
            Err(e) => eprintln!("{:?}: {}", dims, e),
        }
    }
}

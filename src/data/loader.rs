//! Traffic dataset loading
//!
//! Reads CSV and JSON exports into a [`Dataset`], and generates a synthetic
//! labelled traffic sample for demos and tests.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, LogNormal, Poisson};
use tracing::{debug, info, warn};

use super::dataset::{Column, Dataset, Value};
use crate::error::{DetectorError, Result};

/// Load a dataset, dispatching on the file extension
pub fn load_from_file(path: &Path) -> Result<Dataset> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let dataset = match extension.as_deref() {
        Some("csv") => load_csv(path)?,
        Some("json") => load_json(path)?,
        _ => return Err(DetectorError::UnsupportedFormat(path.to_path_buf())),
    };

    info!(
        "Loaded {} records ({} columns) from {:?}",
        dataset.n_rows(),
        dataset.n_cols(),
        path
    );
    Ok(dataset)
}

/// Load a CSV file with a header row
pub fn load_csv(path: &Path) -> Result<Dataset> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers = dedup_headers(reader.headers()?.iter().map(|h| h.trim().to_string()));
    let mut values: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];

    for record in reader.records() {
        let record = record?;
        for (i, column) in values.iter_mut().enumerate() {
            column.push(record.get(i).map(Value::parse).unwrap_or(Value::Missing));
        }
    }

    Dataset::from_columns(
        headers
            .into_iter()
            .zip(values)
            .map(|(name, values)| Column::new(name, values))
            .collect(),
    )
}

/// Suffix repeated header names with `.1`, `.2`, ... so no column is lost
fn dedup_headers(raw: impl Iterator<Item = String>) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for name in raw {
        let mut candidate = name.clone();
        let mut n = 0;
        while headers.contains(&candidate) {
            n += 1;
            candidate = format!("{}.{}", name, n);
        }
        if n > 0 {
            warn!("Duplicate CSV header '{}' renamed to '{}'", name, candidate);
        }
        headers.push(candidate);
    }
    headers
}

/// Load a JSON file
///
/// Accepts an array of row objects, an object of column arrays, or an object
/// of `{index: value}` column maps.
pub fn load_json(path: &Path) -> Result<Dataset> {
    let file = File::open(path)?;
    let json: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;
    dataset_from_json(&json)
}

pub(crate) fn dataset_from_json(json: &serde_json::Value) -> Result<Dataset> {
    match json {
        serde_json::Value::Array(rows) => {
            let mut names: Vec<String> = Vec::new();
            for row in rows {
                if let serde_json::Value::Object(map) = row {
                    for key in map.keys() {
                        if !names.contains(key) {
                            names.push(key.clone());
                        }
                    }
                }
            }

            let columns = names
                .into_iter()
                .map(|name| {
                    let values = rows
                        .iter()
                        .map(|row| row.get(&name).map(Value::from_json).unwrap_or(Value::Missing))
                        .collect();
                    Column::new(name, values)
                })
                .collect();
            Dataset::from_columns(columns)
        }
        serde_json::Value::Object(map) => {
            let mut columns = Vec::with_capacity(map.len());
            for (name, cells) in map {
                let values = match cells {
                    serde_json::Value::Array(items) => items.iter().map(Value::from_json).collect(),
                    serde_json::Value::Object(indexed) => {
                        let mut entries: Vec<(&String, &serde_json::Value)> = indexed.iter().collect();
                        entries.sort_by_key(|(k, _)| k.parse::<usize>().unwrap_or(usize::MAX));
                        entries.into_iter().map(|(_, v)| Value::from_json(v)).collect()
                    }
                    scalar => vec![Value::from_json(scalar)],
                };
                columns.push(Column::new(name.clone(), values));
            }
            Dataset::from_columns(columns)
        }
        _ => Err(DetectorError::Serialization(
            "expected a JSON array of records or an object of columns".to_string(),
        )),
    }
}

/// Generate synthetic labelled traffic
///
/// Normal records follow typical flow distributions; 10% of rows are turned
/// into anomalies (large transfers or connection bursts) and labelled `attack`.
pub fn generate_sample_data(n_samples: usize, seed: u64) -> Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);

    let duration_dist = distribution(Exp::new(0.5))?;
    let src_bytes_dist = distribution(LogNormal::new(8.0, 1.5))?;
    let dst_bytes_dist = distribution(LogNormal::new(6.0, 1.2))?;
    let count_dist = distribution(Poisson::new(10.0))?;
    let srv_count_dist = distribution(Poisson::new(5.0))?;

    let duration: Vec<f64> = (0..n_samples).map(|_| duration_dist.sample(&mut rng)).collect();
    let mut src_bytes: Vec<f64> = (0..n_samples).map(|_| src_bytes_dist.sample(&mut rng)).collect();
    let dst_bytes: Vec<f64> = (0..n_samples).map(|_| dst_bytes_dist.sample(&mut rng)).collect();
    let mut count: Vec<f64> = (0..n_samples)
        .map(|_| -> f64 { count_dist.sample(&mut rng) })
        .collect();
    let srv_count: Vec<f64> = (0..n_samples)
        .map(|_| -> f64 { srv_count_dist.sample(&mut rng) })
        .collect();

    let protocol = (0..n_samples)
        .map(|_| weighted(&PROTOCOLS, &mut rng))
        .collect::<Result<Vec<&str>>>()?;
    let service: Vec<&str> = (0..n_samples)
        .map(|_| SERVICES[rng.random_range(0..SERVICES.len())])
        .collect();
    let flag = (0..n_samples)
        .map(|_| weighted(&FLAGS, &mut rng))
        .collect::<Result<Vec<&str>>>()?;

    let mut label = vec!["normal"; n_samples];
    let mut indices: Vec<usize> = (0..n_samples).collect();
    indices.shuffle(&mut rng);
    for &idx in indices.iter().take(n_samples / 10) {
        if rng.random::<f64>() > 0.5 {
            src_bytes[idx] *= 100.0;
        } else {
            count[idx] *= 50.0;
        }
        label[idx] = "attack";
    }

    debug!("Generated {} synthetic records", n_samples);

    Dataset::from_columns(vec![
        Column::numeric("duration", duration),
        Column::numeric("src_bytes", src_bytes),
        Column::numeric("dst_bytes", dst_bytes),
        Column::numeric("count", count),
        Column::numeric("srv_count", srv_count),
        Column::text("protocol", protocol),
        Column::text("service", service),
        Column::text("flag", flag),
        Column::text("label", label),
    ])
}

const PROTOCOLS: [(&str, f64); 3] = [("tcp", 0.7), ("udp", 0.2), ("icmp", 0.1)];
const SERVICES: [&str; 5] = ["http", "ftp", "telnet", "smtp", "dns"];
const FLAGS: [(&str, f64); 4] = [("SF", 0.6), ("S0", 0.2), ("REJ", 0.1), ("RSTR", 0.1)];

fn distribution<D, E: std::fmt::Display>(result: std::result::Result<D, E>) -> Result<D> {
    result.map_err(|e| DetectorError::Config(format!("invalid sampling distribution: {}", e)))
}

fn weighted<'a, R: Rng>(choices: &[(&'a str, f64)], rng: &mut R) -> Result<&'a str> {
    distribution(choices.choose_weighted(rng, |&(_, weight)| weight)).map(|&(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_csv() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("traffic.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "duration,protocol,label").unwrap();
        writeln!(file, "1.5,tcp,normal").unwrap();
        writeln!(file, ",udp,attack").unwrap();

        let ds = load_from_file(&path).unwrap();
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.column_names(), vec!["duration", "protocol", "label"]);
        assert_eq!(ds.column("duration").unwrap().values[1], Value::Missing);
        assert!(ds.column("duration").unwrap().is_numeric());
    }

    #[test]
    fn test_load_csv_keeps_duplicate_headers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dup.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "count,count,flag,count").unwrap();
        writeln!(file, "1,2,SF,3").unwrap();

        let ds = load_csv(&path).unwrap();
        assert_eq!(ds.column_names(), vec!["count", "count.1", "flag", "count.2"]);
        assert_eq!(ds.column("count").unwrap().values[0], Value::Number(1.0));
        assert_eq!(ds.column("count.1").unwrap().values[0], Value::Number(2.0));
        assert_eq!(ds.column("count.2").unwrap().values[0], Value::Number(3.0));
    }

    #[test]
    fn test_load_json_records() {
        let json = serde_json::json!([
            {"duration": 1.0, "protocol": "tcp"},
            {"duration": 2.0, "protocol": null, "flag": "SF"}
        ]);
        let ds = dataset_from_json(&json).unwrap();
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.n_cols(), 3);
        assert_eq!(ds.column("flag").unwrap().values[0], Value::Missing);
    }

    #[test]
    fn test_load_json_columns() {
        let json = serde_json::json!({
            "duration": {"0": 1.0, "1": 2.0, "10": 3.0, "2": 4.0},
            "flag": {"0": "SF", "1": "S0", "10": "REJ", "2": "SF"}
        });
        let ds = dataset_from_json(&json).unwrap();
        assert_eq!(ds.n_rows(), 4);
        assert_eq!(ds.column("duration").unwrap().values[3], Value::Number(3.0));
    }

    #[test]
    fn test_unsupported_format() {
        let err = load_from_file(Path::new("traffic.parquet")).unwrap_err();
        assert!(matches!(err, DetectorError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_generate_sample_data() {
        let ds = generate_sample_data(500, 42).unwrap();
        assert_eq!(ds.n_rows(), 500);
        assert_eq!(ds.n_cols(), 9);

        let attacks = ds
            .column("label")
            .unwrap()
            .values
            .iter()
            .filter(|v| **v == Value::Text("attack".into()))
            .count();
        assert_eq!(attacks, 50);

        // Same seed, same data
        assert_eq!(ds, generate_sample_data(500, 42).unwrap());

        let count = ds.column("count").unwrap();
        assert!(count.is_numeric());
        assert!(count
            .values
            .iter()
            .all(|v| v.as_number().is_some_and(|n| n >= 0.0 && n.fract() == 0.0)));

        let protocols = &ds.column("protocol").unwrap().values;
        let tcp = protocols.iter().filter(|v| **v == Value::Text("tcp".into())).count();
        assert!((250..450).contains(&tcp), "tcp share {} of 500", tcp);
    }
}

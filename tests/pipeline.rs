//! End-to-end pipeline runs on synthetic traffic

use std::path::Path;

use flowguard::data::{generate_sample_data, Column, Dataset, Value};
use flowguard::ml::PerformanceMetrics;
use flowguard::pipeline::{DETECTION_RESULTS_FILE, PipelineState};
use flowguard::{Config, DetectionPipeline, DetectorError};
use tempfile::TempDir;

fn fast_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.models.isolation_forest.n_estimators = 25;
    config.models.autoencoder.epochs = 3;
    config.data.sample_size = 1000;
    config.output.results_dir = dir.join("results");
    config.output.model_dir = dir.join("models");
    config
}

fn write_csv(path: &Path, data: &Dataset) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer.write_record(data.column_names()).unwrap();
    for row in 0..data.n_rows() {
        let record: Vec<String> = data
            .columns()
            .iter()
            .map(|c| match &c.values[row] {
                Value::Number(n) => n.to_string(),
                Value::Text(s) => s.clone(),
                Value::Missing => String::new(),
            })
            .collect();
        writer.write_record(&record).unwrap();
    }
    writer.flush().unwrap();
}

#[test]
fn test_end_to_end_labelled_run() {
    let temp = TempDir::new().unwrap();
    let report_path = temp.path().join("report.json");
    let mut pipeline = DetectionPipeline::new(fast_config(temp.path()));

    let data = generate_sample_data(1000, 7).unwrap();
    let prepared = pipeline.preprocess(&data, true).unwrap();
    pipeline.train(prepared.train.as_ref().unwrap()).unwrap();

    let all = pipeline.preprocess(&data, false).unwrap();
    assert_eq!(all.test.n_rows(), 1000);
    assert!(all.test.is_finite());

    pipeline.detect(&all.test).unwrap();
    let metrics = pipeline.evaluate(all.test_labels.as_deref()).unwrap();
    assert!(metrics.is_supervised());

    let report = pipeline.report(Some(&report_path)).unwrap();
    assert_eq!(report.summary.total_samples, 1000);

    let counts = report.summary.anomalies_detected;
    assert!(counts.isolation_forest <= 1000);
    assert!(counts.autoencoder <= 1000);
    assert!(counts.ensemble <= 1000);
    assert!(counts.ensemble >= counts.isolation_forest.max(counts.autoencoder));

    let rates = report.summary.detection_rates;
    for rate in [rates.isolation_forest, rates.autoencoder, rates.ensemble] {
        assert!((0.0..=1.0).contains(&rate));
    }

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["summary"]["total_samples"], 1000);
    assert_eq!(pipeline.state(), PipelineState::Reported);
}

#[test]
fn test_full_then_detect_only() {
    let temp = TempDir::new().unwrap();
    let config = fast_config(temp.path());

    let data = generate_sample_data(600, 11).unwrap();
    let train_csv = temp.path().join("train.csv");
    write_csv(&train_csv, &data);

    let mut trainer = DetectionPipeline::new(config.clone());
    let report = trainer.run_full(Some(&train_csv)).unwrap();
    assert_eq!(report.summary.total_samples, 120);
    assert!(config.report_path().is_file());
    let threshold = trainer.results().unwrap().autoencoder.threshold;

    // Drift: one feature column missing, one extra, one unseen category
    let mut drifted = data.without_column("srv_count");
    let protocol: Vec<Value> = (0..data.n_rows())
        .map(|i| Value::Text(if i == 0 { "sctp".to_string() } else { "tcp".to_string() }))
        .collect();
    drifted.push_column(Column::new("protocol", protocol)).unwrap();
    drifted
        .push_column(Column::numeric("extra", (0..data.n_rows()).map(|i| i as f64)))
        .unwrap();
    let detect_csv = temp.path().join("detect.csv");
    write_csv(&detect_csv, &drifted);

    let mut detector = <DetectionPipeline>::from_artifacts(config.clone(), &config.output.model_dir).unwrap();
    assert_eq!(detector.state(), PipelineState::ModelsTrained);

    let bundle = detector.run_detect_only(&detect_csv).unwrap();
    assert_eq!(bundle.total_samples(), 600);
    assert_eq!(bundle.ensemble.len(), 600);
    assert_eq!(bundle.autoencoder.threshold, threshold);
    assert!(config.output.results_dir.join(DETECTION_RESULTS_FILE).is_file());

    // Labels were present, so the run was evaluated and reported
    assert_eq!(detector.state(), PipelineState::Reported);
    assert!(matches!(
        detector.last_report().unwrap().performance_metrics,
        PerformanceMetrics::Supervised(_)
    ));
    assert!(detector.preprocessor().encoder("protocol").unwrap().get("sctp").is_some());
}

#[test]
fn test_detect_only_unlabelled() {
    let temp = TempDir::new().unwrap();
    let config = fast_config(temp.path());

    let mut trainer = DetectionPipeline::new(config.clone());
    let prepared = trainer.preprocess(&generate_sample_data(300, 3).unwrap(), true).unwrap();
    trainer.train(prepared.train.as_ref().unwrap()).unwrap();
    trainer.save_artifacts(&config.output.model_dir).unwrap();

    let unlabelled = generate_sample_data(50, 4).unwrap().without_column("label");
    let path = temp.path().join("unlabelled.csv");
    write_csv(&path, &unlabelled);

    let mut detector = <DetectionPipeline>::from_artifacts(config.clone(), &config.output.model_dir).unwrap();
    let bundle = detector.run_detect_only(&path).unwrap();

    assert_eq!(bundle.total_samples(), 50);
    assert_eq!(detector.state(), PipelineState::Detected);
    assert!(detector.last_report().is_none());
}

#[test]
fn test_detect_only_without_artifacts() {
    let temp = TempDir::new().unwrap();
    let config = fast_config(temp.path());

    let err = <DetectionPipeline>::from_artifacts(config.clone(), &config.output.model_dir)
        .err()
        .unwrap();
    assert!(matches!(err, DetectorError::MissingArtifact(_)));
}

#[test]
fn test_unsupported_input() {
    let pipeline = DetectionPipeline::new(Config::default());
    let err = pipeline.load(Path::new("capture.pcap")).unwrap_err();
    assert!(matches!(err, DetectorError::UnsupportedFormat(_)));
}

#[test]
fn test_detect_only_persists_new_categories() {
    let temp = TempDir::new().unwrap();
    let config = fast_config(temp.path());

    let mut trainer = DetectionPipeline::new(config.clone());
    let prepared = trainer.preprocess(&generate_sample_data(300, 5).unwrap(), true).unwrap();
    trainer.train(prepared.train.as_ref().unwrap()).unwrap();
    trainer.save_artifacts(&config.output.model_dir).unwrap();

    let with_protocols = |names: [&str; 2]| {
        let mut data = generate_sample_data(20, 6).unwrap();
        let protocol = (0..20).map(|i| Value::Text(names[i % 2].to_string())).collect();
        data.push_column(Column::new("protocol", protocol)).unwrap();
        data
    };

    let first = temp.path().join("first.csv");
    write_csv(&first, &with_protocols(["sctp", "gre"]));
    let mut detector = <DetectionPipeline>::from_artifacts(config.clone(), &config.output.model_dir).unwrap();
    detector.run_detect_only(&first).unwrap();
    let sctp = detector.preprocessor().encoder("protocol").unwrap().get("sctp");
    let gre = detector.preprocessor().encoder("protocol").unwrap().get("gre");
    assert!(sctp.is_some() && gre.is_some());

    // A later run sees the values in the opposite order but keeps their ids
    let second = temp.path().join("second.csv");
    write_csv(&second, &with_protocols(["gre", "sctp"]));
    let mut detector = <DetectionPipeline>::from_artifacts(config.clone(), &config.output.model_dir).unwrap();
    assert_eq!(detector.preprocessor().encoder("protocol").unwrap().get("sctp"), sctp);
    detector.run_detect_only(&second).unwrap();

    let encoder = detector.preprocessor().encoder("protocol").unwrap();
    assert_eq!(encoder.get("sctp"), sctp);
    assert_eq!(encoder.get("gre"), gre);
}

#[test]
fn test_values_beyond_f32_range_are_flagged() {
    let temp = TempDir::new().unwrap();
    let mut pipeline = DetectionPipeline::new(fast_config(temp.path()));

    let data = generate_sample_data(400, 9).unwrap();
    let prepared = pipeline.preprocess(&data, true).unwrap();
    pipeline.train(prepared.train.as_ref().unwrap()).unwrap();

    let mut extreme = generate_sample_data(10, 10).unwrap();
    let duration = (0..10)
        .map(|i| match i {
            0 => 1e39,
            1 => 1e300,
            _ => 1.0,
        })
        .collect::<Vec<f64>>();
    extreme.push_column(Column::numeric("duration", duration)).unwrap();

    let all = pipeline.preprocess(&extreme, false).unwrap();
    let index = pipeline
        .preprocessor()
        .schema()
        .unwrap()
        .columns()
        .iter()
        .position(|c| c == "duration")
        .unwrap();
    assert_eq!(all.test.rows()[0][index], f32::MAX);
    assert_eq!(all.test.rows()[1][index], f32::MAX);

    let bundle = pipeline.detect(&all.test).unwrap();
    assert!(bundle.autoencoder.anomalies[0]);
    assert!(bundle.autoencoder.anomalies[1]);
    assert!(bundle.ensemble[0] && bundle.ensemble[1]);
}

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ampliflow::config::{Config, ConfigLoader, PipelineConfig};
use ampliflow::domain::SampleState;
use ampliflow::error::AmpliflowError;
use ampliflow::pipeline::Pipeline;
use ampliflow::sample_set::{DiscoveryRule, SampleSet};
use ampliflow::stage::CheckpointAction;
use ampliflow::workspace::Workspace;

// 28-base amplicon; forward reads cover the first 20 bases, reverse reads the
// last 20, leaving a 12-base overlap for the merge stage.
const AMPLICON: &str = "ACGTTGCAATCCGGATTCAGGCATCGTA";

fn rc(seq: &str) -> String {
    seq.chars()
        .rev()
        .map(|base| match base {
            'A' => 'T',
            'T' => 'A',
            'G' => 'C',
            'C' => 'G',
            other => other,
        })
        .collect()
}

fn write_fastq(path: &std::path::Path, seqs: &[&str]) {
    let mut body = String::new();
    for (idx, seq) in seqs.iter().enumerate() {
        body.push_str(&format!("@read{idx}\n{seq}\n+\n{}\n", "I".repeat(seq.len())));
    }
    std::fs::write(path, body).unwrap();
}

fn write_pair(dir: &std::path::Path, sample: &str, amplicon: &str, copies: usize) {
    let fwd: Vec<&str> = (0..copies).map(|_| &amplicon[..20]).collect();
    let rev_seq = rc(&amplicon[8..]);
    let rev: Vec<&str> = (0..copies).map(|_| rev_seq.as_str()).collect();
    write_fastq(&dir.join(format!("{sample}_R1.fastq")), &fwd);
    write_fastq(&dir.join(format!("{sample}_R2.fastq")), &rev);
}

fn config() -> PipelineConfig {
    ConfigLoader::resolve_config(Config {
        min_length: Some(10),
        max_length: Some(100),
        min_overlap: Some(10),
        concurrency: Some(2),
        timeout_secs: Some(60),
        ..Config::default()
    })
    .unwrap()
}

fn rule() -> DiscoveryRule {
    DiscoveryRule::paired("_R1.fastq", "_R2.fastq")
}

fn setup(dir: &tempfile::TempDir) -> (Utf8PathBuf, Workspace) {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let workspace = Workspace::new(root.join("out"));
    (root, workspace)
}

#[test]
fn three_well_formed_samples_all_complete() {
    let dir = tempfile::tempdir().unwrap();
    let (root, workspace) = setup(&dir);
    let input = root.join("input");
    std::fs::create_dir(input.as_std_path()).unwrap();
    write_pair(input.as_std_path(), "S1", AMPLICON, 4);
    write_pair(input.as_std_path(), "S2", AMPLICON, 3);
    write_pair(input.as_std_path(), "S3", AMPLICON, 5);

    let samples = SampleSet::discover(&input, &rule()).unwrap();
    let pipeline = Pipeline::new(config(), workspace.clone(), true).unwrap();
    let report = pipeline.run(&samples).unwrap();

    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.retention.rows.len(), 3);
    assert!(report.retention.monotonicity_warnings.is_empty());

    // Each stage's column sum never exceeds the previous stage's.
    let totals: Vec<u64> = report
        .retention
        .summaries
        .iter()
        .map(|s| s.total_retained)
        .collect();
    assert_eq!(totals[0], 12);
    assert!(totals.windows(2).all(|pair| pair[1] <= pair[0]));

    assert!(workspace.retention_path().as_std_path().exists());
    assert!(workspace.report_path().as_std_path().exists());
    for stage in ["filter", "merge", "denoise", "chimera"] {
        assert!(workspace.stage_dir(stage).as_std_path().exists());
    }
    assert!(
        workspace
            .stage_file("chimera", "S1.fasta")
            .as_std_path()
            .exists()
    );
}

#[test]
fn one_failing_sample_does_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (root, workspace) = setup(&dir);
    let input = root.join("input");
    std::fs::create_dir(input.as_std_path()).unwrap();
    write_pair(input.as_std_path(), "S1", AMPLICON, 4);
    write_pair(input.as_std_path(), "S2", AMPLICON, 4);
    // Ambiguous bases in every read: zero reads survive filtering.
    write_pair(input.as_std_path(), "S3", "NNNNNNNNNNNNNNNNNNNNNNNNNNNN", 4);

    let samples = SampleSet::discover(&input, &rule()).unwrap();
    let pipeline = Pipeline::new(config(), workspace, true).unwrap();
    let report = pipeline.run(&samples).unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);

    let failed_row = report
        .retention
        .rows
        .iter()
        .find(|row| row.sample == "S3")
        .unwrap();
    assert_matches!(
        &failed_row.status,
        SampleState::Failed { stage, .. } if stage == "filter"
    );
    // The measured zero appears at the failing stage; stages never reached
    // show the sentinel.
    assert_eq!(failed_row.counts[0], Some(0));
    assert!(failed_row.counts[1..].iter().all(|count| count.is_none()));
}

#[test]
fn empty_directory_fails_before_any_stage() {
    let dir = tempfile::tempdir().unwrap();
    let (root, _workspace) = setup(&dir);
    let input = root.join("input");
    std::fs::create_dir(input.as_std_path()).unwrap();

    let err = SampleSet::discover(&input, &rule()).unwrap_err();
    assert_matches!(err, AmpliflowError::NoInputsFound(_));
}

#[test]
fn all_samples_failing_is_systemic() {
    let dir = tempfile::tempdir().unwrap();
    let (root, workspace) = setup(&dir);
    let input = root.join("input");
    std::fs::create_dir(input.as_std_path()).unwrap();
    write_pair(input.as_std_path(), "S1", "NNNNNNNNNNNNNNNNNNNNNNNNNNNN", 4);
    write_pair(input.as_std_path(), "S2", "NNNNNNNNNNNNNNNNNNNNNNNNNNNN", 4);

    let samples = SampleSet::discover(&input, &rule()).unwrap();
    let pipeline = Pipeline::new(config(), workspace.clone(), true).unwrap();
    let err = pipeline.run(&samples).unwrap_err();

    assert_matches!(err, AmpliflowError::SystemicFailure { failed: 2, total: 2, .. });
    // The retention table is still produced for diagnostics.
    assert!(workspace.retention_path().as_std_path().exists());
}

#[test]
fn second_run_reuses_the_denoise_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (root, workspace) = setup(&dir);
    let input = root.join("input");
    std::fs::create_dir(input.as_std_path()).unwrap();
    write_pair(input.as_std_path(), "S1", AMPLICON, 4);

    let samples = SampleSet::discover(&input, &rule()).unwrap();

    let first = Pipeline::new(config(), workspace.clone(), true)
        .unwrap()
        .run(&samples)
        .unwrap();
    assert_eq!(first.checkpoints.len(), 1);
    assert_eq!(first.checkpoints[0].action, CheckpointAction::Fit);

    let second = Pipeline::new(config(), workspace, true)
        .unwrap()
        .run(&samples)
        .unwrap();
    assert_eq!(second.checkpoints[0].action, CheckpointAction::Cached);
}

#[test]
fn changed_parameters_refit_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (root, workspace) = setup(&dir);
    let input = root.join("input");
    std::fs::create_dir(input.as_std_path()).unwrap();
    write_pair(input.as_std_path(), "S1", AMPLICON, 4);

    let samples = SampleSet::discover(&input, &rule()).unwrap();
    Pipeline::new(config(), workspace.clone(), true)
        .unwrap()
        .run(&samples)
        .unwrap();

    let changed = ConfigLoader::resolve_config(Config {
        min_length: Some(10),
        max_length: Some(100),
        min_overlap: Some(10),
        min_abundance: Some(3),
        concurrency: Some(2),
        timeout_secs: Some(60),
        ..Config::default()
    })
    .unwrap();
    let report = Pipeline::new(changed, workspace, true)
        .unwrap()
        .run(&samples)
        .unwrap();
    assert_eq!(report.checkpoints[0].action, CheckpointAction::Refit);
}

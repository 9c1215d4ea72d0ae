use netsirs::analysis::{AnalysisReport, DailySeries, ObsReport};
use netsirs::model::{Record, Summary};
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

const CONFIG: &str = r#"
[model]
n_nodes = 500
avg_degree = 6.0
days_to_recovered = 10.0
days_to_susceptible = 60.0
mortality_rate = 0.05
infection_rate = 0.3

[init]
pct_infected = 0.02
seed = 12345

[output]
horizon = 40.0
"#;

fn run_bin(args: &[&str]) -> Output {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_netsirs"));
    Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command")
}

fn assert_success(args: &[&str]) {
    let output = run_bin(args);

    let stdout_str =
        std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str =
        std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

    assert!(
        output.status.success(),
        "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );
}

fn read_msgpack<T: serde::de::DeserializeOwned>(file: &Path) -> T {
    let bytes = fs::read(file).expect("failed to read file");
    rmp_serde::from_slice(&bytes).expect("failed to deserialize file")
}

fn setup(name: &str, config: &str) -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);
    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    fs::write(test_dir.join("config.toml"), config).expect("failed to write config file");
    test_dir
}

#[test]
fn basic_workflow() {
    let test_dir = setup("basic_workflow", CONFIG);
    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert_success(&["--sim-dir", test_dir_str, "create"]);
    assert_success(&["--sim-dir", test_dir_str, "create", "--n-runs", "2"]);

    for run_idx in 0..3 {
        let run_dir = test_dir.join(format!("run-{run_idx:04}"));

        let trace: Vec<Record> = read_msgpack(&run_dir.join("trace.msgpack"));
        let summary: Summary = read_msgpack(&run_dir.join("summary.msgpack"));
        let daily: DailySeries = read_msgpack(&run_dir.join("daily.msgpack"));

        assert_eq!(trace[0].time, 0.0);
        assert_eq!(trace[0].n_infected, 10);
        assert!(trace.windows(2).all(|w| w[0].time < w[1].time));
        assert!(trace.windows(2).all(|w| w[0].n_deaths <= w[1].n_deaths));

        let last = trace.last().expect("empty trace");
        assert_eq!(summary.final_time, last.time);
        assert_eq!(summary.n_deaths, last.n_deaths);
        assert_eq!(daily.n_days(), 40);
    }

    // Runs seeded from the same base seed read different streams.
    let trace_a: Vec<Record> = read_msgpack(&test_dir.join("run-0000/trace.msgpack"));
    let trace_b: Vec<Record> = read_msgpack(&test_dir.join("run-0001/trace.msgpack"));
    assert_ne!(trace_a, trace_b);

    assert_success(&["--sim-dir", test_dir_str, "analyze"]);

    let report: AnalysisReport = read_msgpack(&test_dir.join("analysis.msgpack"));
    assert_eq!(report.n_runs, 3);
    let infected = report
        .observables
        .iter()
        .find_map(|obs| match obs {
            ObsReport::Series { name, reports } if name == "infected" => Some(reports),
            _ => None,
        })
        .expect("missing infected series");
    assert_eq!(infected.len(), 40);
    assert!(infected.iter().all(|r| r.n_vals == 3));

    assert_success(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!test_dir.join("run-0000").exists());
    assert!(!test_dir.join("analysis.msgpack").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_config_fails() {
    let config = CONFIG.replace("mortality_rate = 0.05", "mortality_rate = 1.5");
    let test_dir = setup("invalid_config_fails", &config);
    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    let output = run_bin(&["--sim-dir", test_dir_str, "create"]);
    assert!(!output.status.success());
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}

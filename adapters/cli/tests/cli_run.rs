use std::process::Command;

fn pic_resampling(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_pic-resampling"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to launch pic-resampling")
}

#[test]
fn reference_scenario_passes_its_checks() {
    let output = pic_resampling(&["run", "--check", "--json"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report is valid JSON");
    let checks = report["checks"].as_array().expect("checks array");
    assert!(!checks.is_empty());
    assert!(checks.iter().all(|check| check["passed"] == true));

    let names: Vec<&str> = report["species"]
        .as_array()
        .expect("species array")
        .iter()
        .filter_map(|species| species["name"].as_str())
        .collect();
    assert_eq!(names, vec!["uniform", "gaussian"]);
}

#[test]
fn invalid_target_ratio_is_refused() {
    let output = pic_resampling(&["run", "--target-ratio", "1.0"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

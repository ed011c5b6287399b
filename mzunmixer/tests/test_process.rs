use std::{error::Error, fs, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzunmixer")?;

    cmd.arg("not_real.jsonl").arg("-o").arg("-");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open input not_real.jsonl"));
    Ok(())
}

#[test]
fn test_malformed_mz_range() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzunmixer")?;

    cmd.arg("not_real.jsonl").arg("-o").arg("-").args(["-r", "a-z"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Failed to parse m/z range start invalid float literal",
    ));

    let mut cmd = Command::cargo_bin("mzunmixer")?;

    cmd.arg("not_real.jsonl").arg("-o").arg("-").args(["-r", "100:z"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Failed to parse m/z range end invalid float literal",
    ));

    Ok(())
}

#[test]
fn test_lambda_grid_without_zero() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzunmixer")?;

    cmd.arg("./tests/data/chimeric.jsonl")
        .args(["-o", "-", "-L", "0.1,0.2"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("must include 0"));
    Ok(())
}

#[test]
fn test_unknown_output_format() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzunmixer")?;

    cmd.arg("./tests/data/chimeric.jsonl")
        .args(["-o", "output.mzML"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "The output file format for output.mzML was either unknown or not supported",
    ));
    Ok(())
}

#[test]
fn test_run_to_stdout() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzunmixer")?;
    cmd.env("RUST_LOG", "info");
    cmd.arg("./tests/data/chimeric.jsonl").args(["-o", "-", "-t", "2"]);
    let result = cmd.assert().success();
    result
        .stdout(predicate::str::starts_with("spectrum_id\tstatus\tskip_reason"))
        .stdout(predicate::str::contains("scan=1\tfitted\t\t"))
        .stdout(predicate::str::contains("scan=2\tskipped\ttoo-few-candidates"))
        .stdout(predicate::str::contains("scan=3\tskipped\tno-observed-peaks"))
        .stdout(predicate::str::contains("PEPTIDEE"))
        .stderr(predicate::str::contains("Spectra: 4"))
        .stderr(predicate::str::contains("Skipped: 2 | Unreadable: 1"))
        .stderr(predicate::str::contains("Skipped (too-few-candidates): 1"))
        .stderr(predicate::str::contains("Skipped (no-observed-peaks): 1"));

    Ok(())
}

#[test]
fn test_run_to_jsonl() -> Result<(), Box<dyn Error>> {
    let dir = std::env::temp_dir().join(format!("mzunmixer-test-{}", std::process::id()));
    fs::create_dir_all(&dir)?;
    let output = dir.join("records.jsonl.gz");

    let mut cmd = Command::cargo_bin("mzunmixer")?;
    cmd.arg("./tests/data/chimeric.jsonl")
        .arg("-o")
        .arg(&output)
        .args(["-c", "aic", "-s", "coordinate-descent"]);
    cmd.assert().success();

    let handle = fs::File::open(&output)?;
    let mut text = String::new();
    std::io::Read::read_to_string(&mut flate2::read::GzDecoder::new(handle), &mut text)?;
    let ids: Vec<String> = text
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|record| record["spectrum_id"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids, vec!["scan=1", "scan=2", "scan=3", "scan=5"]);

    fs::remove_dir_all(&dir)?;
    Ok(())
}

use figment::{
    providers::{Format, Toml},
    Figment,
};

use mzunmixer::{ArgCriterion, ArgSolver, MZUnmixer, MzRange};

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_configured_run() {
    let mut config = Figment::new();
    config = config.merge(Toml::file_exact("./tests/data/configured.toml"));
    let driver: MZUnmixer = config.extract().unwrap();
    assert_eq!(driver.criterion, ArgCriterion::Cv);
    assert_eq!(driver.solver, ArgSolver::CoordinateDescent);
    assert_eq!(driver.mz_range, Some(MzRange::new(100.0, 1000.0)));
    driver.main().unwrap();

    let text = std::fs::read_to_string(&driver.output_file).unwrap();
    assert_eq!(text.lines().count(), 4);
    std::fs::remove_file(&driver.output_file).unwrap();
}

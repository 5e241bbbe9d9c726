//! Behaviour-driven tests for pipeline configuration loading.
//!
//! Tests use the rstest-bdd v0.5.0 mutable world pattern.

use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use rulehub::{ConfigError, PipelineConfig};
use tempfile::TempDir;

#[derive(Default)]
struct ConfigWorld {
    source: Option<String>,
    temp_dir: Option<TempDir>,
    file_path: Option<Utf8PathBuf>,
    outcome: Option<Result<PipelineConfig, ConfigError>>,
}

#[fixture]
fn world() -> ConfigWorld {
    ConfigWorld::default()
}

fn loaded(world: &ConfigWorld) -> &PipelineConfig {
    match world.outcome.as_ref() {
        Some(Ok(config)) => config,
        Some(Err(error)) => panic!("expected configuration loading to succeed: {error}"),
        None => panic!("configuration should be loaded"),
    }
}

// ---------------------------------------------------------------------------
// Step definitions
// ---------------------------------------------------------------------------

#[given("no configuration source")]
fn given_no_source(world: &mut ConfigWorld) {
    world.source = None;
}

#[given("a configuration setting the worker pool size to {jobs}")]
fn given_jobs_override(world: &mut ConfigWorld, jobs: usize) {
    world.source = Some(format!("jobs = {jobs}\n"));
}

#[given("a configuration containing an unknown key")]
fn given_unknown_key(world: &mut ConfigWorld) {
    world.source = Some("[fetch]\nmirror = true\n".to_owned());
}

#[given("a configuration file setting the validation engine to \"{engine}\"")]
fn given_config_file(world: &mut ConfigWorld, engine: String) {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = Utf8PathBuf::try_from(temp_dir.path().join("rulehub.toml")).expect("utf-8 path");
    std::fs::write(&path, format!("[validation]\nengine = \"{engine}\"\n"))
        .expect("write config");
    world.file_path = Some(path);
    world.temp_dir = Some(temp_dir);
}

#[when("the pipeline configuration is loaded")]
fn when_loaded(world: &mut ConfigWorld) {
    let outcome = match world.source.as_deref() {
        Some(source) => PipelineConfig::from_toml_str(source),
        None => Ok(PipelineConfig::default()),
    };
    world.outcome = Some(outcome);
}

#[when("the pipeline configuration is loaded from the file")]
fn when_loaded_from_file(world: &mut ConfigWorld) {
    let path = world.file_path.clone().expect("file path set");
    world.outcome = Some(PipelineConfig::load(&path));
}

#[then("the worker pool size is {expected}")]
fn then_jobs(world: &mut ConfigWorld, expected: usize) {
    assert_eq!(loaded(world).jobs, expected);
}

#[then("the validation engine is \"{expected}\"")]
fn then_engine(world: &mut ConfigWorld, expected: String) {
    assert_eq!(loaded(world).validation.engine, expected);
}

#[then("the fetch timeout is {seconds} seconds")]
fn then_fetch_timeout(world: &mut ConfigWorld, seconds: u64) {
    assert_eq!(loaded(world).fetch.timeout_secs, seconds);
}

#[then("a configuration error mentioning \"{snippet}\" is reported")]
fn then_error_mentions(world: &mut ConfigWorld, snippet: String) {
    match world.outcome.as_ref() {
        Some(Err(error)) => {
            let message = error.to_string();
            assert!(
                message.contains(snippet.as_str()),
                "expected error '{message}' to mention '{snippet}'"
            );
        }
        Some(Ok(config)) => {
            panic!("expected configuration loading to fail but succeeded with {config:?}")
        }
        None => panic!("configuration should be loaded"),
    }
}

// ---------------------------------------------------------------------------
// Scenario bindings
// ---------------------------------------------------------------------------

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "Defaults apply when no configuration is provided"
)]
fn scenario_defaults(world: ConfigWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "Overrides replace individual defaults"
)]
fn scenario_overrides(world: ConfigWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "Unknown keys are rejected"
)]
fn scenario_unknown_keys(world: ConfigWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "A zero-sized worker pool is rejected"
)]
fn scenario_zero_jobs(world: ConfigWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "Configuration is read from a file on disk"
)]
fn scenario_load_from_file(world: ConfigWorld) {
    let _ = world;
}

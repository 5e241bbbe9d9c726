//! Unit tests for rule validation.

use super::*;
use crate::test_utils::exit_status;
use rstest::rstest;

const TIMEOUT: Duration = Duration::from_secs(30);

fn pending(files: &[&str]) -> Vec<RuleFileRecord> {
    files
        .iter()
        .map(|file| RuleFileRecord::pending(SourceName::from("et"), Utf8PathBuf::from(*file)))
        .collect()
}

fn single_thread_pool() -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .expect("pool")
}

#[rstest]
#[case::valid(0, "", "", EngineOutcome::Valid)]
#[case::invalid_uses_stderr(
    1,
    "",
    "  bad rule at line 3\n",
    EngineOutcome::Invalid("bad rule at line 3".to_owned())
)]
#[case::invalid_falls_back_to_stdout(
    1,
    "parse error\n",
    "",
    EngineOutcome::Invalid("parse error".to_owned())
)]
fn exit_codes_map_to_outcomes(
    #[case] code: i32,
    #[case] stdout: &str,
    #[case] stderr: &str,
    #[case] expected: EngineOutcome,
) {
    assert_eq!(
        classify_exit(exit_status(code), stdout.as_bytes(), stderr.as_bytes()),
        expected
    );
}

#[test]
fn unexpected_exit_code_means_engine_unavailable() {
    let outcome = classify_exit(exit_status(127), b"", b"libhtp.so: cannot open");
    assert!(
        matches!(&outcome, EngineOutcome::Unavailable(reason) if reason.contains("127")),
        "{outcome:?}"
    );
}

#[cfg(unix)]
#[test]
fn signal_termination_means_engine_unavailable() {
    use std::os::unix::process::ExitStatusExt;

    let outcome = classify_exit(ExitStatus::from_raw(9), b"", b"");
    assert!(matches!(outcome, EngineOutcome::Unavailable(_)));
}

#[test]
fn missing_program_is_unavailable() {
    let engine = SubprocessEngine::new("/nonexistent/bin/suricata", vec!["-T".to_owned()]);
    let outcome = engine.check(Utf8Path::new("feodo.rules"), TIMEOUT);
    assert!(
        matches!(&outcome, EngineOutcome::Unavailable(reason) if reason.contains("not found")),
        "{outcome:?}"
    );
}

#[cfg(unix)]
mod subprocess {
    use super::*;
    use tempfile::NamedTempFile;

    fn shell(script: &str) -> SubprocessEngine {
        SubprocessEngine::new(
            "sh",
            vec!["-c".to_owned(), script.to_owned(), "engine".to_owned()],
        )
    }

    fn rule_file() -> (NamedTempFile, Utf8PathBuf) {
        let file = NamedTempFile::new().expect("temp file");
        let path = Utf8PathBuf::try_from(file.path().to_path_buf()).expect("utf-8 path");
        (file, path)
    }

    #[test]
    fn file_path_is_passed_as_last_argument() {
        let (_guard, path) = rule_file();
        let engine = shell(r#"test -f "$1""#);
        assert_eq!(engine.check(&path, TIMEOUT), EngineOutcome::Valid);
    }

    #[test]
    fn rejection_captures_stderr() {
        let (_guard, path) = rule_file();
        let engine = shell("echo 'invalid signature' >&2; exit 1");
        assert_eq!(
            engine.check(&path, TIMEOUT),
            EngineOutcome::Invalid("invalid signature".to_owned())
        );
    }

    #[test]
    fn slow_engine_is_killed() {
        let (_guard, path) = rule_file();
        let engine = shell("sleep 10");
        assert_eq!(
            engine.check(&path, Duration::from_millis(200)),
            EngineOutcome::TimedOut
        );
    }
}

#[test]
fn from_config_uses_engine_and_args() {
    let engine = SubprocessEngine::from_config(&ValidationConfig::default());
    assert_eq!(engine.program(), "suricata");
    assert_eq!(
        engine,
        SubprocessEngine::new("suricata", vec!["-T".to_owned(), "-S".to_owned()])
    );
}

#[test]
fn every_file_gets_exactly_one_invocation_in_order() {
    let mut engine = MockRuleValidationEngine::new();
    engine.expect_check().times(3).returning(|path, _| {
        if path.as_str().contains("bad") {
            EngineOutcome::Invalid("bad rule".to_owned())
        } else {
            EngineOutcome::Valid
        }
    });

    let result = validate_files(&engine, pending(&["a.rules", "bad.rules", "c.rules"]), TIMEOUT);

    assert!(result.engine_available);
    let statuses: Vec<_> = result.records.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ValidationStatus::Valid,
            ValidationStatus::Invalid,
            ValidationStatus::Valid
        ]
    );
    assert_eq!(result.records[1].diagnostic.as_deref(), Some("bad rule"));
    let paths: Vec<_> = result.records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["a.rules", "bad.rules", "c.rules"]);
}

#[test]
fn timeout_is_recorded_and_does_not_block_others() {
    let mut engine = MockRuleValidationEngine::new();
    engine.expect_check().returning(|path, _| {
        if path.as_str() == "slow.rules" {
            EngineOutcome::TimedOut
        } else {
            EngineOutcome::Valid
        }
    });

    let result = validate_files(&engine, pending(&["slow.rules", "fast.rules"]), TIMEOUT);

    assert_eq!(result.records[0].status, ValidationStatus::TimedOut);
    assert!(
        result.records[0]
            .diagnostic
            .as_deref()
            .is_some_and(|d| d.contains("30 s"))
    );
    assert_eq!(result.records[1].status, ValidationStatus::Valid);
}

#[test]
fn unavailable_engine_stops_further_invocations() {
    let mut engine = MockRuleValidationEngine::new();
    engine.expect_check().times(1).returning(|_, _| {
        EngineOutcome::Unavailable("validation engine `suricata` not found".to_owned())
    });

    let result = single_thread_pool().install(|| {
        validate_files(&engine, pending(&["a.rules", "b.rules", "c.rules"]), TIMEOUT)
    });

    assert!(!result.engine_available);
    let statuses: Vec<_> = result.records.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ValidationStatus::EngineMissing,
            ValidationStatus::Unvalidated,
            ValidationStatus::Unvalidated
        ]
    );
}

#[test]
fn unavailable_engine_is_reported_under_parallel_scheduling() {
    let mut engine = MockRuleValidationEngine::new();
    engine
        .expect_check()
        .returning(|_, _| EngineOutcome::Unavailable("missing".to_owned()));
    let files: Vec<String> = (0..16).map(|i| format!("{i:02}.rules")).collect();
    let names: Vec<&str> = files.iter().map(String::as_str).collect();

    let result = validate_files(&engine, pending(&names), TIMEOUT);

    assert!(!result.engine_available);
    assert_eq!(result.records.len(), 16);
    assert!(result.records.iter().all(|r| matches!(
        r.status,
        ValidationStatus::EngineMissing | ValidationStatus::Unvalidated
    )));
    assert!(
        result
            .records
            .iter()
            .any(|r| r.status == ValidationStatus::EngineMissing)
    );
}

#[rstest]
#[case::valid(EngineOutcome::Valid, ValidationStatus::Valid, true)]
#[case::invalid(
    EngineOutcome::Invalid("dup sid".to_owned()),
    ValidationStatus::Invalid,
    false
)]
#[case::timed_out(EngineOutcome::TimedOut, ValidationStatus::TimedOut, false)]
#[case::missing(
    EngineOutcome::Unavailable("missing".to_owned()),
    ValidationStatus::EngineMissing,
    false
)]
fn combined_validation_decides_deployability(
    #[case] outcome: EngineOutcome,
    #[case] status: ValidationStatus,
    #[case] deployable: bool,
) {
    let mut engine = MockRuleValidationEngine::new();
    engine
        .expect_check()
        .withf(|path, timeout| {
            path.as_str() == "combined_rules.rules" && *timeout == Duration::from_secs(60)
        })
        .times(1)
        .return_const(outcome);

    let result = validate_combined(
        &engine,
        Utf8Path::new("combined_rules.rules"),
        Duration::from_secs(60),
    );

    assert_eq!(result.status, status);
    assert_eq!(result.is_deployable(), deployable);
}

#[test]
fn status_labels() {
    assert_eq!(ValidationStatus::EngineMissing.to_string(), "engine missing");
    assert_eq!(ValidationStatus::TimedOut.to_string(), "timed out");
    assert_eq!(
        serde_json::to_string(&ValidationStatus::EngineMissing).expect("serialize"),
        "\"engine_missing\""
    );
}

use codejudge::config::FailFastPolicy;
use codejudge::{ComparisonMode, JudgeError, ValidationError, VerdictStatus};
use tokio_util::sync::CancellationToken;

use super::{request, test_config, test_engine};

#[tokio::test]
#[ignore = "requires root"]
async fn test_python_echo_passes() {
    let engine = test_engine(10, 1);
    let request = request("echo.py", "python3", &[("5\n", "5\n"), ("hello", "hello\n")]);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.overall_status, VerdictStatus::Passed);
    assert_eq!(result.passed_count(), 2);
    assert_eq!(result.test_verdicts[0].actual_output, "5\n");
    assert!(result.compile_error.is_none());
}

/// An echo program for every language in the shipped configuration
const ECHO_SOURCES: [(&str, &str); 7] = [
    ("c", "echo.c"),
    ("cpp17", "echo.cpp"),
    ("go", "echo.go"),
    ("java", "Main.java"),
    ("javascript", "echo.js"),
    ("python3", "echo.py"),
    ("rust", "echo.rs"),
];

#[test]
fn test_every_shipped_language_has_an_echo_program() {
    let config = test_config();
    let shipped: Vec<_> = config
        .languages
        .iter_sorted()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    let covered: Vec<_> = ECHO_SOURCES.iter().map(|(id, _)| *id).collect();
    assert_eq!(shipped, covered);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_every_runnable_language_echoes() {
    let engine = test_engine(18, 1);

    for (language, source) in ECHO_SOURCES {
        let request = request(source, language, &[("5\n", "5\n"), ("hello\n", "hello")]);
        let runnable = engine.config().runnable_language(language).is_ok();

        let result = engine.judge(request, CancellationToken::new()).await;
        if runnable {
            let result = result.unwrap_or_else(|e| panic!("{language}: {e}"));
            assert_eq!(
                result.overall_status,
                VerdictStatus::Passed,
                "{language}: {result:?}"
            );
        } else {
            // without cgroups the heavy runtimes are refused up front
            assert!(
                matches!(
                    result,
                    Err(JudgeError::Validation(ValidationError::UnsupportedLanguage(_)))
                ),
                "{language}"
            );
        }
    }
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_cpp_echo_passes() {
    let engine = test_engine(11, 1);
    let request = request(
        "echo.cpp",
        "cpp17",
        &[("1 2 3\n", "1 2 3"), ("a\nb\n", "a\nb\n")],
    );

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.overall_status, VerdictStatus::Passed);
    assert_eq!(result.test_verdicts.len(), 2);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_syntax_error_is_compile_error() {
    let engine = test_engine(12, 1);
    let request = request("syntax_error.cpp", "cpp17", &[("", "missing semicolon")]);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.overall_status, VerdictStatus::CompileError);
    assert!(result.test_verdicts.is_empty());
    assert!(result.compile_error.unwrap().contains("error"));
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_wrong_answer_and_trailing_whitespace() {
    let engine = test_engine(13, 1);
    // sum.py prints trailing spaces and a blank line
    let request = request("sum.py", "python3", &[("1 2\n", "3\n"), ("2 2\n", "5\n")]);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.test_verdicts[0].status, VerdictStatus::Passed);
    assert_eq!(result.test_verdicts[1].status, VerdictStatus::WrongAnswer);
    assert_eq!(result.overall_status, VerdictStatus::WrongAnswer);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_exact_mode_sees_trailing_whitespace() {
    let engine = test_engine(14, 1);
    let mut request = request("sum.py", "python3", &[("1 2\n", "3\n")]);
    request.test_cases[0].comparison = Some(ComparisonMode::Exact);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.overall_status, VerdictStatus::WrongAnswer);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_nonzero_exit_is_runtime_error() {
    let engine = test_engine(15, 1);
    let request = request("exit_code.py", "python3", &[("", "partial")]);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.overall_status, VerdictStatus::RuntimeError);
    assert_eq!(result.test_verdicts[0].actual_output, "partial\n");
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_files_do_not_leak_between_cases() {
    let engine = test_engine(16, 1);
    let request = request("leave_file.py", "python3", &[("", "clean"), ("", "clean")]);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.overall_status, VerdictStatus::Passed);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_stop_on_first_failure() {
    let mut config = test_config();
    config.pool.first_box_id = 17;
    config.pool.workers = Some(1);
    config.judge.fail_fast = FailFastPolicy::StopOnFirstFailure;
    let engine = codejudge::Engine::new(config);
    let request = request(
        "echo.py",
        "python3",
        &[("1", "1"), ("2", "not two"), ("3", "3")],
    );

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    let statuses: Vec<_> = result.test_verdicts.iter().map(|v| v.status).collect();
    assert_eq!(
        statuses,
        vec![
            VerdictStatus::Passed,
            VerdictStatus::WrongAnswer,
            VerdictStatus::Skipped
        ]
    );
}

//! Human-readable run reports

use oc_runner::RunResult;
use oc_scripting::{ConsoleEntry, ResultStatus, ScriptError, TestResult};
use std::fmt::Write;

fn mark(status: ResultStatus) -> &'static str {
    match status {
        ResultStatus::Pass => "✓",
        ResultStatus::Fail => "✗",
        ResultStatus::Skip => "-",
    }
}

fn push_console(out: &mut String, console: &[ConsoleEntry]) {
    if console.is_empty() {
        return;
    }
    let _ = writeln!(out, "\nConsole:");
    for entry in console {
        let _ = writeln!(out, "  [{}] {}", entry.level, entry.message);
    }
}

fn push_tests(out: &mut String, tests: &[TestResult]) {
    if tests.is_empty() {
        return;
    }
    let _ = writeln!(out, "\nTests:");
    for test in tests {
        let _ = writeln!(out, "  {} {}", mark(test.status), test.description);
        if let Some(error) = &test.error {
            let _ = writeln!(out, "      {error}");
        }
    }
}

/// Report for `oc run`
pub(crate) fn render_run(name: &str, result: &RunResult) -> String {
    let mut out = String::new();

    match &result.response {
        Some(response) => {
            let _ = writeln!(
                out,
                "{name}: {} {} ({} ms, {} bytes)",
                response.status, response.status_text, response.duration, response.size
            );
        }
        None => {
            let _ = writeln!(out, "{name}: no response");
        }
    }
    if let Some(error) = &result.error {
        let label = if result.is_cancel { "Cancelled" } else { "Error" };
        let _ = writeln!(out, "{label}: {error}");
    }

    push_console(&mut out, &result.console);
    push_tests(&mut out, &result.test_results);

    if !result.assertion_results.is_empty() {
        let _ = writeln!(out, "\nAssertions:");
        for assertion in &result.assertion_results {
            let _ = writeln!(
                out,
                "  {} {}: {}",
                mark(assertion.status),
                assertion.lhs_expr,
                assertion.rhs_expr
            );
            if let Some(error) = &assertion.error {
                let _ = writeln!(out, "      {error}");
            }
        }
    }

    let tests = result.test_summary();
    let assertions = result.assertion_summary();
    let _ = writeln!(
        out,
        "\nTests: {}/{} passed, Assertions: {}/{} passed",
        tests.passed, tests.total, assertions.passed, assertions.total
    );
    out
}

/// Report for `oc eval`
pub(crate) fn render_eval(
    console: &[ConsoleEntry],
    tests: &[TestResult],
    error: Option<&ScriptError>,
) -> String {
    let mut out = String::new();
    push_console(&mut out, console);
    push_tests(&mut out, tests);
    if let Some(error) = error {
        let _ = writeln!(out, "\nError: {error}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_core::Response;
    use oc_scripting::{ConsoleLevel, TestResult};

    #[test]
    fn test_render_run() {
        let result = RunResult {
            response: Some(Response::new(404)),
            test_results: vec![
                TestResult::pass("has body"),
                TestResult::fail("is ok", "expected 404 to equal 200"),
            ],
            console: vec![ConsoleEntry {
                level: ConsoleLevel::Warn,
                message: "slow".to_string(),
            }],
            ..Default::default()
        };

        let text = render_run("list", &result);
        assert!(text.starts_with("list: 404 Not Found"));
        assert!(text.contains("  [warn] slow\n"));
        assert!(text.contains("  ✗ is ok\n      expected 404 to equal 200\n"));
        assert!(text.contains("Tests: 1/2 passed, Assertions: 0/0 passed"));
    }

    #[test]
    fn test_render_cancelled_run() {
        let result = RunResult {
            error: Some("Request cancelled".to_string()),
            is_cancel: true,
            ..Default::default()
        };
        let text = render_run("list", &result);
        assert!(text.contains("list: no response\nCancelled: Request cancelled\n"));
    }

    #[test]
    fn test_render_eval_error() {
        let text = render_eval(&[], &[], Some(&ScriptError::execution("boom")));
        assert_eq!(text, "\nError: boom\n");
    }
}

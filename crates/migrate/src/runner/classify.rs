//! goose/YDB output classification
//!
//! Turns the text of a failed goose invocation into a [`RunnerError`] class
//! with an operator hint. Rules are checked in order, first match wins.
//! This is the only place in the crate that looks at runner message text.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::error::RunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transport,
    Deadline,
    Statement,
}

struct Rule {
    pattern: Regex,
    class: ErrorClass,
    hint: &'static str,
}

fn rule(pattern: &str, class: ErrorClass, hint: &'static str) -> Rule {
    let pattern = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("valid classification pattern");
    Rule {
        pattern,
        class,
        hint,
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    use ErrorClass::*;
    vec![
        rule(r"\bunauthenticated\b", Transport, "No valid credentials: check the access token."),
        rule(r"\bPERMISSION_DENIED\b", Transport, "Insufficient permissions: check roles and access to the database."),
        rule(r"\bDEADLINE_EXCEEDED\b|\bDeadlineExceeded\b|context deadline exceeded", Deadline, "Transport timeout: check the network or raise the timeout."),
        rule(r"found \d+ missing migrations", Statement, "An older migration is pending below the applied version: rerun with --allow-missing (PINMIG_ALLOW_MISSING=true) to apply it out of order."),
        rule(r"\bno migration \d+|migration file not found for current version|no current version found", Statement, "A newer migration is applied and goose rolls back from the current version: roll the newer migration back first."),
        rule(r#"Column: ".*?" already exists"#, Statement, "The column already exists: the Up step was applied outside of goose."),
        rule(r"code\s*=\s*400130|\bALREADY_EXISTS\b", Statement, "The object already exists: the step is equivalent to applied."),
        rule(r"code\s*=\s*400070|\bSCHEME_ERROR\b|\bGENERIC_ERROR\b", Statement, "Schema error: check the DDL, column names, types and the table path."),
        rule(r"code\s*=\s*400140|\bNOT_FOUND\b", Statement, "Schema object not found: check the database path and table name."),
        rule(r"code\s*=\s*400120|\bPRECONDITION_FAILED\b", Statement, "The database state does not allow this operation."),
        rule(r"code\s*=\s*400090|\bTIMEOUT\b", Deadline, "Server operation timeout: the statement may have been partially processed."),
        rule(r"code\s*=\s*400050|\bUNAVAILABLE\b", Transport, "The service is temporarily unavailable, retry later."),
        rule(r"code\s*=\s*400060|\bOVERLOADED\b", Transport, "The cluster is overloaded, retry with pauses."),
        rule(r"code\s*=\s*400100|\bBAD_SESSION\b|\bSESSION_BUSY\b", Transport, "The session is busy or broken, reconnect."),
        rule(r"code\s*=\s*400150|\bSESSION_EXPIRED\b", Transport, "The session expired, reconnect and retry."),
        rule(r"failed to run SQL migration", Statement, "A migration statement failed, see the runner output."),
    ]
});

static ERROR_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\berror\b|\bfailed\b|\bpanic\b").expect("valid regex"));

const UNKNOWN_HINT: &str = "Unknown goose/YDB error, see the runner output.";

/// Whether any classification rule recognizes the text
pub fn is_known_error(text: &str) -> bool {
    RULES.iter().any(|rule| rule.pattern.is_match(text))
}

/// Class and hint for a failure text
pub fn classify(text: &str) -> (ErrorClass, &'static str) {
    RULES
        .iter()
        .find(|rule| rule.pattern.is_match(text))
        .map(|rule| (rule.class, rule.hint))
        .unwrap_or((ErrorClass::Transport, UNKNOWN_HINT))
}

/// Build the classified error for a failed invocation
pub fn to_runner_error(text: &str) -> RunnerError {
    let (class, hint) = classify(text);
    let message = summarize(text);
    let hint = Some(hint.to_string());
    match class {
        ErrorClass::Transport => RunnerError::Transport { message, hint },
        ErrorClass::Deadline => RunnerError::Deadline { message, hint },
        ErrorClass::Statement => RunnerError::Statement { message, hint },
    }
}

/// First line that carries the error, falling back to the last non-empty line
fn summarize(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
    lines
        .iter()
        .find(|line| ERROR_LINE.is_match(line) || is_known_error(line))
        .or_else(|| lines.last())
        .copied()
        .unwrap_or("runner failed without output")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_column_is_statement_failure() {
        let text = "2024/01/01 10:00:00 goose run: ERROR 20240101_migration.sql: failed to run SQL migration: \
                    Column: \"remote_interface_access_key\" already exists";
        let (class, hint) = classify(text);
        assert_eq!(class, ErrorClass::Statement);
        assert!(hint.contains("column already exists"));
    }

    #[test]
    fn test_auth_wins_over_statement_rules() {
        let text = "failed to run SQL migration: UNAUTHENTICATED: token expired";
        assert_eq!(classify(text).0, ErrorClass::Transport);
    }

    #[test]
    fn test_deadline_during_call() {
        let err = to_runner_error("goose run: rpc error: code = DeadlineExceeded desc = context deadline exceeded");
        assert!(matches!(err, RunnerError::Deadline { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unknown_is_fatal_transport() {
        let err = to_runner_error("something odd\n\n");
        match err {
            RunnerError::Transport { message, hint } => {
                assert_eq!(message, "something odd");
                assert_eq!(hint.as_deref(), Some(UNKNOWN_HINT));
            }
            other => panic!("unexpected class: {other:?}"),
        }
    }

    #[test]
    fn test_missing_migrations_point_at_allow_missing() {
        let text = "2024/05/01 10:00:00 goose run: error: found 1 missing migrations before current version 20240102:\n\
                    \tversion 20240101: 20240101_add_email.sql";
        let err = to_runner_error(text);
        assert!(!err.is_fatal());
        match err {
            RunnerError::Statement { message, hint } => {
                assert!(message.contains("found 1 missing migrations"));
                assert!(hint.unwrap().contains("--allow-missing"));
            }
            other => panic!("unexpected class: {other:?}"),
        }
    }

    #[test]
    fn test_rollback_below_newer_version() {
        let (class, hint) = classify("2024/05/01 10:00:00 goose run: no migration 20240102");
        assert_eq!(class, ErrorClass::Statement);
        assert!(hint.contains("roll the newer migration back first"));
    }

    #[test]
    fn test_summary_keeps_first_error_line() {
        let text = "OK   20240101_a.sql (10ms)\n\
                    goose run: ERROR 20240102_b.sql: failed to run SQL migration: SCHEME_ERROR\n\
                    \tat line 3\n";
        let err = to_runner_error(text);
        assert!(err.to_string().contains("20240102_b.sql: failed to run SQL migration"));
    }

    #[test]
    fn test_overloaded_by_code() {
        assert_eq!(classify("status code = 400060").0, ErrorClass::Transport);
    }
}

pub mod inspect;
pub mod migrate;

use console::style;
use pinmig_core::ErrorPayload;
use pinmig_migrate::MigrateError;
use serde::Serialize;

/// Print a report to stdout, pretty JSON or text
pub(crate) fn emit<T: Serialize>(value: &T, text: impl FnOnce() -> String, json: bool) -> Result<(), MigrateError> {
    if json {
        let body = serde_json::to_string_pretty(value).map_err(pinmig_core::CoreError::from)?;
        println!("{}", body);
    } else {
        print!("{}", text());
    }
    Ok(())
}

/// Print a failure; JSON goes to stdout so scripts find it where the report would be
pub(crate) fn report_error(error: &MigrateError, json: bool) {
    let payload = ErrorPayload::from(error);
    if json {
        match serde_json::to_string_pretty(&serde_json::json!({ "error": &payload })) {
            Ok(body) => println!("{}", body),
            Err(_) => eprintln!("{}: {}", payload.code, payload.message),
        }
        return;
    }

    eprintln!("{} {}", style("error:").red().bold(), payload.message);
    if let Some(hint) = &payload.hint {
        eprintln!("{} {}", style("hint:").yellow(), hint);
    }
}

//! Plain-text output for native OpenSSH clients.

use ansi_term::Colour::{Green, Red, Yellow};
use sault_types::ErrorType;

pub(super) fn native_data(data: &serde_json::Value) -> Vec<u8> {
    let text = match data {
        serde_json::Value::Null => Green.paint("done").to_string(),
        serde_json::Value::String(s) => s.trim_end().to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    format!("{text}\n").into_bytes()
}

pub(super) fn native_error(error_type: ErrorType, message: &str) -> Vec<u8> {
    let mut text = format!("{} {message}\n", Red.bold().paint(format!("error ({error_type}):")));
    if let Some(hint) = error_type.hint() {
        text.push_str(&format!("{} {hint}\n", Yellow.paint("hint:")));
    }
    text.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_printed_raw() {
        let out = native_data(&serde_json::Value::String("[User]\n".into()));
        assert_eq!(out, b"[User]\n");
    }

    #[test]
    fn errors_carry_hints() {
        let out = String::from_utf8(native_error(ErrorType::DialFailed, "dial error: 10.0.0.5:22: timed out")).unwrap();
        assert!(out.contains("timed out"));
        assert!(out.contains("--skiptest"));
    }
}

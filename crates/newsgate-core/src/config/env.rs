//! `${ENV_VAR}` placeholder resolution for config file contents.
//!
//! Placeholders are resolved against the process environment before the
//! TOML is parsed, so any string field in any config file may reference an
//! environment variable (bearer tokens, instance URLs, secrets).

use std::env;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ConfigError;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"))
}

/// Replace every `${ENV_VAR}` occurrence in `input` with the value of the
/// named environment variable. Returns [`ConfigError::MissingEnvVar`] if any
/// referenced variable is unset.
pub fn resolve_placeholders(input: &str) -> Result<String, ConfigError> {
    let re = placeholder_re();
    let mut missing: Option<String> = None;
    let resolved = re.replace_all(input, |caps: &regex::Captures<'_>| {
        let var = &caps[1];
        match env::var(var) {
            Ok(v) => v,
            Err(_) => {
                if missing.is_none() {
                    missing = Some(var.to_string());
                }
                String::new()
            }
        }
    });
    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar { var });
    }
    Ok(resolved.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_single_placeholder() {
        std::env::set_var("NG_TEST_VAR_A", "hello");
        let out = resolve_placeholders("token = \"${NG_TEST_VAR_A}\"").unwrap();
        assert_eq!(out, "token = \"hello\"");
        std::env::remove_var("NG_TEST_VAR_A");
    }

    #[test]
    fn missing_var_errors() {
        std::env::remove_var("NG_TEST_VAR_MISSING");
        let err = resolve_placeholders("x = \"${NG_TEST_VAR_MISSING}\"").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar { var } if var == "NG_TEST_VAR_MISSING"));
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let out = resolve_placeholders("plain = \"value\"").unwrap();
        assert_eq!(out, "plain = \"value\"");
    }
}

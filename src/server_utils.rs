use std::rc::Rc;

use crate::api::Behavior;
use crate::behaviors;
use crate::compiler::{compile_file, CompileError};
use crate::constants::TICK_MS;

pub const MAX_SCRIPT_BYTES: usize = 64 * 1024;
const MIN_TICK_MS: u64 = 5;
const MAX_TICK_MS: u64 = 1_000;

/// `EnvFilter` from `RUST_LOG` (default `info`); `LOG_FORMAT=json` switches
/// to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

pub fn normalize_tick_ms(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .map(|value| value.clamp(MIN_TICK_MS, MAX_TICK_MS))
        .unwrap_or(TICK_MS)
}

pub fn parse_seed(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
}

pub fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|value| value.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

pub fn validate_script_source(source: &str) -> Result<(), String> {
    if source.trim().is_empty() {
        return Err("script is empty".to_string());
    }
    if source.len() > MAX_SCRIPT_BYTES {
        return Err(format!(
            "script is {} bytes, the limit is {MAX_SCRIPT_BYTES}",
            source.len()
        ));
    }
    Ok(())
}

/// A built-in behavior name (`hunter`, `sentry`) or a path to a script.
pub fn resolve_behavior(spec: &str) -> Result<Rc<dyn Behavior>, CompileError> {
    if let Some(builtin) = behaviors::by_name(spec.trim()) {
        return Ok(builtin);
    }
    let compiled: Rc<dyn Behavior> = Rc::new(compile_file(spec.trim())?);
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn tick_ms_is_clamped_and_defaulted() {
        assert_eq!(normalize_tick_ms(None), TICK_MS);
        assert_eq!(normalize_tick_ms(Some("abc")), TICK_MS);
        assert_eq!(normalize_tick_ms(Some(" 33 ")), 33);
        assert_eq!(normalize_tick_ms(Some("0")), MIN_TICK_MS);
        assert_eq!(normalize_tick_ms(Some("999999")), MAX_TICK_MS);
    }

    #[test]
    fn seed_parsing_is_lenient_for_invalid_values() {
        assert_eq!(parse_seed(Some("42")), Some(42));
        assert_eq!(parse_seed(Some("-1")), None);
        assert_eq!(parse_seed(Some("4294967296")), None);
        assert_eq!(parse_seed(None), None);
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some(" TRUE ")));
        assert!(!parse_flag(Some("0")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn script_source_limits() {
        assert!(validate_script_source("#{ run: |api| {} }").is_ok());
        assert!(validate_script_source("   ").is_err());
        assert!(validate_script_source(&"x".repeat(MAX_SCRIPT_BYTES + 1)).is_err());
    }

    #[test]
    fn behavior_specs_resolve_builtins_and_files() {
        assert!(resolve_behavior("hunter").is_ok());
        assert!(resolve_behavior(" sentry ").is_ok());

        let mut file = NamedTempFile::new().expect("temp script");
        write!(file, "#{{ run: |api| {{ api.rotate(10); }} }}").expect("write script");
        let path = file.path().to_string_lossy().to_string();
        assert!(resolve_behavior(&path).is_ok());

        assert!(matches!(
            resolve_behavior("/definitely/not/here.rhai"),
            Err(CompileError::Io { .. })
        ));
    }
}

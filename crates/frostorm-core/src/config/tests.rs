use super::*;
use crate::error::{ErrorClass, ErrorOrigin};

#[test]
fn empty_object_yields_defaults() {
    let config = SessionConfig::from_json("{}").unwrap();

    assert_eq!(config, SessionConfig::default());
    assert!(config.statement_cache);
    assert_eq!(config.flush_mode, FlushMode::Auto);
}

#[test]
fn fields_parse_in_snake_case() {
    let config = SessionConfig::from_json(
        r#"{ "debug": true, "flush_mode": "commit", "dialect": "postgres", "default_lock": "write" }"#,
    )
    .unwrap();

    assert!(config.debug);
    assert_eq!(config.flush_mode, FlushMode::Commit);
    assert_eq!(config.dialect, DialectKind::Postgres);
    assert_eq!(config.default_lock, LockMode::Write);
}

#[test]
fn unknown_fields_and_bad_values_are_config_errors() {
    for text in [r#"{ "flush": "auto" }"#, r#"{ "dialect": "oracle" }"#, "not json"] {
        let err = SessionConfig::from_json(text).unwrap_err();
        assert_eq!(err.origin, ErrorOrigin::Config, "{text}");
        assert_eq!(err.class, ErrorClass::Unsupported, "{text}");
    }
}

#[test]
fn json_output_parses_back() {
    let config = SessionConfig::default()
        .with_debug(true)
        .with_dialect(DialectKind::Postgres);

    let text = config.to_json().unwrap();

    assert_eq!(SessionConfig::from_json(&text).unwrap(), config);
}

//! Unit tests for `AppError` display format and conversions.

use handoff::AppError;

#[test]
fn display_prefixes_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Spawn("bad".into()), "spawn: bad"),
        (AppError::Io("bad".into()), "io: bad"),
        (AppError::Archive("bad".into()), "archive: bad"),
        (AppError::Pattern("bad".into()), "pattern: bad"),
        (AppError::Signal("bad".into()), "signal: bad"),
        (AppError::Scheduler("bad".into()), "scheduler: bad"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_error_converts_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "gone"));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse: Result<toml::Value, _> = toml::from_str("key = ");
    let err: AppError = parse.expect_err("invalid toml").into();
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn glob_error_converts_to_pattern_variant() {
    let err: AppError = glob::Pattern::new("[").expect_err("bad glob").into();
    assert!(matches!(err, AppError::Pattern(_)));
}

#[test]
fn implements_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&AppError::Archive("x".into()));
}

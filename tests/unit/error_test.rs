//! Tests for error types

use fix_dispatch::core::DispatchError;

#[test]
fn test_error_display() {
    let err = DispatchError::AcquireTimeout {
        pool: "web".into(),
        waited_ms: 1000,
    };
    assert_eq!(err.to_string(), "acquire timed out on pool `web` after 1000ms");

    let err = DispatchError::not_found("pattern", "p-1");
    assert_eq!(err.to_string(), "pattern not found: p-1");

    let err = DispatchError::StaleData("expected value".into());
    assert!(err.to_string().contains("expected value"));
}

#[test]
fn test_retryable_errors() {
    assert!(DispatchError::AcquireTimeout {
        pool: "web".into(),
        waited_ms: 5
    }
    .is_retryable());
    assert!(DispatchError::LockContention {
        key: "pools/web".into(),
        attempts: 3
    }
    .is_retryable());
    assert!(!DispatchError::Config("bad".into()).is_retryable());
    assert!(!DispatchError::not_found("pool", "x").is_retryable());
    assert!(!DispatchError::Backend("io".into()).is_retryable());
}

#[test]
fn test_errors_convert_into_anyhow() {
    fn fails() -> fix_dispatch::core::AppResult<()> {
        let result: Result<(), DispatchError> = Err(DispatchError::Config("missing pool".into()));
        result?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert!(err.downcast_ref::<DispatchError>().is_some());
}

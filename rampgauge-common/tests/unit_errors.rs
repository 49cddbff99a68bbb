use rampgauge_common::RampGaugeError;

#[test]
fn test_error_display() {
    assert_eq!(
        RampGaugeError::NoStages.to_string(),
        "Run plan has no stages"
    );
    assert_eq!(
        RampGaugeError::NoEndpoints.to_string(),
        "Run plan has no endpoints"
    );
}

#[test]
fn test_stage_duration_error() {
    let err = RampGaugeError::InvalidStageDuration {
        index: 2,
        duration_secs: 0.0,
    };
    assert_eq!(err.to_string(), "Stage 2 has invalid duration: 0s");
}

#[test]
fn test_error_equality() {
    let err1 = RampGaugeError::NetworkError("connection refused".to_string());
    let err2 = RampGaugeError::NetworkError("connection refused".to_string());
    let err3 = RampGaugeError::NetworkError("reset".to_string());

    assert_eq!(err1, err2);
    assert_ne!(err1, err3);
}

#[test]
fn test_network_error() {
    let err = RampGaugeError::NetworkError("connection failed".to_string());
    assert_eq!(err.to_string(), "Network error: connection failed");
}

#[test]
fn test_timeout() {
    assert_eq!(
        RampGaugeError::Timeout(10_000).to_string(),
        "Request timed out after 10000 ms"
    );
}

#[test]
fn test_invalid_threshold() {
    let err = RampGaugeError::InvalidThreshold {
        name: "failure_rate",
        value: 1.5,
    };
    assert_eq!(err.to_string(), "Invalid threshold failure_rate: 1.5");
}

#[test]
fn test_invalid_endpoint() {
    let err = RampGaugeError::InvalidEndpoint(
        "nope".to_string(),
        "relative URL without a base".to_string(),
    );
    assert_eq!(
        err.to_string(),
        "Invalid endpoint URL \"nope\": relative URL without a base"
    );
}

#[test]
fn test_duplicate_endpoint() {
    let err = RampGaugeError::DuplicateEndpoint("http://h:1/".to_string());
    assert_eq!(err.to_string(), "Duplicate base endpoint \"http://h:1/\"");
}

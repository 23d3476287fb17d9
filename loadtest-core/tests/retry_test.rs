use loadtest_core::{
    classify_rpc_error, is_rejection, is_transient_error, poll_with_backoff, with_retry,
    PollOutcome, RetryConfig, RpcErrorKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_retry_success_first_try() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(3, 10).without_jitter();

    let result: Result<String, anyhow::Error> = with_retry(config, "test_op", || async {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok("success".to_string())
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_success_after_failures() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(3, 10).without_jitter();

    let result: Result<String, anyhow::Error> = with_retry(config, "test_op", || async {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count < 3 {
            Err(anyhow::anyhow!("connection reset by peer"))
        } else {
            Ok("success".to_string())
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_all_failures() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(3, 10).without_jitter();

    let result: Result<String, anyhow::Error> = with_retry(config, "test_op", || async {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("503 service unavailable"))
    })
    .await;

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_retry_gives_up_on_permanent_errors() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(3, 10).without_jitter();

    let result: Result<String, anyhow::Error> = with_retry(config, "test_op", || async {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("invalid chain id"))
    })
    .await;

    assert_eq!(result.unwrap_err().to_string(), "invalid chain id");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_returns_first_value() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(5, 100).without_jitter();
    let token = CancellationToken::new();

    let start = tokio::time::Instant::now();
    let outcome = poll_with_backoff(config, &token, || {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok((n == 2).then_some("receipt"))
        }
    })
    .await
    .unwrap();

    assert_eq!(outcome, PollOutcome::Ready("receipt"));
    // Waited 100ms then 200ms between the three attempts.
    assert_eq!(start.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_poll_exhausts_attempts() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(4, 10).without_jitter();
    let token = CancellationToken::new();

    let outcome: PollOutcome<()> = poll_with_backoff(config, &token, || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("not found"))
        }
    })
    .await
    .unwrap();

    assert_eq!(outcome, PollOutcome::Exhausted { attempts: 4 });
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_poll_observes_cancellation() {
    let config = RetryConfig::new(100, 1_000).without_jitter();
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        cancel.cancel();
    });

    let result = poll_with_backoff(config, &token, || async { Ok(None::<u8>) }).await;
    assert!(result.unwrap_err().is_cancelled());
}

#[test]
fn test_rejections_are_not_transient() {
    for msg in [
        "nonce too low: next nonce 5, tx nonce 3",
        "already known",
        "replacement transaction underpriced",
        "transaction underpriced",
        "insufficient funds for gas * price + value",
    ] {
        assert_eq!(classify_rpc_error(msg), RpcErrorKind::Rejected, "{msg}");
        assert!(is_rejection(&anyhow::anyhow!(msg.to_string())));
        assert!(!is_transient_error(&anyhow::anyhow!(msg.to_string())));
    }
}

#[test]
fn test_transient_error_detection() {
    let timeout_error = anyhow::anyhow!("Request timeout");
    let rate_limit_error = anyhow::anyhow!("429 Too Many Requests");
    let reset_error = anyhow::anyhow!("Connection reset by peer");
    let permanent_error = anyhow::anyhow!("execution reverted");

    assert!(is_transient_error(&timeout_error));
    assert!(is_transient_error(&rate_limit_error));
    assert!(is_transient_error(&reset_error));
    assert!(!is_transient_error(&permanent_error));
    assert_eq!(
        classify_rpc_error("execution reverted"),
        RpcErrorKind::Other
    );
}

#[test]
fn test_classification_case_insensitive() {
    assert_eq!(classify_rpc_error("NONCE TOO LOW"), RpcErrorKind::Rejected);
    assert_eq!(classify_rpc_error("TiMeOuT"), RpcErrorKind::Transient);
}

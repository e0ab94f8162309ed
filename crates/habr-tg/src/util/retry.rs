use crate::prelude::*;
use chrono::prelude::*;
use retry_policies::{RetryDecision, RetryPolicy};
use std::future::Future;
use std::time::Duration;

/// Runs `f` until it succeeds or the policy gives up, in which case the error
/// of the last attempt is returned.
pub(crate) async fn retry<T, E, Fut>(policy: &impl RetryPolicy, mut f: impl FnMut() -> Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let mut past_retries = 0;
    loop {
        let err = match f().await {
            Ok(output) => {
                if past_retries > 0 {
                    warn!(%past_retries, "Operation succeeded after a retry");
                }
                return Ok(output);
            }
            Err(err) => err,
        };

        let execute_after = match policy.should_retry(past_retries) {
            RetryDecision::Retry { execute_after } => execute_after,
            RetryDecision::DoNotRetry => {
                warn!(%past_retries, err = tracing_err(&err), "Giving up retrying the operation");
                return Err(err);
            }
        };

        let delay = execute_after
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        debug!(
            %past_retries,
            err = tracing_err(&err),
            delay = tracing_duration(delay),
            "Sleeping before the next attempt",
        );

        tokio::time::sleep(delay).await;

        past_retries += 1;
    }
}

//! Bootstrap connection with exponential backoff.

use super::PeerNetwork;
use crate::config::RetryPolicy;

/// Try to reach the bootstrap node at `host:port`, backing off between attempts.
///
/// Makes at most `policy.max_retries` attempts (at least one) and does not
/// sleep after the last one. Returns whether a connection was made.
pub async fn connect_with_retry<N>(network: &N, host: &str, port: u16, policy: &RetryPolicy) -> bool
where
    N: PeerNetwork + ?Sized,
{
    let attempts = policy.max_retries.max(1);
    let delays = policy.delays();

    for attempt in 1..=attempts {
        if network.connect_to_bootstrap(host, port).await {
            log::info!(
                "Connected to bootstrap node {}:{} on attempt {}",
                host,
                port,
                attempt
            );
            return true;
        }

        match delays.get(attempt as usize - 1) {
            Some(delay) => {
                log::warn!(
                    "Bootstrap attempt {}/{} to {}:{} failed, retrying in {:?}",
                    attempt,
                    attempts,
                    host,
                    port,
                    delay
                );
                tokio::time::sleep(*delay).await;
            }
            None => log::warn!(
                "Bootstrap attempt {}/{} to {}:{} failed",
                attempt,
                attempts,
                host,
                port
            ),
        }
    }

    log::error!(
        "Could not reach bootstrap node {}:{} after {} attempts",
        host,
        port,
        attempts
    );
    false
}

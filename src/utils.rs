//! # Utility Functions
//!
//! Common helpers used throughout the staking client: address and txid
//! validation, amount formatting, bounded retry and the poll-until-predicate
//! primitive used while waiting for delegation verification.

use crate::error::{StakingError, StakingResult};
use bitcoin::{Address, Network};
use std::str::FromStr;

/// Address utilities
pub mod address {
    use super::*;

    /// Address display lengths
    const DISPLAY_PREFIX: usize = 8;
    const DISPLAY_SUFFIX: usize = 5;

    /// Format an address for display with ellipsis in the middle
    ///
    /// # Returns
    /// Formatted address string like "tb1p9cal...ke3fs"
    pub fn format_short(address: &str) -> String {
        if address.len() <= DISPLAY_PREFIX + DISPLAY_SUFFIX + 3 {
            address.to_string()
        } else {
            format!(
                "{}...{}",
                &address[..DISPLAY_PREFIX],
                &address[address.len() - DISPLAY_SUFFIX..]
            )
        }
    }

    /// Validate and parse a Bitcoin address for the given network
    pub fn validate_and_parse(address_str: &str, network: Network) -> StakingResult<Address> {
        let address = Address::from_str(address_str).map_err(|_| {
            StakingError::invalid_input(format!("Invalid address: {}", address_str))
        })?;

        address.require_network(network).map_err(|_| {
            StakingError::invalid_input(format!(
                "Address {} is not valid for {}",
                address_str, network
            ))
        })
    }
}

/// Transaction ID utilities
pub mod txid {
    use super::*;

    const DISPLAY_PREFIX: usize = 8;
    const DISPLAY_SUFFIX: usize = 8;

    /// Format a transaction ID for display
    pub fn format_short(txid: &str) -> String {
        if txid.len() <= DISPLAY_PREFIX + DISPLAY_SUFFIX + 3 {
            txid.to_string()
        } else {
            format!(
                "{}...{}",
                &txid[..DISPLAY_PREFIX],
                &txid[txid.len() - DISPLAY_SUFFIX..]
            )
        }
    }

    /// Validate transaction ID format (64 hex characters)
    pub fn validate(txid: &str) -> StakingResult<()> {
        if txid.len() != 64 {
            return Err(StakingError::invalid_input(format!(
                "Transaction ID must be 64 characters, got {}",
                txid.len()
            )));
        }

        if !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StakingError::invalid_input(
                "Transaction ID must contain only hexadecimal characters",
            ));
        }

        Ok(())
    }
}

/// Amount formatting utilities
pub mod amount {
    /// Convert satoshis to BTC with 8 decimal places
    pub fn sats_to_btc(sats: u64) -> f64 {
        sats as f64 / 100_000_000.0
    }

    /// Format amount with both sats and BTC
    pub fn format_dual(sats: u64) -> String {
        format!("{} sats ({:.8} BTC)", sats, sats_to_btc(sats))
    }
}

/// Time utilities
pub mod time {
    /// Blocks left until a relative timelock starting at `start_height` expires
    pub fn blocks_remaining(current_height: u32, start_height: u32, timelock: u16) -> u32 {
        (start_height + timelock as u32).saturating_sub(current_height)
    }
}

/// Retry utilities
pub mod retry {
    use super::*;
    use crate::config::network::{MAX_RETRY_ATTEMPTS, RETRY_DELAY};
    use std::future::Future;
    use tokio::time::sleep;

    /// Retry an async operation with exponential backoff.
    ///
    /// Only errors classified as retryable are retried; everything else,
    /// geo-blocking included, is returned on the first failure.
    pub async fn with_backoff<F, Fut, T>(mut operation: F) -> StakingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StakingResult<T>>,
    {
        let mut attempts = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    attempts += 1;
                    if !error.is_retryable() || attempts >= MAX_RETRY_ATTEMPTS {
                        return Err(error);
                    }

                    let delay = RETRY_DELAY * 2_u32.pow(attempts - 1);
                    log::warn!(
                        "Operation failed (attempt {}), retrying in {:?}: {}",
                        attempts,
                        delay,
                        error
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Poll-until-predicate primitive
pub mod poll {
    use super::*;
    use std::future::Future;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    /// Call `fetch` every `interval` until `predicate` holds for its result.
    ///
    /// Retryable errors are logged and swallowed for that iteration; any other
    /// error ends the loop. With `max_wait` set the loop gives up once that
    /// much time has passed. Dropping the future cancels polling.
    pub async fn until<F, Fut, T, P>(
        interval: Duration,
        max_wait: Option<Duration>,
        mut fetch: F,
        predicate: P,
    ) -> StakingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StakingResult<T>>,
        P: Fn(&T) -> bool,
    {
        let started = Instant::now();
        loop {
            match fetch().await {
                Ok(value) if predicate(&value) => return Ok(value),
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    log::warn!("Poll iteration failed, will retry: {}", e);
                }
                Err(e) => return Err(e),
            }

            if let Some(max) = max_wait {
                if started.elapsed() >= max {
                    return Err(StakingError::operation(
                        "poll",
                        format!("condition not met after {:?}", max),
                    ));
                }
            }
            sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_address_formatting() {
        let addr = "tb1p9calmmwcsv8r6fgnxl6wtmhajrpgnvafjdl6wmtmxpyk63s5fj4slke3fs";
        let formatted = address::format_short(addr);
        assert!(formatted.contains("..."));
        assert!(formatted.starts_with("tb1p9cal"));
        assert!(formatted.ends_with("ke3fs"));
    }

    #[test]
    fn test_validate_and_parse_checks_network() {
        let mainnet = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        assert!(address::validate_and_parse(mainnet, Network::Bitcoin).is_ok());
        assert!(address::validate_and_parse(mainnet, Network::Signet).is_err());
        assert!(address::validate_and_parse("not-an-address", Network::Bitcoin).is_err());
    }

    #[test]
    fn test_txid_validation() {
        let txid = "1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        assert!(txid::validate(txid).is_ok());
        assert_eq!(txid::format_short(txid).len(), 8 + 3 + 8);
        assert!(txid::validate("1234").is_err());
        assert!(txid::validate(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_amount_conversion() {
        assert_eq!(amount::sats_to_btc(100_000_000), 1.0);
        assert_eq!(amount::format_dual(150_000), "150000 sats (0.00150000 BTC)");
        assert_eq!(time::blocks_remaining(120, 100, 50), 30);
        assert_eq!(time::blocks_remaining(200, 100, 50), 0);
    }

    #[tokio::test]
    async fn test_retry_skips_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result: StakingResult<()> = retry::with_backoff(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StakingError::GeoBlocked) }
        })
        .await;
        assert!(matches!(result, Err(StakingError::GeoBlocked)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_server_error() {
        let calls = AtomicU32::new(0);
        let result = retry::with_backoff(|| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(StakingError::Http {
                        endpoint: "/v2/network-info".to_string(),
                        status: 502,
                        message: "bad gateway".to_string(),
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_poll_swallows_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = poll::until(
            Duration::from_millis(1),
            None,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Err(StakingError::Http {
                            endpoint: "/v2/delegation".to_string(),
                            status: 503,
                            message: "busy".to_string(),
                        }),
                        1 => Ok("PENDING"),
                        _ => Ok("VERIFIED"),
                    }
                }
            },
            |state| *state == "VERIFIED",
        )
        .await;
        assert_eq!(result.unwrap(), "VERIFIED");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_breaks_on_terminal_error() {
        let result: StakingResult<u32> = poll::until(
            Duration::from_millis(1),
            None,
            || async { Err(StakingError::consistency("tampered")) },
            |_| true,
        )
        .await;
        assert!(matches!(result, Err(StakingError::Consistency { .. })));

        let result = poll::until(
            Duration::from_millis(1),
            Some(Duration::from_millis(5)),
            || async { Ok(0u32) },
            |v| *v > 0,
        )
        .await;
        assert!(result.is_err());
    }
}

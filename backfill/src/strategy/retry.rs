use backfill_core::{Error, Result, Retry, RetryStrategy};

/// A retry strategy that retries a fixed number of times with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffRetryStrategy {
    retries: i64,
    initial_delay_seconds: f64,
    backoff_multiplier: f64,
    max_delay_seconds: Option<f64>,
}

impl BackoffRetryStrategy {
    /// Creates a new strategy.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any of the parameters is negative or not a number.
    pub fn new(retries: i64, initial_delay_seconds: f64, backoff_multiplier: f64) -> Result<Self> {
        if retries < 0 {
            return Err(config_error("retries must not be negative"));
        }
        if initial_delay_seconds.is_nan() || initial_delay_seconds < 0.0 {
            return Err(config_error("initial_delay_seconds must not be negative"));
        }
        if backoff_multiplier.is_nan() || backoff_multiplier < 0.0 {
            return Err(config_error("backoff_multiplier must not be negative"));
        }

        Ok(Self {
            retries,
            initial_delay_seconds,
            backoff_multiplier,
            max_delay_seconds: None,
        })
    }

    /// Caps the delay between retries.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the cap is negative or not a number.
    pub fn with_max_delay(mut self, max_delay_seconds: f64) -> Result<Self> {
        if max_delay_seconds.is_nan() || max_delay_seconds < 0.0 {
            return Err(config_error("max_delay_seconds must not be negative"));
        }
        self.max_delay_seconds = Some(max_delay_seconds);
        Ok(self)
    }
}

impl RetryStrategy for BackoffRetryStrategy {
    fn get_retry(&self, failed_attempts: u32) -> Retry {
        let mut delay =
            self.initial_delay_seconds * self.backoff_multiplier.powf(f64::from(failed_attempts));
        if let Some(max) = self.max_delay_seconds {
            delay = delay.min(max);
        }

        Retry {
            // with 3 retries there will have been 4 observed failures before giving up
            should_retry: i64::from(failed_attempts) <= self.retries.saturating_add(1),
            retry_after_seconds: Some(delay),
        }
    }
}

#[inline]
fn config_error(message: &str) -> Error {
    Error::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff() -> anyhow::Result<()> {
        let strategy = BackoffRetryStrategy::new(3, 2.0, 2.0)?;
        let cases = [
            (0, true, 2.0),
            (1, true, 4.0),
            (2, true, 8.0),
            (3, true, 16.0),
            (4, true, 32.0),
            (5, false, 64.0),
            (6, false, 128.0),
        ];
        for (failed_attempts, should_retry, delay) in cases {
            let retry = strategy.get_retry(failed_attempts);
            assert_eq!(retry.should_retry, should_retry, "attempts={failed_attempts}");
            assert_eq!(retry.retry_after_seconds, Some(delay), "attempts={failed_attempts}");
        }
        Ok(())
    }

    #[test]
    fn test_zero_retries() -> anyhow::Result<()> {
        let strategy = BackoffRetryStrategy::new(0, 1.0, 3.0)?;
        assert!(strategy.get_retry(0).should_retry);
        assert!(strategy.get_retry(1).should_retry);
        assert!(!strategy.get_retry(2).should_retry);
        assert_eq!(strategy.get_retry(2).retry_after_seconds, Some(9.0));
        Ok(())
    }

    #[test]
    fn test_unbounded_retries() -> anyhow::Result<()> {
        let strategy = BackoffRetryStrategy::new(i64::MAX, 2.0, 2.0)?;
        assert!(strategy.get_retry(0).should_retry);
        assert!(strategy.get_retry(u32::MAX).should_retry);
        Ok(())
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            BackoffRetryStrategy::new(3, -1.0, 2.0),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            BackoffRetryStrategy::new(3, 2.0, -1.0),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            BackoffRetryStrategy::new(-1, 2.0, 2.0),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            BackoffRetryStrategy::new(3, f64::NAN, 2.0),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_max_delay() -> anyhow::Result<()> {
        let strategy = BackoffRetryStrategy::new(10, 2.0, 2.0)?.with_max_delay(10.0)?;
        let retry = strategy.get_retry(5);
        assert!(retry.should_retry);
        assert_eq!(retry.retry_after_seconds, Some(10.0));
        assert_eq!(strategy.get_retry(1).retry_after_seconds, Some(4.0));

        assert!(BackoffRetryStrategy::new(10, 2.0, 2.0)?
            .with_max_delay(-1.0)
            .is_err());
        Ok(())
    }

    #[test]
    fn test_pure() -> anyhow::Result<()> {
        let strategy = BackoffRetryStrategy::new(3, 2.0, 2.0)?;
        assert_eq!(strategy.get_retry(2), strategy.get_retry(2));
        Ok(())
    }
}

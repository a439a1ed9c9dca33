use super::{
    types::{BackoffConfig, Config, RetryConfig},
    ConfigError,
};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Each stage has at least one worker and a usable retry policy
/// - Quality thresholds are within their physical ranges
/// - The queue visibility timeout outlasts both stage timeouts
/// - The reaper does not requeue retries before their backoff elapses
/// - A catalog is configured when the scheduled poller is enabled
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.download.workers == 0 {
        return Err(invalid("download.workers must be at least 1"));
    }
    if config.processing.workers == 0 {
        return Err(invalid("processing.workers must be at least 1"));
    }

    validate_retry("download.retry", &config.download.retry)?;
    validate_retry("processing.retry", &config.processing.retry)?;

    let quality = &config.quality;
    if !(0.0..=100.0).contains(&quality.max_missing_data_pct) {
        return Err(invalid("quality.max_missing_data_pct must be between 0 and 100"));
    }
    if !(0.0..=180.0).contains(&quality.max_solar_zenith_deg) {
        return Err(invalid("quality.max_solar_zenith_deg must be between 0 and 180"));
    }
    if let Some(limit) = quality.max_saturation_pct {
        if !(0.0..=100.0).contains(&limit) {
            return Err(invalid("quality.max_saturation_pct must be between 0 and 100"));
        }
    }

    let visibility = config.queue.visibility_timeout_secs;
    if visibility <= config.download.timeout_secs || visibility <= config.processing.timeout_secs
    {
        return Err(invalid(
            "queue.visibility_timeout_secs must exceed download.timeout_secs and processing.timeout_secs",
        ));
    }

    if config.download.stuck_timeout_secs <= config.download.timeout_secs {
        return Err(invalid(
            "download.stuck_timeout_secs must exceed download.timeout_secs",
        ));
    }
    if config.processing.stuck_timeout_secs <= config.processing.timeout_secs {
        return Err(invalid(
            "processing.stuck_timeout_secs must exceed processing.timeout_secs",
        ));
    }

    // The reaper requeues RETRY items with no delay, which would cut a
    // longer backoff short.
    let longest_backoff = config
        .download
        .retry
        .backoff
        .longest_delay_secs()
        .max(config.processing.retry.backoff.longest_delay_secs());
    if config.reaper.requeue_after_secs < longest_backoff {
        return Err(invalid(&format!(
            "reaper.requeue_after_secs must be at least the longest backoff delay ({}s)",
            longest_backoff
        )));
    }

    if config.processing.transform.program.trim().is_empty() {
        return Err(invalid("processing.transform.program cannot be empty"));
    }

    if config.poller.lookback_minutes == 0 {
        return Err(invalid("poller.lookback_minutes must be at least 1"));
    }
    if config.poller.enabled && config.catalog.is_none() {
        return Err(invalid("poller is enabled but no [catalog] section is configured"));
    }

    if config.recorder.buffer_size == 0 {
        return Err(invalid("recorder.buffer_size must be at least 1"));
    }

    Ok(())
}

fn validate_retry(section: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(invalid(&format!("{}.max_attempts must be at least 1", section)));
    }
    match &retry.backoff {
        BackoffConfig::Schedule { delays_secs } if delays_secs.is_empty() => Err(invalid(
            &format!("{}.backoff schedule needs at least one delay", section),
        )),
        BackoffConfig::Exponential { multiplier, .. } if *multiplier < 1.0 => Err(invalid(
            &format!("{}.backoff multiplier must be >= 1.0", section),
        )),
        _ => Ok(()),
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

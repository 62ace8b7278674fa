use crate::config::types::{
    Config, ExtractorConfig, InterrupterConfig, OutputConfig, RelaunchSettings, ReporterConfig,
    SourceConfig, SupervisorSettings, UNSET,
};
use crate::ConfigError;
use std::path::Path;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_supervisor_settings(&config.supervisor)?;
    validate_source(&config.source)?;
    validate_extractor(&config.extractor)?;
    validate_reporter(&config.reporter)?;
    validate_interrupter(&config.interrupter)?;
    validate_output_config(&config.output)?;
    validate_relaunch_settings(&config.relaunch)?;
    Ok(())
}

/// Validates the `[supervisor]` table
fn validate_supervisor_settings(settings: &SupervisorSettings) -> Result<(), ConfigError> {
    // Zero is meaningful for these: no tolerated timeouts, no grace pause
    check_not_below_unset("max-timed-out-consumers", settings.max_timed_out_consumers)?;
    check_not_below_unset(
        "pause-on-early-termination-millis",
        settings.pause_on_early_termination_millis,
    )?;

    check_positive_or_unset("num-consumers", settings.num_consumers)?;
    check_positive_or_unset("max-queue-size", settings.max_queue_size)?;
    check_positive_or_unset("timeout-threshold-millis", settings.timeout_threshold_millis)?;
    check_positive_or_unset(
        "timeout-check-pulse-millis",
        settings.timeout_check_pulse_millis,
    )?;
    check_positive_or_unset("max-alive-time-seconds", settings.max_alive_time_seconds)?;
    check_positive_or_unset(
        "status-report-interval-millis",
        settings.status_report_interval_millis,
    )?;
    check_positive_or_unset("max-resource-attempts", settings.max_resource_attempts)?;

    if settings.max_resource_attempts > u32::MAX as i64 {
        return Err(ConfigError::Validation(format!(
            "max-resource-attempts must be <= {}, got {}",
            u32::MAX,
            settings.max_resource_attempts
        )));
    }

    Ok(())
}

/// Validates the resource source
fn validate_source(source: &SourceConfig) -> Result<(), ConfigError> {
    match source {
        SourceConfig::Filesystem {
            root, extensions, ..
        } => {
            check_path("source.root", root)?;
            if let Some(bad) = extensions.iter().find(|ext| ext.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "source.extensions contains an empty entry: '{}'",
                    bad
                )));
            }
        }
        SourceConfig::List { path, .. } => check_path("source.path", path)?,
    }
    Ok(())
}

/// Validates the extractor selection
fn validate_extractor(extractor: &ExtractorConfig) -> Result<(), ConfigError> {
    if let ExtractorConfig::Command {
        program,
        no_restart_exit_codes,
        ..
    } = extractor
    {
        if program.trim().is_empty() {
            return Err(ConfigError::Validation(
                "extractor.program cannot be empty".to_string(),
            ));
        }

        if no_restart_exit_codes.contains(&0) {
            return Err(ConfigError::Validation(
                "extractor.no-restart-exit-codes cannot contain 0 (the success code)".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_reporter(reporter: &ReporterConfig) -> Result<(), ConfigError> {
    if let ReporterConfig::JsonFile { path } = reporter {
        check_path("reporter.path", path)?;
    }
    Ok(())
}

fn validate_interrupter(interrupter: &InterrupterConfig) -> Result<(), ConfigError> {
    if let InterrupterConfig::StopFile { path } = interrupter {
        check_path("interrupter.path", path)?;
    }
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates the `[relaunch]` table
fn validate_relaunch_settings(settings: &RelaunchSettings) -> Result<(), ConfigError> {
    check_not_below_unset("max-restarts", settings.max_restarts)?;
    check_not_below_unset("restart-delay-millis", settings.restart_delay_millis)?;
    check_not_below_unset("kill-grace-seconds", settings.kill_grace_seconds)?;
    check_positive_or_unset("max-total-seconds", settings.max_total_seconds)?;

    if settings.max_restarts > u32::MAX as i64 {
        return Err(ConfigError::Validation(format!(
            "max-restarts must be <= {}, got {}",
            u32::MAX,
            settings.max_restarts
        )));
    }

    Ok(())
}

/// Accepts `-1` (unset) or any non-negative value
fn check_not_below_unset(key: &str, value: i64) -> Result<(), ConfigError> {
    if value < UNSET {
        return Err(ConfigError::Validation(format!(
            "{} must be -1 (default) or >= 0, got {}",
            key, value
        )));
    }
    Ok(())
}

/// Accepts `-1` (unset) or any strictly positive value
fn check_positive_or_unset(key: &str, value: i64) -> Result<(), ConfigError> {
    if value == 0 || value < UNSET {
        return Err(ConfigError::Validation(format!(
            "{} must be -1 (default) or >= 1, got {}",
            key, value
        )));
    }
    Ok(())
}

fn check_path(key: &str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", key)));
    }
    Ok(())
}

//! `taskpilot config`: configuration management commands.

use taskpilot_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ok  Config parsed successfully");

            let mut warnings = Vec::new();

            if config.task.context_window < 40_000 {
                warnings.push("task.context_window is small; history will be truncated often");
            }

            if config.task.auto_approve_all {
                warnings.push("task.auto_approve_all is set; every command runs without asking");
            }

            if config.task.auto_retry_requests && config.task.max_auto_retries == 0 {
                warnings.push("task.auto_retry_requests is set but task.max_auto_retries is 0");
            }

            if warnings.is_empty() {
                println!("   ok  All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warn  {w}");
                }
            }

            println!();
            println!("   Model:       {}", config.default_model);
            println!("   Window:      {} tokens", config.task.context_window);
            println!("   Truncate at: {} tokens", config.task.truncation_threshold());
            println!("   Mistakes:    {}", config.task.max_consecutive_mistakes);
            println!("   Storage:     {} ({})", config.storage.backend, config.storage.resolved_dir().display());
        }
        Err(e) => {
            println!("   error  Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

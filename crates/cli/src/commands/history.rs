//! `taskpilot history`: inspect stored tasks.

use taskpilot_config::AppConfig;
use taskpilot_core::display::{DisplayKind, DisplayMessage};
use taskpilot_core::message::TaskId;

use super::store;

pub async fn run(task_id: Option<String>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = store::open(&config.storage);

    let Some(task_id) = task_id else {
        let tasks = store.list().await?;
        if tasks.is_empty() {
            println!("No stored tasks.");
        }
        for id in tasks {
            println!("{id}");
        }
        return Ok(());
    };

    let id = TaskId::from(task_id.as_str());
    let snapshot = store
        .load(&id)
        .await?
        .ok_or_else(|| format!("No stored task with id '{id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Task {id}: {} API messages", snapshot.api_history.len());
    println!();
    for message in &snapshot.display_history {
        println!("{}", format_record(message));
    }
    Ok(())
}

pub fn format_record(message: &DisplayMessage) -> String {
    let time = chrono::DateTime::from_timestamp_millis(message.ts)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".into());
    let label = match message.kind {
        DisplayKind::Ask(ask) => format!("ask:{}", serde_json::to_value(ask).ok().and_then(|v| v.as_str().map(String::from)).unwrap_or_default()),
        DisplayKind::Say(say) => format!("say:{}", serde_json::to_value(say).ok().and_then(|v| v.as_str().map(String::from)).unwrap_or_default()),
    };
    let partial = if message.partial { " (partial)" } else { "" };
    format!("[{time}] {label:<28}{partial} {}", message.text)
}

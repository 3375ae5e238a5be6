use anyhow::{Result, anyhow};

use super::serve::open_store;
use crate::core::config::RelayConfig;
use crate::core::llm::{ConversationBackend, OpenAiBackend};
use crate::core::store::StopFlag;
use crate::core::terminal::{
    LOOKING_GLASS, print_error, print_info, print_status, print_success, print_warn,
};

/// Validates the environment end to end without serving traffic.
pub async fn run_check() -> Result<()> {
    println!("{}Checking chat-relay configuration...\n", LOOKING_GLASS);

    let config = match RelayConfig::from_env() {
        Ok(config) => {
            print_success("Configuration loaded.");
            config
        }
        Err(e) => {
            print_error(&e.to_string());
            return Err(anyhow!("configuration check failed"));
        }
    };
    print_status("API", &format!("{}:{}", config.api_host, config.api_port));
    print_status("Model", &config.backend.model);
    print_status(
        "Workers",
        &format!(
            "{} (queue {})",
            config.worker_concurrency, config.queue_capacity
        ),
    );

    let mut healthy = true;

    match open_store(&config.store).await {
        Ok(store) => {
            print_success(&format!("Result store {} answered PING.", store.describe()));
            match StopFlag::new(store).is_set().await {
                Ok(true) => print_warn("Stop flag is set: new jobs will be rejected."),
                Ok(false) => print_info("Stop flag is clear."),
                Err(e) => {
                    print_error(&format!("Could not read stop flag: {:#}", e));
                    healthy = false;
                }
            }
        }
        Err(e) => {
            print_error(&format!("{:#}", e));
            healthy = false;
        }
    }

    let backend = OpenAiBackend::new(config.backend.clone())?;
    match backend.list_models().await {
        Ok(models) => print_success(&format!(
            "Backend {} reachable ({} models).",
            config.backend.base_url,
            models.len()
        )),
        Err(e) => {
            print_error(&format!("Backend check failed: {:#}", e));
            healthy = false;
        }
    }

    match &config.slack {
        Some(slack) => {
            print_info(&format!("Slack webhook enabled (chat mode: {}).", slack.chat_mode.as_str()));
            if slack.signing_secret.is_none() {
                print_warn("SLACK_SIGNING_SECRET is not set; requests will not be verified.");
            }
        }
        None => print_info("Slack webhook disabled (no SLACK_BOT_TOKEN)."),
    }

    if healthy {
        print_success("All checks passed.");
        Ok(())
    } else {
        Err(anyhow!("one or more checks failed"))
    }
}

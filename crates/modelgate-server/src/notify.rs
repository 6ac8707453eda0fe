//! Calls an external endpoint for every notify rule whose models have all
//! gone quiet, so apps fronting those models can scale down too.

use std::time::Duration;

use async_trait::async_trait;
use modelgate_core::config::IdleNotifyRule;
use modelgate_core::ledger::Ledger;
use modelgate_core::{ModelgateError, Result};
use regex::Regex;
use reqwest::Client;

use crate::reaper::IdleHook;

const USER_AGENT: &str = concat!("modelgate-idle-notify/", env!("CARGO_PKG_VERSION"));

struct Rule {
    matcher: Regex,
    pattern: String,
    endpoint: String,
}

pub struct IdleNotifier {
    client: Client,
    rules: Vec<Rule>,
}

impl IdleNotifier {
    pub fn new(rules: &[IdleNotifyRule]) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ModelgateError::Config(format!("cannot build HTTP client: {e}")))?;
        let rules = rules
            .iter()
            .map(|r| {
                Ok(Rule {
                    matcher: r.matcher()?,
                    pattern: r.pattern.clone(),
                    endpoint: r.endpoint.clone(),
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self { client, rules })
    }

    /// Rules with no active model behind them. A pattern that has never
    /// matched a tracked model counts as quiet.
    fn quiet_rules(&self, ledger: &Ledger) -> Vec<&Rule> {
        let records = ledger.snapshot_all();
        self.rules
            .iter()
            .filter(|rule| {
                !records
                    .iter()
                    .any(|r| r.active && rule.matcher.is_match(&r.name))
            })
            .collect()
    }

    async fn call(&self, rule: &Rule) -> bool {
        match self.client.get(&rule.endpoint).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(pattern = %rule.pattern, endpoint = %rule.endpoint, "idle notification sent");
                true
            }
            Ok(response) => {
                tracing::warn!(
                    pattern = %rule.pattern,
                    endpoint = %rule.endpoint,
                    status = response.status().as_u16(),
                    "idle notification rejected"
                );
                false
            }
            Err(e) => {
                tracing::error!(endpoint = %rule.endpoint, error = %e, "idle notification failed");
                false
            }
        }
    }
}

#[async_trait]
impl IdleHook for IdleNotifier {
    fn name(&self) -> &str {
        "notify"
    }

    async fn after_tick(&self, ledger: &Ledger) -> Vec<String> {
        let quiet = self.quiet_rules(ledger);
        let sent = futures::future::join_all(quiet.iter().map(|rule| self.call(rule))).await;
        quiet
            .into_iter()
            .zip(sent)
            .filter(|(_, ok)| *ok)
            .map(|(rule, _)| rule.pattern.clone())
            .collect()
    }
}

use crate::output::{cell, print_json, print_table};
use clap::Subcommand;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ModelsSubcommand {
    /// List every model the supervisor knows, with endpoint and run state
    List,

    /// List running models
    Running,

    /// Show run state and activity for one model
    Status { name: String },

    /// Start a model without waiting for it to become ready
    Start { name: String },

    /// Stop a model
    Stop { name: String },

    /// Restart a model
    Restart { name: String },

    /// Record activity for a model now
    Report { name: String },

    /// Re-read the model directory on the gate
    Reload,
}

pub fn run(url: &str, subcommand: ModelsSubcommand, json: bool) -> anyhow::Result<()> {
    let api = Api::new(url);
    match subcommand {
        ModelsSubcommand::List => list(&api, json),
        ModelsSubcommand::Running => running(&api, json),
        ModelsSubcommand::Status { name } => status(&api, &name, json),
        ModelsSubcommand::Start { name } => control(&api, &name, "start", json),
        ModelsSubcommand::Stop { name } => control(&api, &name, "stop", json),
        ModelsSubcommand::Restart { name } => control(&api, &name, "restart", json),
        ModelsSubcommand::Report { name } => {
            let body = api.post(&format!("/api/models/{name}/report"))?;
            if json {
                print_json(&body)
            } else {
                println!("{name}: activity recorded at {}", cell(&body["last_activity"]));
                Ok(())
            }
        }
        ModelsSubcommand::Reload => {
            let body = api.post("/api/models/reload")?;
            if json {
                print_json(&body)
            } else {
                println!("Catalog reloaded: {} models", cell(&body["models"]));
                Ok(())
            }
        }
    }
}

/// `modelgate activity`: the ledger as the gate sees it.
pub fn activity(url: &str, json: bool) -> anyhow::Result<()> {
    let body = Api::new(url).get("/api/models/activity")?;
    if json {
        return print_json(&body);
    }
    let records = body["models"].as_array().cloned().unwrap_or_default();
    if records.is_empty() {
        println!("No activity recorded.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                cell(&r["name"]),
                cell(&r["last_activity"]),
                cell(&r["active"]),
                cell(&r["idle"]),
            ]
        })
        .collect();
    print_table(&["MODEL", "LAST ACTIVITY", "ACTIVE", "IDLE"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

struct Api {
    base: String,
    agent: ureq::Agent,
}

impl Api {
    fn new(url: &str) -> Self {
        Self {
            base: url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build(),
        }
    }

    fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.agent.get(&format!("{}{path}", self.base)))
    }

    fn post(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.agent.post(&format!("{}{path}", self.base)))
    }

    fn send(&self, request: ureq::Request) -> anyhow::Result<Value> {
        let url = request.url().to_string();
        match request.call() {
            Ok(response) => Ok(response.into_json()?),
            Err(ureq::Error::Status(code, response)) => {
                let body: Value = response.into_json().unwrap_or(Value::Null);
                match body["error"].as_str() {
                    Some(message) => anyhow::bail!("{message} (HTTP {code})"),
                    None => anyhow::bail!("{url} returned HTTP {code}"),
                }
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("cannot reach {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

fn list(api: &Api, json: bool) -> anyhow::Result<()> {
    let body = api.get("/api/models")?;
    if json {
        return print_json(&body);
    }
    let models = body["models"].as_array().cloned().unwrap_or_default();
    if models.is_empty() {
        println!("No models.");
        return Ok(());
    }
    let rows = models
        .iter()
        .map(|m| {
            let state = if m["running"].as_bool().unwrap_or(false) {
                "running"
            } else {
                "stopped"
            };
            vec![cell(&m["name"]), state.to_string(), cell(&m["endpoint"])]
        })
        .collect();
    print_table(&["MODEL", "STATE", "ENDPOINT"], rows);
    Ok(())
}

fn running(api: &Api, json: bool) -> anyhow::Result<()> {
    let body = api.get("/api/models/running")?;
    if json {
        return print_json(&body);
    }
    let names = body["running"].as_array().cloned().unwrap_or_default();
    if names.is_empty() {
        println!("No models running.");
    }
    for name in &names {
        println!("{}", cell(name));
    }
    Ok(())
}

fn status(api: &Api, name: &str, json: bool) -> anyhow::Result<()> {
    let body = api.get(&format!("/api/models/{name}/status"))?;
    if json {
        return print_json(&body);
    }
    for key in ["running", "starting", "last_activity", "active", "idle"] {
        println!("{key:<14} {}", cell(&body[key]));
    }
    Ok(())
}

fn control(api: &Api, name: &str, action: &str, json: bool) -> anyhow::Result<()> {
    let body = api.post(&format!("/api/models/{name}/{action}"))?;
    if json {
        print_json(&body)
    } else {
        println!("{name}: {}", cell(&body["status"]));
        Ok(())
    }
}

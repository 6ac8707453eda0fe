use crate::output::{print_json, print_table};
use clap::{Subcommand, ValueEnum};
use modelgate_core::catalog::ModelCatalog;
use modelgate_core::routing::RouteTable;
use std::path::Path;

#[derive(Subcommand)]
pub enum RoutesSubcommand {
    /// Render the route table for every catalogued model with a port
    Render {
        #[arg(long, value_enum, default_value_t = RouteFormat::Table)]
        format: RouteFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RouteFormat {
    /// Model name and upstream endpoint
    Table,
    /// nginx `location` blocks
    Nginx,
    /// Activity-monitor rules JSON
    Rules,
}

pub fn run(config_path: Option<&Path>, subcommand: RoutesSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        RoutesSubcommand::Render { format } => render(config_path, format, json),
    }
}

fn render(config_path: Option<&Path>, format: RouteFormat, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let catalog = ModelCatalog::load(&config)?;
    let table = RouteTable::build(&catalog.names(), &catalog);
    let gate_url = &config.routing.gate_url;

    match format {
        RouteFormat::Nginx => print!("{}", table.render_nginx(gate_url, config.gate.retry_status)),
        RouteFormat::Rules => println!("{}", table.render_rules_json(gate_url)?),
        RouteFormat::Table if json => {
            let routes: std::collections::BTreeMap<_, _> = table.iter().collect();
            print_json(&serde_json::json!({ "routes": routes }))?;
        }
        RouteFormat::Table => {
            if table.is_empty() {
                println!("No routable models.");
                return Ok(());
            }
            let rows = table
                .iter()
                .map(|(name, endpoint)| vec![name.clone(), endpoint.clone()])
                .collect();
            print_table(&["MODEL", "ENDPOINT"], rows);
        }
    }
    Ok(())
}

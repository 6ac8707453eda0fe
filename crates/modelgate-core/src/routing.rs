//! Desired proxy routing, rendered into the formats the proxy side consumes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::ModelCatalog;

/// `model name → upstream endpoint`, ordered by name so two tables built from
/// the same inventory compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
}

/// Set by the proxy on requests it hands to the gate after failing to reach
/// the model. The gate then asks for a replay even when the model is up.
pub const FALLBACK_HEADER: &str = "X-Modelgate-Fallback";

const FORWARD_HEADERS: &str = "    proxy_set_header Host $host;\n\
    \x20   proxy_set_header X-Real-IP $remote_addr;\n\
    \x20   proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
    \x20   proxy_set_header X-Forwarded-Proto $scheme;\n";

/// One rule for the access-log activity monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRule {
    pub pattern: String,
    pub endpoint: String,
    pub endpoint_502: String,
}

impl RouteTable {
    /// Build the table for `names`, looking endpoints up in `catalog`.
    /// Models without a known port are left out.
    pub fn build(names: &[String], catalog: &ModelCatalog) -> Self {
        let routes = names
            .iter()
            .filter_map(|name| {
                let endpoint = catalog.get(name)?.endpoint()?;
                Some((name.clone(), endpoint))
            })
            .collect();
        Self { routes }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            routes: pairs.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.routes.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// nginx `location` blocks, one per model.
    ///
    /// A 502 from the model hands the original request, URI unchanged, to the
    /// gate at `gate_url`. When the gate answers `retry_status` the request is
    /// replayed once against the model through `@upstream_{name}`. Any other
    /// gate answer (404, 500, 504) goes back to the client as is.
    ///
    /// Named locations cannot carry a URI part on `proxy_pass`, so the
    /// replay strips the `/{name}` prefix with a rewrite instead.
    pub fn render_nginx(&self, gate_url: &str, retry_status: u16) -> String {
        let gate_url = gate_url.trim_end_matches('/');
        let mut out = String::new();
        for (name, endpoint) in &self.routes {
            let upstream = endpoint.trim_end_matches('/');
            out.push_str(&format!(
                "location /{name}/ {{\n\
                 \x20   proxy_pass {upstream}/;\n\
                 {FORWARD_HEADERS}\
                 \x20   proxy_intercept_errors on;\n\
                 \x20   error_page 502 = @coldstart_{name};\n\
                 }}\n\
                 location @coldstart_{name} {{\n\
                 \x20   proxy_pass {gate_url};\n\
                 \x20   proxy_set_header {FALLBACK_HEADER} 1;\n\
                 \x20   proxy_intercept_errors on;\n\
                 \x20   error_page {retry_status} = @upstream_{name};\n\
                 }}\n\
                 location @upstream_{name} {{\n\
                 \x20   rewrite ^/{name}/(.*)$ /$1 break;\n\
                 \x20   proxy_pass {upstream};\n\
                 {FORWARD_HEADERS}\
                 }}\n"
            ));
        }
        out
    }

    pub fn activity_rules(&self, gate_url: &str) -> Vec<ActivityRule> {
        let gate_url = gate_url.trim_end_matches('/');
        self.routes
            .keys()
            .map(|name| ActivityRule {
                pattern: format!("/{name}/"),
                endpoint: format!("{gate_url}/api/models/{name}/report"),
                endpoint_502: format!("{gate_url}/api/models/{name}/start"),
            })
            .collect()
    }

    pub fn render_rules_json(&self, gate_url: &str) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.activity_rules(gate_url))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelSpec;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(vec![
            ModelSpec {
                name: "qwen".into(),
                host: "localhost".into(),
                port: Some(8101),
                source: None,
            },
            ModelSpec {
                name: "llama".into(),
                host: "gpu".into(),
                port: Some(8102),
                source: None,
            },
            ModelSpec {
                name: "noport".into(),
                host: "localhost".into(),
                port: None,
                source: None,
            },
        ])
    }

    #[test]
    fn build_skips_models_without_port() {
        let names = vec!["qwen".into(), "llama".into(), "noport".into(), "ghost".into()];
        let table = RouteTable::build(&names, &catalog());
        assert_eq!(table.names(), vec!["llama", "qwen"]);
    }

    #[test]
    fn tables_from_same_inventory_compare_equal() {
        let a = RouteTable::build(&["qwen".into(), "llama".into()], &catalog());
        let b = RouteTable::build(&["llama".into(), "qwen".into()], &catalog());
        assert_eq!(a, b);
    }

    #[test]
    fn nginx_render_contains_location_and_coldstart() {
        let table = RouteTable::build(&["qwen".into()], &catalog());
        let conf = table.render_nginx("http://gate:5003/", 503);
        assert!(conf.contains("location /qwen/ {"));
        assert!(conf.contains("proxy_pass http://localhost:8101/;"));
        assert!(conf.contains("error_page 502 = @coldstart_qwen;"));
        assert!(conf.contains("location @coldstart_qwen {"));
        assert!(conf.contains("proxy_set_header X-Modelgate-Fallback 1;"));
    }

    /// Body of the `location @{label}` block.
    fn named_location<'a>(conf: &'a str, label: &str) -> &'a str {
        let start = conf.find(&format!("location @{label} {{")).unwrap();
        let end = start + conf[start..].find("}\n").unwrap();
        &conf[start..end]
    }

    #[test]
    fn named_locations_never_carry_a_uri_part() {
        let table = RouteTable::build(&["qwen".into(), "llama".into()], &catalog());
        let conf = table.render_nginx("http://gate:5003", 503);
        for label in ["coldstart_qwen", "upstream_qwen", "coldstart_llama", "upstream_llama"] {
            let block = named_location(&conf, label);
            let pass = block
                .lines()
                .find_map(|l| l.trim().strip_prefix("proxy_pass "))
                .unwrap()
                .trim_end_matches(';');
            let after_scheme = pass.split_once("://").unwrap().1;
            assert!(!after_scheme.contains('/'), "{label}: {pass}");
        }
        assert!(named_location(&conf, "coldstart_llama").contains("proxy_pass http://gate:5003;"));
        assert!(named_location(&conf, "upstream_llama").contains("proxy_pass http://gpu:8102;"));
    }

    #[test]
    fn only_retry_status_is_replayed_against_model() {
        let table = RouteTable::build(&["qwen".into()], &catalog());
        let conf = table.render_nginx("http://gate:5003", 502);
        let coldstart = named_location(&conf, "coldstart_qwen");
        assert!(coldstart.contains("error_page 502 = @upstream_qwen;"));
        assert!(!coldstart.contains("504"));

        let upstream = named_location(&conf, "upstream_qwen");
        assert!(upstream.contains("rewrite ^/qwen/(.*)$ /$1 break;"));
        assert!(upstream.contains("proxy_set_header Host $host;"));
        assert!(!upstream.contains("error_page"));
    }

    #[test]
    fn activity_rules_point_at_gate_api() {
        let table = RouteTable::build(&["qwen".into()], &catalog());
        let rules = table.activity_rules("http://gate:5003");
        assert_eq!(
            rules,
            vec![ActivityRule {
                pattern: "/qwen/".into(),
                endpoint: "http://gate:5003/api/models/qwen/report".into(),
                endpoint_502: "http://gate:5003/api/models/qwen/start".into(),
            }]
        );
        let json = table.render_rules_json("http://gate:5003").unwrap();
        assert!(json.contains("\"endpoint_502\""));
    }
}

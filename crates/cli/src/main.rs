use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use fleet_api::{FleetApi, FleetConfig, InProcApi, ReportOutcome};
use fleet_core::{AdapterStatus, AdapterStatusKey, ConditionInput, ConditionStatus, IncomingAdapterStatus, NewResource, Resource, ResourceRef};

#[derive(Parser, Debug)]
#[command(name = "fleetctl", version, about = "Fleet resource status CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// YAML config file
    #[arg(long = "config", env = "FLEET_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database (if needed) and print its location
    Init,
    /// Create a resource
    Create {
        /// Resource kind, e.g. "Cluster"
        kind: String,
        name: String,
        /// Label as key=value (repeatable)
        #[arg(short = 'l', long = "label")]
        labels: Vec<String>,
        /// Spec as inline JSON
        #[arg(long = "spec", default_value = "{}")]
        spec: String,
    },
    /// Show one resource
    Get { kind: String, id: String },
    /// Soft-delete a resource and its adapter statuses
    Delete { kind: String, id: String },
    /// Replace a resource's aggregate conditions
    Conditions {
        kind: String,
        id: String,
        /// Condition as Type=True|False[:Reason] (repeatable)
        #[arg(long = "set", required = true)]
        set: Vec<String>,
        #[arg(long = "generation", default_value_t = 1)]
        generation: i64,
    },
    /// Submit an adapter status report (JSON body from a file or "-" for stdin)
    Report {
        kind: String,
        id: String,
        #[arg(long = "file", default_value = "-")]
        file: String,
    },
    /// Show adapter statuses for a resource
    Status {
        kind: String,
        id: String,
        /// Only this adapter
        #[arg(long = "adapter")]
        adapter: Option<String>,
        #[arg(long = "page")]
        page: Option<u32>,
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },
    /// Search resources with a filter, e.g. "labels.env='prod' AND status.conditions.Ready='True'"
    Search {
        kind: String,
        /// Filter expression (empty matches all)
        #[arg(default_value = "")]
        filter: String,
        #[arg(long = "page")]
        page: Option<u32>,
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },
}

fn init_tracing() {
    let env = std::env::var("FLEET_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FLEET_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FLEET_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_label(raw: &str) -> Result<(String, String)> {
    let (k, v) = raw.split_once('=').ok_or_else(|| anyhow!("label {raw:?} must be key=value"))?;
    Ok((k.trim().to_string(), v.trim().to_string()))
}

fn parse_condition(raw: &str) -> Result<ConditionInput> {
    let (t, rest) = raw.split_once('=').ok_or_else(|| anyhow!("condition {raw:?} must be Type=Status[:Reason]"))?;
    let (status, reason) = match rest.split_once(':') {
        Some((s, r)) => (s, Some(r)),
        None => (rest, None),
    };
    let status = ConditionStatus::from_str(status.trim())?;
    let mut c = ConditionInput::new(t.trim(), status);
    if let Some(r) = reason {
        c = c.with_reason(r.trim());
    }
    Ok(c)
}

fn read_body(file: &str) -> Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading report from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading report from {file}"))
    }
}

fn print_resource(out: Output, r: &Resource) -> Result<()> {
    match out {
        Output::Json => println!("{}", serde_json::to_string_pretty(r)?),
        Output::Human => {
            let labels: Vec<String> = r.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let conds: Vec<String> = r.status_conditions.iter().map(|c| format!("{}={}", c.r#type, c.status)).collect();
            println!("{} • {} • {} • gen {} • [{}] • [{}]", r.kind, r.name, r.id, r.generation, labels.join(","), conds.join(","));
        }
    }
    Ok(())
}

fn print_status(out: Output, s: &AdapterStatus) -> Result<()> {
    match out {
        Output::Json => println!("{}", serde_json::to_string_pretty(s)?),
        Output::Human => {
            println!("{} • gen {} • last report {}", s.adapter, s.observed_generation, s.last_report_time.to_rfc3339());
            for c in &s.conditions {
                println!(
                    "  {:<16} {:<8} since {}{}",
                    c.r#type,
                    c.status.as_str(),
                    c.last_transition_time.to_rfc3339(),
                    c.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = FleetConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let api = InProcApi::open(&cfg)?;
    let out = cli.output;

    match cli.command {
        Commands::Init => {
            info!(path = %cfg.db_path.display(), "init invoked");
            println!("database ready at {}", cfg.db_path.display());
        }
        Commands::Create { kind, name, labels, spec } => {
            let labels = labels.iter().map(|l| parse_label(l)).collect::<Result<BTreeMap<_, _>>>()?;
            let spec: serde_json::Value = serde_json::from_str(&spec).context("--spec must be JSON")?;
            let r = api.create_resource(&kind, NewResource { name, labels, spec }).await?;
            print_resource(out, &r)?;
        }
        Commands::Get { kind, id } => {
            let r = api.get_resource(ResourceRef::new(kind, id)).await?;
            print_resource(out, &r)?;
        }
        Commands::Delete { kind, id } => {
            api.delete_resource(ResourceRef::new(kind.as_str(), id.as_str())).await?;
            println!("deleted {kind} {id}");
        }
        Commands::Conditions { kind, id, set, generation } => {
            let conditions = set.iter().map(|c| parse_condition(c)).collect::<Result<Vec<_>>>()?;
            let r = api.set_resource_conditions(ResourceRef::new(kind, id), generation, conditions).await?;
            print_resource(out, &r)?;
        }
        Commands::Report { kind, id, file } => {
            let body = read_body(&file)?;
            let report: IncomingAdapterStatus = serde_json::from_str(&body).context("report body must be JSON")?;
            match api.report_status(ResourceRef::new(kind, id), report).await? {
                ReportOutcome::Stored { status, created } => {
                    if out == Output::Human {
                        println!("{}", if created { "created" } else { "updated" });
                    }
                    print_status(out, &status)?;
                }
                ReportOutcome::Discarded { reason } => match out {
                    Output::Json => println!("{}", serde_json::to_string_pretty(&ReportOutcome::Discarded { reason })?),
                    Output::Human => println!("discarded: {reason}"),
                },
            }
        }
        Commands::Status { kind, id, adapter, page, page_size } => {
            let resource = ResourceRef::new(kind, id);
            match adapter {
                Some(a) => print_status(out, &api.get_status(AdapterStatusKey::new(&resource, a)).await?)?,
                None => {
                    let p = api.list_statuses(resource, page, page_size).await?;
                    match out {
                        Output::Json => println!("{}", serde_json::to_string_pretty(&p)?),
                        Output::Human => {
                            for s in &p.items {
                                print_status(out, s)?;
                            }
                            println!("page {} • {} of {}", p.page, p.items.len(), p.total);
                        }
                    }
                }
            }
        }
        Commands::Search { kind, filter, page, page_size } => {
            let p = api.search(&kind, &filter, page, page_size).await?;
            match out {
                Output::Json => println!("{}", serde_json::to_string_pretty(&p)?),
                Output::Human => {
                    for r in &p.items {
                        print_resource(out, r)?;
                    }
                    println!("page {} • {} of {}", p.page, p.items.len(), p.total);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_split_on_first_equals() {
        assert_eq!(parse_label("env=prod").unwrap(), ("env".to_string(), "prod".to_string()));
        assert_eq!(parse_label("expr=a=b").unwrap(), ("expr".to_string(), "a=b".to_string()));
        assert!(parse_label("novalue").is_err());
    }

    #[test]
    fn conditions_take_optional_reason() {
        let c = parse_condition("Ready=True").unwrap();
        assert_eq!(c.r#type, "Ready");
        assert_eq!(c.status, ConditionStatus::True);
        assert!(c.reason.is_none());

        let c = parse_condition("Available=False:Draining").unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason.as_deref(), Some("Draining"));

        assert!(parse_condition("Ready=Maybe").is_err());
        assert!(parse_condition("Ready").is_err());
    }

    #[test]
    fn cli_parses_search() {
        let cli = Cli::try_parse_from(["fleetctl", "-o", "json", "search", "Cluster", "labels.env='prod'", "--page-size", "5"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Search { kind, filter, page, page_size } => {
                assert_eq!(kind, "Cluster");
                assert_eq!(filter, "labels.env='prod'");
                assert_eq!(page, None);
                assert_eq!(page_size, Some(5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

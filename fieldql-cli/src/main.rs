//! FieldQL command line tool
//!
//! Parses field-selection queries and projects records loaded from a JSON
//! fixture. Results go to stdout, logs to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldql_core::{
    init_logging, FieldQlConfig, LogLevel, QueryParser, RecordKey, Registry, Serializer,
    ServiceError, SlowProjectionLogger, Target,
};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fieldql")]
#[command(about = "Field-selection queries over relational records")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, global = true, env = "FIELDQL_CONFIG", default_value = "fieldql.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a query and print its tree as JSON
    Parse {
        /// Query text, e.g. "{*,-email,parent_id{name}}"
        query: String,

        /// Print the canonical query text instead of the tree
        #[arg(long)]
        canonical: bool,
    },

    /// Project records of a model through a query
    Project {
        /// Fixture file (defaults to registry.fixture from the config)
        #[arg(short = 'D', long)]
        data: Option<PathBuf>,

        /// Model name
        #[arg(short, long)]
        model: String,

        /// Record id; one id projects a single record, none projects every record
        #[arg(short, long = "id")]
        ids: Vec<i64>,

        /// Query text (defaults to query.default_query from the config)
        #[arg(short, long)]
        query: Option<String>,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Load a fixture and check its referential integrity
    Check {
        /// Fixture file (defaults to registry.fixture from the config)
        #[arg(short = 'D', long)]
        data: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = FieldQlConfig::load(&args.config)?;
    if args.debug {
        config.logging.level = LogLevel::Debug;
    }
    init_logging(&config.logging)?;

    match args.command {
        Command::Parse { query, canonical } => parse(&query, canonical, config.query.max_depth),
        Command::Project {
            data,
            model,
            ids,
            query,
            pretty,
        } => {
            let registry = load_registry(data.as_deref(), &config)?;
            let slow_log = Arc::new(SlowProjectionLogger::from_settings(&config.logging));
            let serializer = Serializer::new(&registry)
                .with_default_query(config.query.default_query.as_str())
                .with_max_depth(config.query.max_depth)
                .with_slow_log(slow_log);

            match project(&registry, &serializer, &model, &ids, query.as_deref()) {
                Ok(output) => print_json(&output, pretty),
                Err(e) => {
                    error!("Projection failed: {}", e);
                    print_json(&e.to_envelope(), pretty)?;
                    std::process::exit(1);
                }
            }
        }
        Command::Check { data } => {
            let registry = load_registry(data.as_deref(), &config)?;
            for model in registry.model_names() {
                let model = registry.model(model)?;
                println!(
                    "{}: {} fields, {} records",
                    model.schema().name(),
                    model.schema().field_names().count(),
                    model.record_count()
                );
            }
            info!("Fixture is valid");
            Ok(())
        }
    }
}

fn parse(query: &str, canonical: bool, max_depth: usize) -> Result<()> {
    match QueryParser::parse_with_max_depth(query, max_depth) {
        Ok(node) if canonical => {
            println!("{}", node);
            Ok(())
        }
        Ok(node) => print_json(&serde_json::to_value(&node)?, true),
        Err(e) => {
            eprintln!("{}", e.render(query));
            std::process::exit(1);
        }
    }
}

fn project(
    registry: &Registry,
    serializer: &Serializer<'_, Registry>,
    model: &str,
    ids: &[i64],
    query: Option<&str>,
) -> Result<JsonValue, ServiceError> {
    match ids {
        [id] => {
            let key = registry.key(model, *id)?;
            serializer.serialize(Target::One(&key), query)
        }
        [] => {
            let keys = registry.records(model)?;
            serializer.serialize(Target::Many(&keys), query)
        }
        ids => {
            let keys = ids
                .iter()
                .map(|id| registry.key(model, *id))
                .collect::<Result<Vec<RecordKey>, _>>()?;
            serializer.serialize(Target::Many(&keys), query)
        }
    }
}

fn load_registry(data: Option<&Path>, config: &FieldQlConfig) -> Result<Registry> {
    let path = data
        .or(config.registry.fixture.as_deref())
        .context("No fixture given: pass --data or set registry.fixture in the config")?;

    info!("Loading fixture {}", path.display());
    Registry::load(path).with_context(|| format!("Failed to load fixture: {}", path.display()))
}

fn print_json(value: &JsonValue, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    fn fixture() -> Registry {
        Registry::load(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/partners.json")).unwrap()
    }

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_project_modes() {
        let registry = fixture();
        let serializer = Serializer::new(&registry);

        let one = project(&registry, &serializer, "res.partner", &[1], Some("{name}")).unwrap();
        assert_eq!(one, json!({"name": "Alice"}));

        let all = project(&registry, &serializer, "res.partner", &[], Some("{id}")).unwrap();
        assert_eq!(all, json!([{"id": 1}, {"id": 2}, {"id": 3}]));

        let some = project(&registry, &serializer, "res.partner", &[3, 2], Some("{id}")).unwrap();
        assert_eq!(some, json!([{"id": 3}, {"id": 2}]));
    }

    #[test]
    fn test_project_fixture_kinds() {
        let registry = fixture();
        let serializer = Serializer::new(&registry);

        let user = project(
            &registry,
            &serializer,
            "res.users",
            &[7],
            Some("{login_date,task_ids{title,deadline,reminder}}"),
        )
        .unwrap();
        assert_eq!(
            user,
            json!({
                "task_ids": [
                    {"title": "T1", "deadline": "2024-02-29", "reminder": "09-30-00"},
                    {"title": "T2", "deadline": null, "reminder": null}
                ],
                "login_date": "2024-03-09-08-05"
            })
        );
    }

    #[test]
    fn test_project_errors() {
        let registry = fixture();
        let serializer = Serializer::new(&registry);

        let err = project(&registry, &serializer, "res.partner", &[42], None).unwrap_err();
        assert_eq!(err.status_code(), 404);

        let err = project(&registry, &serializer, "res.nothing", &[], None).unwrap_err();
        assert_eq!(err.exception_type(), "ModelException");
    }
}

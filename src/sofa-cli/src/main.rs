use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use sofa_core::config::Config;
use sofa_rs::{Connection, Database, DeleteOptions, Document, PutOptions, QueryParams};
use std::io::Read;

mod telemetry;

/// Command line client for CouchDB-style document databases
#[derive(Parser)]
#[command(name = "sofa", version, about)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Database name (overrides config)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show database metadata
    Info,

    /// Fetch a document by ID (prints null when missing)
    Get { id: String },

    /// Write a document from a JSON file ("-" for stdin); an `_id` is generated when absent
    Put {
        file: String,
        /// Acknowledge before the write is durable
        #[arg(long)]
        batch: bool,
        /// Report a revision conflict instead of failing
        #[arg(long)]
        conflict_ok: bool,
    },

    /// Delete a document revision
    Delete {
        id: String,
        rev: String,
        #[arg(long)]
        conflict_ok: bool,
    },

    /// Set fields on a document, retrying on revision conflicts
    Update {
        id: String,
        /// Field values as key=json (e.g. --set count=3 --set name='"x"')
        #[arg(long = "set", value_parser = parse_param)]
        fields: Vec<(String, Value)>,
    },

    /// Set fields on every non-design document
    UpdateAll {
        #[arg(long = "set", value_parser = parse_param)]
        fields: Vec<(String, Value)>,
    },

    /// Query a view
    View {
        design: String,
        view: String,
        /// Query parameters as key=json (e.g. --param limit=10)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Query the built-in all-documents view
    AllDocs {
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Query a view by a JSON array of keys (all-documents when design/view are omitted)
    ViewKeys {
        keys: String,
        #[arg(long, requires = "view")]
        design: Option<String>,
        #[arg(long, requires = "design")]
        view: Option<String>,
    },

    /// Submit a JSON array of documents in one request
    Bulk {
        file: String,
        #[arg(long)]
        all_or_nothing: bool,
    },

    /// Read the change feed
    Changes {
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        /// Wait for the next change instead of returning immediately
        #[arg(long)]
        longpoll: bool,
    },
}

/// Parse `key=value`, reading the value as JSON and falling back to a string
fn parse_param(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn to_params(pairs: Vec<(String, Value)>) -> QueryParams {
    let mut params = QueryParams::new();
    for (key, value) in pairs {
        params.insert(key, value);
    }
    params
}

fn read_json(path: &str) -> Result<Value> {
    let mut contents = String::new();
    if path == "-" {
        std::io::stdin()
            .read_to_string(&mut contents)
            .context("Failed to read stdin")?;
    } else {
        contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    }
    serde_json::from_str(&contents).with_context(|| format!("{} is not valid JSON", path))
}

fn apply_fields(mut doc: Document, fields: &[(String, Value)]) -> Document {
    for (key, value) in fields {
        doc.set(key.clone(), value.clone());
    }
    doc
}

async fn run(db: &Database, command: Command) -> Result<Value> {
    let output = match command {
        Command::Info => serde_json::to_value(db.info().await?)?,
        Command::Get { id } => serde_json::to_value(db.get_doc(&id).await?)?,
        Command::Put {
            file,
            batch,
            conflict_ok,
        } => {
            let mut value = read_json(&file)?;
            let Some(object) = value.as_object_mut() else {
                bail!("{} must contain a JSON object", file);
            };
            if !object.contains_key("_id") {
                object.insert("_id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
            }
            let doc: Document = serde_json::from_value(value)?;
            let options = PutOptions { batch, conflict_ok };
            serde_json::to_value(db.put_doc(&doc, options).await?)?
        }
        Command::Delete {
            id,
            rev,
            conflict_ok,
        } => serde_json::to_value(db.delete_doc(&id, &rev, DeleteOptions { conflict_ok }).await?)?,
        Command::Update { id, fields } => {
            let result = db
                .update_doc(&id, |doc| Ok(apply_fields(doc, &fields)))
                .await?;
            serde_json::to_value(result)?
        }
        Command::UpdateAll { fields } => {
            let summary = db
                .update_all(|doc| {
                    if doc.is_design() {
                        return Ok(None);
                    }
                    let changed = fields.iter().any(|(key, value)| doc.get(key) != Some(value));
                    Ok(changed.then(|| apply_fields(doc.clone(), &fields)))
                })
                .await?;
            serde_json::to_value(summary)?
        }
        Command::View {
            design,
            view,
            params,
        } => serde_json::to_value(db.view(&design, &view, &to_params(params)).await?)?,
        Command::AllDocs { params } => serde_json::to_value(db.all_docs(&to_params(params)).await?)?,
        Command::ViewKeys { keys, design, view } => {
            let keys: Vec<Value> =
                serde_json::from_str(&keys).context("keys must be a JSON array")?;
            let result = match (design, view) {
                (Some(design), Some(view)) => db.view_keys(&design, &view, &keys).await?,
                _ => db.all_docs_keys(&keys).await?,
            };
            serde_json::to_value(result)?
        }
        Command::Bulk {
            file,
            all_or_nothing,
        } => {
            let Value::Array(docs) = read_json(&file)? else {
                bail!("{} must contain a JSON array of documents", file);
            };
            serde_json::to_value(db.post_bulk_docs(&docs, all_or_nothing).await?)?
        }
        Command::Changes { params, longpoll } => {
            let mut params = to_params(params);
            if longpoll {
                params.insert("longpoll", Value::Bool(true));
            }
            serde_json::to_value(db.changes(&params).await?)?
        }
    };

    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(&cli.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };

    let _guard = telemetry::init_telemetry(&config.log)?;
    if let Err(e) = loaded {
        tracing::warn!("Failed to load {}, using defaults: {}", cli.config, e);
    }

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(db) = cli.db {
        config.database = db;
    }

    tracing::debug!(
        "Target {}:{}/{}",
        config.host,
        config.port,
        config.database
    );

    let connection = Connection::from_config(&config)?;
    let db = Database::from_config(connection, &config);

    let output = run(&db, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

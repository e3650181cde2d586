use clap::{Parser, Subcommand, ValueEnum};
use schemadb::schema::parse_schema;
use schemadb::{Database, DbConfig, IdStrategy};
use std::path::{Path, PathBuf};
use std::process;

/// schemadb CLI: create, query and edit a schemadb database from the command line
#[derive(Parser)]
#[command(name = "schemadb", version, about)]
struct Cli {
    /// Directory holding database snapshots [default: data, or the
    /// config file's data_dir for `create`]
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Database name (snapshot is <data-dir>/<db>.json)
    #[arg(long, default_value = "main")]
    db: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, ValueEnum)]
enum IdKind {
    Ulid,
    Uuid,
    Nanoid,
}

impl From<IdKind> for IdStrategy {
    fn from(kind: IdKind) -> Self {
        match kind {
            IdKind::Ulid => IdStrategy::Ulid,
            IdKind::Uuid => IdStrategy::Uuid,
            IdKind::Nanoid => IdStrategy::Nanoid,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a new database from a schema file
    Create {
        /// Schema file (YAML or JSON)
        #[arg(long)]
        schema: PathBuf,
        /// Config file (YAML); --data-dir and the flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Save after every mutation
        #[arg(long)]
        autosave: bool,
        /// Identifier look-ahead size
        #[arg(long)]
        buffer_size: Option<usize>,
        /// Identifier format
        #[arg(long)]
        ids: Option<IdKind>,
    },

    /// List tables and their fields
    Tables,

    /// Insert a new row
    Insert {
        /// Table name
        table: String,
        /// Field values (e.g. --field name=Ada --field age=36)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Set one field of an existing row
    Set {
        /// Table name
        table: String,
        /// Row ID
        id: String,
        /// Field name
        field: String,
        /// New value (JSON, or a plain string)
        value: String,
    },

    /// Delete a row
    Delete {
        /// Table name
        table: String,
        /// Row ID
        id: String,
    },

    /// Get a single row by ID
    Get {
        /// Table name
        table: String,
        /// Row ID
        id: String,
    },

    /// Find rows matching every --where pair
    Find {
        /// Table name
        table: String,
        /// Exact-match filters (e.g. --where age=36)
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Write the snapshot now
    Save,
}

const DEFAULT_DATA_DIR: &str = "data";

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let Cli {
        data_dir,
        db: name,
        format,
        command,
    } = cli;

    let command = match command {
        Command::Create {
            schema,
            config,
            autosave,
            buffer_size,
            ids,
        } => {
            let config = create_config(data_dir.as_deref(), config.as_deref(), autosave, buffer_size, ids)?;
            let raw = parse_schema(&schema)?;
            let db = Database::create(&name, &raw, config)?;
            return print_output(
                &serde_json::json!({ "ok": true, "database": name, "tables": db.list_tables() }),
                &format,
            );
        }
        other => other,
    };

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    log::debug!("Opening database '{name}' from {}", data_dir.display());
    let mut db = Database::open(&name, data_dir)?;

    match command {
        Command::Create { .. } => {}

        Command::Tables => {
            let mut tables = serde_json::Map::new();
            for (name, schema) in db.schemas() {
                let fields: serde_json::Map<String, serde_json::Value> = schema
                    .fields
                    .iter()
                    .map(|(field, spec)| {
                        (
                            field.clone(),
                            serde_json::json!({ "type": spec.field_type.to_string(), "required": spec.required }),
                        )
                    })
                    .collect();
                tables.insert(
                    name.clone(),
                    serde_json::json!({ "rows": db.row_count(name)?, "fields": fields }),
                );
            }
            print_output(&serde_json::Value::Object(tables), &format)?;
        }

        Command::Insert { table, fields } => {
            let record = db.insert(&table, fields_to_map(&fields))?;
            db.flush()?;
            print_output(&record.to_json(), &format)?;
        }

        Command::Set {
            table,
            id,
            field,
            value,
        } => {
            let record = db.set_field(&table, &id, &field, parse_value(&value))?;
            db.flush()?;
            print_output(&record.to_json(), &format)?;
        }

        Command::Delete { table, id } => {
            let deleted = db.delete_by_id(&table, &id)?;
            if deleted {
                db.flush()?;
            }
            print_output(&serde_json::json!({ "ok": true, "deleted": deleted, "id": id }), &format)?;
        }

        Command::Get { table, id } => {
            let record = db.find_by_id(&table, &id)?.ok_or_else(|| {
                schemadb::SchemaDbError::NotFound {
                    table: table.clone(),
                    id: id.clone(),
                }
            })?;
            print_output(&record.to_json(), &format)?;
        }

        Command::Find { table, filters } => {
            let rows = db.find(&table, &fields_to_map(&filters))?;
            let items: Vec<serde_json::Value> = rows.iter().map(|r| r.to_json()).collect();
            print_output(&serde_json::Value::Array(items), &format)?;
        }

        Command::Save => {
            db.save()?.wait()?;
            print_output(&serde_json::json!({ "ok": true }), &format)?;
        }
    }

    Ok(())
}

fn create_config(
    data_dir: Option<&Path>,
    config_file: Option<&Path>,
    autosave: bool,
    buffer_size: Option<usize>,
    ids: Option<IdKind>,
) -> Result<DbConfig, Box<dyn std::error::Error>> {
    let mut config = match config_file {
        Some(path) => DbConfig::load(path)?,
        None => DbConfig::new(DEFAULT_DATA_DIR),
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir.to_path_buf();
    }
    if autosave {
        config.autosave = true;
    }
    if let Some(size) = buffer_size {
        config.buffer_size = size;
    }
    if let Some(kind) = ids {
        config.id_strategy = kind.into();
    }
    Ok(config)
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Try to parse as JSON (numbers, arrays, null), else treat as a string
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn fields_to_map(fields: &[(String, String)]) -> serde_json::Map<String, serde_json::Value> {
    fields
        .iter()
        .map(|(key, val)| (key.clone(), parse_value(val)))
        .collect()
}

//! jetdump - inspect and export JET/ACE database files
//!
//! Opens a database read-only and prints its header, catalog, table
//! schemas or rows. Rows are written as delimited text or as JSON Lines.
//! `dump` walks every table and keeps going when one fails to parse.

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jetdb_engine::file_manager::PageSource;
use jetdb_engine::{Database, Table, Value};

mod config;

use config::{Config, ExportConfig, ExportFormat};

/// jetdump - read-only inspector for Access .mdb/.accdb files
#[derive(Parser, Debug)]
#[command(name = "jetdump")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file
    path: PathBuf,

    /// TOML file with [reader] and [export] sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Row format for export and dump, overriding the config file
    #[arg(long, value_enum)]
    format: Option<ExportFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Header fields, page count and table list
    Info,
    /// List table names
    Tables {
        /// Include MSys* and other system tables
        #[arg(short, long)]
        system: bool,
    },
    /// Print a table definition as TOML
    Schema { table: String },
    /// Write the rows of one table
    Export {
        table: String,
        /// Only these columns, in this order (comma separated)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
    /// Write the rows of every table, skipping tables that cannot be read
    Dump,
}

#[derive(Serialize)]
struct SchemaReport<'a> {
    name: &'a str,
    definition_page: u32,
    row_count: u32,
    next_autonumber: u32,
    columns: Vec<ColumnReport<'a>>,
    indexes: Vec<IndexReport<'a>>,
}

#[derive(Serialize)]
struct ColumnReport<'a> {
    name: &'a str,
    column_type: String,
    length: u16,
    nullable: bool,
    fixed: bool,
    auto_number: bool,
}

#[derive(Serialize)]
struct IndexReport<'a> {
    name: &'a str,
    index_type: String,
    columns: Vec<&'a str>,
}

impl<'a> SchemaReport<'a> {
    fn new(table: &'a Table) -> Self {
        let columns = table
            .columns
            .iter()
            .map(|c| ColumnReport {
                name: &c.name,
                column_type: format!("{:?}", c.column_type),
                length: c.length,
                nullable: c.is_nullable(),
                fixed: c.is_fixed(),
                auto_number: c.is_auto_number(),
            })
            .collect();

        let indexes = table
            .indexes
            .iter()
            .map(|index| {
                let columns = table
                    .real_indexes
                    .get(index.real_index as usize)
                    .map(|real| {
                        real.columns
                            .iter()
                            .filter_map(|ic| {
                                table
                                    .columns
                                    .iter()
                                    .find(|c| c.number == ic.column)
                                    .map(|c| c.name.as_str())
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                IndexReport {
                    name: &index.name,
                    index_type: format!("{:?}", index.index_type),
                    columns,
                }
            })
            .collect();

        SchemaReport {
            name: &table.name,
            definition_page: table.definition_page,
            row_count: table.row_count,
            next_autonumber: table.next_autonumber,
            columns,
            indexes,
        }
    }
}

/// Make a cell safe for one-line delimited output
fn escape_cell(text: &str, delimiter: &str) -> String {
    let mut out = text
        .replace('\\', "\\\\")
        .replace('\r', "\\r")
        .replace('\n', "\\n");
    if !delimiter.is_empty() && delimiter != "\\" {
        out = out.replace(delimiter, &format!("\\{}", delimiter));
    }
    out
}

/// First `limit` characters, marking the cut
fn preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((at, _)) => format!("{}...", &text[..at]),
        None => text.to_string(),
    }
}

/// JSON form of a value; types without a JSON counterpart use `text`
fn json_value(value: &Value, text: String) -> JsonValue {
    if value.is_null() {
        return JsonValue::Null;
    }
    match value {
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Byte(Some(n)) => JsonValue::from(*n),
        Value::Int16(Some(n)) => JsonValue::from(*n),
        Value::Int32(Some(n)) | Value::Complex(Some(n)) => JsonValue::from(*n),
        // NaN and infinities have no JSON number
        Value::Single(Some(x)) => Number::from_f64(f64::from(*x)).map_or(JsonValue::Null, JsonValue::Number),
        Value::Double(Some(x)) => Number::from_f64(*x).map_or(JsonValue::Null, JsonValue::Number),
        _ => JsonValue::String(text),
    }
}

struct Exporter<'a, S> {
    db: &'a Database<S>,
    config: &'a ExportConfig,
}

impl<S: PageSource> Exporter<'_, S> {
    fn cell(&self, value: &Value) -> String {
        if value.is_null() {
            return self.config.null_text.clone();
        }
        escape_cell(&self.text(value), &self.config.delimiter)
    }

    /// Display form, with memos expanded up to the preview length
    fn text(&self, value: &Value) -> String {
        match value {
            Value::Memo(Some(memo)) if self.config.memo_preview > 0 => {
                match self.db.read_memo(memo) {
                    Ok(text) => preview(&text, self.config.memo_preview),
                    Err(e) => {
                        debug!("memo not expanded: {}", e);
                        value.to_string()
                    }
                }
            }
            other => other.to_string(),
        }
    }

    /// Write the rows of `table`; JSON rows are wrapped with the table name when `tag` is set
    fn write_table(
        &self,
        out: &mut impl Write,
        table: &Arc<Table>,
        columns: &[&str],
        tag: bool,
    ) -> Result<u64> {
        let rows = if columns.is_empty() {
            self.db.rows(table)?
        } else {
            self.db.rows_with_columns(table, columns)?
        };

        let mut header_written = false;
        let mut count = 0;
        for row in rows {
            let row = row.with_context(|| format!("reading rows of '{}'", table.name))?;
            if self.config.format == ExportFormat::Json {
                let fields: Map<String, JsonValue> = row
                    .columns()
                    .iter()
                    .zip(row.values())
                    .map(|(c, v)| (c.name.clone(), json_value(v, self.text(v))))
                    .collect();
                let mut record = JsonValue::Object(fields);
                if tag {
                    let mut wrapped = Map::new();
                    wrapped.insert("table".to_string(), JsonValue::String(table.name.clone()));
                    wrapped.insert("row".to_string(), record);
                    record = JsonValue::Object(wrapped);
                }
                writeln!(out, "{}", record)?;
                count += 1;
                continue;
            }
            if !header_written {
                let names: Vec<String> = row
                    .columns()
                    .iter()
                    .map(|c| escape_cell(&c.name, &self.config.delimiter))
                    .collect();
                writeln!(out, "{}", names.join(&self.config.delimiter))?;
                header_written = true;
            }
            let cells: Vec<String> = row.values().iter().map(|v| self.cell(v)).collect();
            writeln!(out, "{}", cells.join(&self.config.delimiter))?;
            count += 1;
        }
        Ok(count)
    }
}

fn run(args: &Args, config: &Config, out: &mut impl Write) -> Result<()> {
    let db = Database::open_with(&args.path, config.reader.clone())
        .with_context(|| format!("opening {}", args.path.display()))?;
    debug!("opened {} ({:?})", args.path.display(), db.header().version);

    let mut export = config.export.clone();
    if let Some(format) = args.format {
        export.format = format;
    }
    let delimited = export.format == ExportFormat::Delimited;

    match &args.command {
        Command::Info => {
            let header = db.header();
            writeln!(out, "version:        {:?}", header.version)?;
            writeln!(out, "page size:      {}", header.page_size)?;
            writeln!(out, "pages:          {}", db.page_count()?)?;
            writeln!(out, "codepage:       {}", header.codepage)?;
            writeln!(out, "collation:      0x{:04X}", header.collation)?;
            writeln!(out, "encrypted:      {}", header.is_encrypted())?;
            if let Some(created) = header.creation_date {
                writeln!(out, "created:        {}", created)?;
            }
            writeln!(out, "tables:         {}", db.table_names().len())?;
            for name in db.table_names() {
                writeln!(out, "  {}", name)?;
            }
        }
        Command::Tables { system } => {
            for name in db.table_names() {
                writeln!(out, "{}", name)?;
            }
            if *system || config.export.include_system_tables {
                for name in db.system_table_names() {
                    writeln!(out, "{}", name)?;
                }
            }
        }
        Command::Schema { table } => {
            let table = db
                .table(table)
                .or_else(|_| db.system_table(table))
                .with_context(|| format!("loading table '{}'", table))?;
            let text = toml::to_string_pretty(&SchemaReport::new(&table))?;
            write!(out, "{}", text)?;
        }
        Command::Export { table, columns } => {
            let table = db
                .table(table)
                .or_else(|_| db.system_table(table))
                .with_context(|| format!("loading table '{}'", table))?;
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            let exporter = Exporter { db: &db, config: &export };
            let count = exporter.write_table(out, &table, &columns, false)?;
            info!("exported {} rows from '{}'", count, table.name);
        }
        Command::Dump => {
            let mut names: Vec<String> = db.table_names().into_iter().map(str::to_string).collect();
            if config.export.include_system_tables {
                names.extend(db.system_table_names().into_iter().map(str::to_string));
            }

            let exporter = Exporter { db: &db, config: &export };
            let mut skipped = 0;
            for name in &names {
                let table = match db.table(name).or_else(|_| db.system_table(name)) {
                    Ok(table) => table,
                    Err(e) => {
                        warn!("skipping table '{}': {}", name, e);
                        skipped += 1;
                        continue;
                    }
                };
                if delimited {
                    writeln!(out, "## {}", name)?;
                }
                match exporter.write_table(out, &table, &[], !delimited) {
                    Ok(count) => debug!("'{}': {} rows", name, count),
                    Err(e) => {
                        warn!("skipping rest of table '{}': {:#}", name, e);
                        skipped += 1;
                    }
                }
                if delimited {
                    writeln!(out)?;
                }
            }
            info!("dumped {} tables, {} skipped", names.len() - skipped, skipped);
        }
    }

    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false);
    if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )?;
    } else {
        tracing::subscriber::set_global_default(builder.with_max_level(log_level).finish())?;
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    run(&args, &config, &mut out)
}

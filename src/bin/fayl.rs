//! fayl: run named SQL queries from the command line
//!
//! # Usage
//!
//! ```bash
//! # List the queries under ./queries
//! fayl list
//!
//! # Show the SQL a call would run
//! fayl render users.list -p active=true --order-by -created_at --limit 20
//!
//! # Run a read
//! fayl --database-url sqlite://app.db query users.get_by_id -p id=7
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use fayl::config::{Config, LogFormat};
use fayl::pagination::{self, Tabling};
use fayl::prelude::*;
use fayl::registry::Registry;
use fayl::template;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fayl")]
#[command(version)]
#[command(about = "Run named SQL queries from files", long_about = None)]
#[command(after_help = "EXAMPLES:
    fayl list
    fayl render users.list -p active=true --order-by -id --limit 20
    fayl query users.get_by_id -p id=7 --format json
    fayl exec users.deactivate -p 'ids=[1,2,3]'")]
struct Cli {
    /// Configuration file (default: ./fayl.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, env = "FAYL_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Query root directory
    #[arg(short, long, global = true)]
    queries: Option<PathBuf>,

    /// Placeholder dialect (question, dollar, colon, atp)
    #[arg(long, global = true)]
    placeholder: Option<Placeholder>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered query codes
    List,
    /// Compile a query and print the SQL without running it
    Render(CallArgs),
    /// Run a read and print the rows
    Query {
        #[command(flatten)]
        call: CallArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Run a mutation and print the rows affected
    Exec(CallArgs),
}

#[derive(Args)]
struct CallArgs {
    /// Query code, e.g. users.get_by_id
    code: String,

    /// Parameter as key=value; the value is parsed as JSON, else taken as text
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,

    /// Ordering column; prefix with '-' for descending
    #[arg(short, long = "order-by", allow_hyphen_values = true)]
    order_by: Vec<String>,

    /// Cursor token ("" for the first page)
    #[arg(long, conflicts_with_all = ["offset", "page"])]
    cursor: Option<String>,

    /// Row offset
    #[arg(long, conflicts_with = "page")]
    offset: Option<i64>,

    /// 1-based page number
    #[arg(long)]
    page: Option<i64>,

    /// Page size
    #[arg(short, long)]
    limit: Option<i64>,
}

impl CallArgs {
    fn params(&self) -> Params {
        self.params.iter().cloned().collect()
    }

    fn pagination(&self) -> Option<Pagination> {
        let limit = self.limit.unwrap_or(0);
        if let Some(cursor) = &self.cursor {
            Some(Pagination::cursor(cursor.as_str(), limit))
        } else if let Some(offset) = self.offset {
            Some(Pagination::offset(offset, limit))
        } else if let Some(page) = self.page {
            Some(Pagination::page(page, limit))
        } else {
            self.limit.map(|limit| Pagination::offset(0, limit))
        }
    }

    fn tabling(&self) -> Tabling {
        Tabling {
            order_by: self.order_by.clone(),
            pagination: self.pagination(),
        }
    }

    fn runner<'a>(&self, fayl: &Fayl) -> Runner<'a> {
        let mut runner = self
            .params
            .iter()
            .cloned()
            .fold(fayl.run(self.code.as_str()), |runner, (key, value)| runner.with_param(key, value))
            .with_order_by(self.order_by.iter().cloned());
        if let Some(pagination) = self.pagination() {
            runner = runner.with_pagination(pagination);
        }
        runner
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let value = match serde_json::from_str::<serde_json::Value>(value) {
        Ok(json) => Value::from_json(json),
        Err(_) => Value::Text(value.to_string()),
    };
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), FaylError> {
    let config = load_config(&cli)?;
    init_tracing(&config, cli.verbose);

    match &cli.command {
        Commands::List => {
            let registry = Registry::load(&config.query_location)?;
            for code in registry.codes() {
                println!("{}", code.cyan());
            }
            if cli.verbose {
                println!();
                println!("{} queries in {}", registry.len(), config.query_location.display());
            }
        }
        Commands::Render(call) => render(&config, call)?,
        Commands::Query { call, format } => {
            let fayl = Fayl::connect(&config).await?;
            let mut rows = Vec::new();
            let result = call.runner(&fayl).scan_maps(&mut rows).query(&Context::new()).await?;
            format_output(&rows, *format);
            if let Some(pagination) = result.pagination {
                print_pagination(&pagination);
            }
        }
        Commands::Exec(call) => {
            let fayl = Fayl::connect(&config).await?;
            let result = call.runner(&fayl).exec(&Context::new()).await?;
            println!("{} {} rows affected", "✓".green(), result.rows_affected);
            if let Some(id) = result.last_insert_id {
                println!("{} {}", "Last insert id:".dimmed(), id);
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, FaylError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(queries) = &cli.queries {
        config.query_location = queries.clone();
    }
    if let Some(placeholder) = cli.placeholder {
        config.placeholder_style = Some(placeholder);
    }
    Ok(config)
}

fn init_tracing(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.log.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn render(config: &Config, call: &CallArgs) -> Result<(), FaylError> {
    let registry = Registry::load(&config.query_location)?;
    let placeholder = config.placeholder().unwrap_or_default();
    let text = registry.get(&call.code)?;

    let statement = template::compile(text, &call.params(), placeholder)
        .map_err(|e| e.with_code(&call.code))?;
    let plan = pagination::plan(statement, &call.tabling(), placeholder).map_err(|e| e.with_code(&call.code))?;

    println!("{}", "Generated SQL:".green().bold());
    println!("{}", plan.statement.sql.white());
    print_args(&plan.statement.args, placeholder);

    if let Some(count) = plan.count_statement() {
        println!();
        println!("{}", "Count SQL:".green().bold());
        println!("{}", count.sql.white());
    }
    Ok(())
}

fn print_args(args: &[Value], placeholder: Placeholder) {
    if args.is_empty() {
        return;
    }
    println!();
    println!("{}", "Bindings:".cyan());
    for (i, arg) in args.iter().enumerate() {
        println!("  {} = {}", placeholder.render(i + 1), arg.to_string().yellow());
    }
}

fn print_pagination(pagination: &PaginationResponse) {
    println!();
    match pagination {
        PaginationResponse::Cursor { next, prev } => {
            println!("{} {}", "Next:".dimmed(), next.as_deref().unwrap_or("-"));
            println!("{} {}", "Prev:".dimmed(), prev.as_deref().unwrap_or("-"));
        }
        PaginationResponse::Offset { total, offset, limit } => {
            println!(
                "{} {} (offset {}, limit {})",
                "Total:".dimmed(),
                total.to_string().cyan(),
                offset,
                limit
            );
        }
    }
}

fn format_output(results: &[Record], format: OutputFormat) {
    if results.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results).unwrap_or_default());
        }
        OutputFormat::Table => {
            let columns: Vec<&String> = results[0].keys().collect();

            let widths: Vec<usize> = columns
                .iter()
                .map(|c| {
                    results
                        .iter()
                        .map(|row| row.get(*c).map(val_to_string).unwrap_or_default().len())
                        .fold(c.len(), usize::max)
                })
                .collect();

            let header: Vec<String> = columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:width$}", c, width = w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in results {
                let cells: Vec<String> = columns
                    .iter()
                    .zip(&widths)
                    .map(|(c, w)| {
                        let val = row.get(*c).map(val_to_string).unwrap_or_default();
                        format!("{:width$}", val, width = w)
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", results.len().to_string().cyan());
        }
    }
}

fn val_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => val.to_string(),
    }
}

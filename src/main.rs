use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use lumbung::{
    Config, Connection, DatabaseError, StepResult, Value,
    planner::parse_statement,
};
use rustyline::{DefaultEditor, error::ReadlineError};
use tracing::Level;

const HISTORY_FILE: &str = ".lumbung_history";

/// Interactive shell for lumbung databases
#[derive(Parser, Debug)]
#[command(name = "lumbung", version, about = "Interactive shell for lumbung databases")]
struct Args {
    /// Database file, created when missing
    #[arg(default_value = "lumbung.db")]
    path: PathBuf,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log verbosity, written to stderr
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Reads lines until the input ends with `;` or is a dot command.
fn read_multiline_command(rl: &mut DefaultEditor) -> rustyline::Result<String> {
    let mut input = String::new();
    let mut prompt = "lumbung> ";

    loop {
        let line = rl.readline(prompt)?;
        let trimmed = line.trim_end();
        if input.is_empty() && trimmed.trim_start().starts_with('.') {
            return Ok(trimmed.trim_start().to_string());
        }
        input.push_str(trimmed);
        if input.trim().is_empty() || input.trim_end().ends_with(';') {
            return Ok(input);
        }
        input.push('\n');
        prompt = "     ...> ";
    }
}

fn print_help() {
    println!(
        r#"
Enter SQL statements terminated by ';'. Dot commands:
  .help            Show this message
  .tables          List tables
  .schema [TABLE]  Show CREATE statements
  .quit            Exit the shell

Use Up/Down arrows to navigate command history.
"#
    );
}

/// Handles a dot command. Returns false when the shell should exit.
fn process_dot_command(connection: &Connection, command: &str) -> bool {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        ".quit" | ".exit" => return false,
        ".help" => print_help(),
        ".tables" => {
            let names: Vec<&str> = connection
                .schemas()
                .list_tables()
                .into_iter()
                .map(|table| table.table_name.as_str())
                .collect();
            println!("{}", names.join("  "));
        }
        ".schema" => {
            let filter = parts.next();
            for table in connection.schemas().list_tables() {
                if filter.is_none_or(|name| table.table_name.eq_ignore_ascii_case(name)) {
                    println!("{};", table.sql);
                }
            }
        }
        other => println!("unknown command: {} (try .help)", other),
    }
    true
}

fn print_table(columns: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    println!("{}", line(columns));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in rows {
        println!("{}", line(row));
    }
    println!("({} row{})", rows.len(), if rows.len() == 1 { "" } else { "s" });
}

/// Runs one statement, printing the rows of a query.
fn run_query(connection: &mut Connection, sql: &str) -> Result<(), DatabaseError> {
    let mut statement = connection.prepare_scoped(sql)?;
    let columns = statement.column_names()?;
    let mut rows = Vec::new();
    while statement.step()? == StepResult::Row {
        let row = columns
            .iter()
            .map(|column| {
                statement.get_value(column).map(|value| match value {
                    Value::Null => "NULL".to_string(),
                    Value::Blob(_) => value.to_string(),
                    other => other.to_text(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }
    drop(statement);
    if !columns.is_empty() {
        print_table(&columns, &rows);
    } else if connection.changes() > 0 {
        println!("{} row(s) changed", connection.changes());
    }
    Ok(())
}

fn run_sql(connection: &mut Connection, sql: &str) -> Result<(), DatabaseError> {
    // A single statement is stepped so its rows can be shown; a script is
    // executed as a whole.
    if parse_statement(sql).is_ok() {
        run_query(connection, sql)
    } else {
        connection.execute(sql)
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut connection = Connection::open_with_config(&args.path, &config)?;
    println!(
        "lumbung {} on {} (.help for help)",
        env!("CARGO_PKG_VERSION"),
        args.path.display()
    );

    let mut rl = DefaultEditor::new()?;
    if rl.load_history(HISTORY_FILE).is_err() {
        tracing::debug!("no shell history yet");
    }

    loop {
        match read_multiline_command(&mut rl) {
            Ok(input) => {
                let command = input.trim();
                if command.is_empty() {
                    continue;
                }
                rl.add_history_entry(command)?;
                if command.starts_with('.') {
                    if !process_dot_command(&connection, command) {
                        break;
                    }
                } else if let Err(e) = run_sql(&mut connection, command) {
                    println!("Error: {}", e);
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    rl.save_history(HISTORY_FILE)?;
    connection.close()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(Level::from(args.log_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

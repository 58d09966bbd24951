//! Output formatting for the CLI

use crate::error::CliResult;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Print `value` as JSON or YAML. Returns `false` for [`OutputFormat::Table`],
/// which each command renders itself.
pub fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> CliResult<bool> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Table => return Ok(false),
    }
    Ok(true)
}

/// Print rows as a table, or a dimmed placeholder when there are none
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "  none".dimmed());
    } else {
        println!("{}", Table::new(rows));
    }
}

pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count().max(40)));
}

pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<16} {}", format!("{}:", label).dimmed(), value);
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_problem(message: &str) {
    println!("{} {}", "✗".red(), message);
}

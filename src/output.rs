//! Terminal output helpers shared by the command handlers.

use colored::Colorize;
use serde::Serialize;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

/// Print data as pretty-printed JSON
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize>(data: &T) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(data)?);
    Ok(())
}

pub fn print_step(message: &str) {
    println!("{} {}", "->".bold(), message);
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", "!".yellow().bold(), message.yellow());
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

pub fn print_header(title: &str) {
    println!("\n{}", title.bold());
    println!("{}", "-".repeat(title.chars().count().max(26)));
}

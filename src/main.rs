use anyhow::{Context, Result};
use clap::Parser;
use cronista::classify::ErrorClassifier;
use cronista::cli::{Cli, Command, OutputFormat};
use cronista::config::Config;
use cronista::logging::init_tracing;
use cronista::storage::{list_records, load_record, PersistedRecord};
use std::path::Path;

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            config.apply_env();
            Ok(config.sanitized())
        }
        None => Ok(Config::discover()),
    }
}

fn print_record(record: &PersistedRecord) {
    println!("Record:    {}", record.id);
    println!("Session:   {}", record.session_id);
    println!("Host:      {}", record.hostname);
    println!("Timestamp: {:.3}", record.timestamp);
    println!();
    print!("{}", record.data.render_table());

    if !record.data.detailed_results.is_empty() {
        println!();
        println!("Calls with arguments:");
        for (function, calls) in &record.data.detailed_results {
            for call in calls {
                let mut args = call.args.join(", ");
                for (k, v) in &call.kwargs {
                    if !args.is_empty() {
                        args.push_str(", ");
                    }
                    args.push_str(&format!("{k}={v}"));
                }
                println!("  {}({}) {:.6}s", function, args, call.wall_time);
            }
        }
    }
}

fn list(dir: &Path, format: OutputFormat) -> Result<()> {
    let files = list_records(dir).with_context(|| format!("failed to read {}", dir.display()))?;

    let mut rows = Vec::new();
    for file in &files {
        match load_record(&file.path) {
            Ok(record) => rows.push((file.path.clone(), record)),
            Err(e) => tracing::warn!("skipping {}: {}", file.path.display(), e),
        }
    }

    match format {
        OutputFormat::Json => {
            let listing: Vec<_> = rows
                .iter()
                .map(|(path, r)| {
                    serde_json::json!({
                        "path": path,
                        "id": r.id,
                        "session_id": r.session_id,
                        "timestamp": r.timestamp,
                        "hostname": r.hostname,
                        "total_calls": r.data.total_calls(),
                        "total_wall_time": r.data.total_wall_time(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No records in {}", dir.display());
                return Ok(());
            }
            println!("{:<48} {:>8} {:>12}  {}", "File", "Calls", "Wall Total", "Host");
            println!("{}", "─".repeat(86));
            for (path, record) in &rows {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                println!(
                    "{:<48} {:>8} {:>11.6}s  {}",
                    name,
                    record.data.total_calls(),
                    record.data.total_wall_time(),
                    record.hostname
                );
            }
        }
    }
    Ok(())
}

fn show(file: &Path, format: OutputFormat) -> Result<()> {
    let record =
        load_record(file).with_context(|| format!("failed to load record {}", file.display()))?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Text => print_record(&record),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    match args.command {
        Command::List { data_dir, format } => {
            let dir = match data_dir {
                Some(dir) => dir,
                None => load_config(args.config.as_deref())?.local.data_dir,
            };
            list(&dir, format)
        }
        Command::Show { file, format } => show(&file, format),
        Command::Explain {
            error_type,
            message,
        } => {
            let classification = ErrorClassifier::default().classify(&error_type, &message);
            println!("[{}] {}", classification.category, classification.explanation);
            Ok(())
        }
    }
}

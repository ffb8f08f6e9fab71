//! Compile DDF documents into a schema JSON file and an optional Rust enum.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::WrapErr as _;

#[derive(Debug, Clone)]
struct Input {
    name: String,
    path: PathBuf,
}

fn parse_input(s: &str) -> Result<Input, String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{s}'"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got '{s}'"));
    }
    Ok(Input {
        name: name.to_string(),
        path: PathBuf::from(path),
    })
}

#[derive(Parser)]
#[command(name = "ddf-compile")]
#[command(about = "Compile vendor DDF documents into a configuration schema", long_about = None)]
struct Cli {
    /// Schema JSON output path
    #[arg(long)]
    out: PathBuf,

    /// Also write a generated Rust `Setting` enum here
    #[arg(long)]
    rust: Option<PathBuf>,

    /// DDF documents, one section each
    #[arg(value_name = "NAME=PATH", required = true, value_parser = parse_input)]
    inputs: Vec<Input>,
}

fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut documents = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let xml = std::fs::read_to_string(&input.path)
            .wrap_err_with(|| format!("failed to read {}", input.path.display()))?;
        documents.push((input.name.as_str(), xml));
    }

    let mut schema = mdm_ddf::compile(documents.iter().map(|(name, xml)| (*name, xml.as_str())))
        .wrap_err("failed to compile DDF")?;
    schema.generated_at = Some(chrono::Utc::now().format("%Y-%m-%d").to_string());

    for section in &schema.sections {
        tracing::info!(section = %section.name, entries = section.entries.len(), "compiled section");
    }

    let json = schema.to_json().wrap_err("failed to serialize schema")?;
    std::fs::write(&cli.out, json)
        .wrap_err_with(|| format!("failed to write {}", cli.out.display()))?;

    if let Some(path) = &cli.rust {
        std::fs::write(path, mdm_ddf::codegen::render_enum(&schema))
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    }

    tracing::info!(out = %cli.out.display(), "schema written");
    Ok(())
}

//! Schema Form CLI
//!
//! Command-line interface for building, inspecting and validating form trees.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use schema_form::{
    extract_dependencies, load_document, load_document_auto, load_document_str, resolve_pointer,
    FormError, FormOptions, FormTree,
};

#[derive(Parser)]
#[command(name = "schema-form")]
#[command(about = "Build, inspect and validate reactive JSON Schema forms")]
#[command(version)]
struct Cli {
    /// Log engine activity (recomputation, branch switches) to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a form and print its node tree with values, flags and state
    Snapshot {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Initial form value
        #[arg(long)]
        data: Option<PathBuf>,

        /// Write a value after building, as PATH=JSON (repeatable, applied in order)
        #[arg(long = "set", value_name = "PATH=JSON")]
        sets: Vec<String>,

        /// Form options file (showError, validation, inheritFlags)
        #[arg(long)]
        options: Option<PathBuf>,

        /// Run validation before printing
        #[arg(long)]
        validate: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Validate data against the form built from a schema
    Validate {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Data file to validate
        data: PathBuf,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Print the path dependencies of a computed expression
    Deps {
        /// Expression, e.g. "../age >= 18"
        expression: String,
    },

    /// Resolve a path reference against a base pointer
    Resolve {
        /// Base pointer, e.g. /user/name
        base: String,

        /// Reference, e.g. ../age
        reference: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "schema_form=debug"
    } else {
        "schema_form=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Snapshot {
            schema,
            data,
            sets,
            options,
            validate,
            output,
            pretty,
        } => run_snapshot(SnapshotArgs {
            schema,
            data,
            sets,
            options,
            validate,
            output,
            pretty,
        }),
        Commands::Validate { schema, data, json } => run_validate(&schema, &data, json),
        Commands::Deps { expression } => run_deps(&expression),
        Commands::Resolve { base, reference } => {
            println!("{}", resolve_pointer(&base, &reference));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

struct SnapshotArgs {
    schema: String,
    data: Option<PathBuf>,
    sets: Vec<String>,
    options: Option<PathBuf>,
    validate: bool,
    output: Option<PathBuf>,
    pretty: bool,
}

fn run_snapshot(args: SnapshotArgs) -> Result<(), u8> {
    let SnapshotArgs {
        schema,
        data,
        sets,
        options,
        validate,
        output,
        pretty,
    } = args;

    let writes = sets
        .iter()
        .map(|raw| parse_set(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let schema = load_document_auto(&schema).map_err(|e| {
        eprintln!("Error: loading schema: {}", e);
        e.exit_code() as u8
    })?;

    let options = match options {
        Some(path) => {
            let raw = load_document(&path).map_err(|e| {
                eprintln!("Error: loading options: {}", e);
                e.exit_code() as u8
            })?;
            serde_json::from_value::<FormOptions>(raw).map_err(|e| {
                eprintln!("Error: invalid options: {}", e);
                2u8
            })?
        }
        None => FormOptions::default(),
    };

    let mut builder = FormTree::builder(schema).options(options);
    if let Some(path) = data {
        let value = load_document(&path).map_err(|e| {
            eprintln!("Error: loading data: {}", e);
            e.exit_code() as u8
        })?;
        builder = builder.value(value);
    }
    let mut form = builder.build().map_err(report_form_error)?;

    for (path, value) in writes {
        form.set_value_at(&path, value).map_err(report_form_error)?;
    }
    if validate {
        form.validate().map_err(report_form_error)?;
    }

    let snapshot = form.snapshot();
    let json_output = if pretty {
        serde_json::to_string_pretty(&snapshot)
    } else {
        serde_json::to_string(&snapshot)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }
    Ok(())
}

fn parse_set(raw: &str) -> Result<(String, Value), u8> {
    let Some((path, json)) = raw.split_once('=') else {
        eprintln!("Error: --set expects PATH=JSON, got {raw:?}");
        return Err(2);
    };
    let value = load_document_str(json).map_err(|e| {
        eprintln!("Error: --set {}: {}", path, e);
        e.exit_code() as u8
    })?;
    Ok((path.to_string(), value))
}

fn run_validate(schema_source: &str, data_path: &PathBuf, json_output: bool) -> Result<(), u8> {
    let schema = load_document_auto(schema_source).map_err(|e| {
        report_error(json_output, &format!("loading schema: {}", e));
        e.exit_code() as u8
    })?;
    let data = load_document(data_path).map_err(|e| {
        report_error(json_output, &format!("loading data: {}", e));
        e.exit_code() as u8
    })?;

    let mut form = FormTree::builder(schema)
        .value(data)
        .build()
        .map_err(|e| {
            report_error(json_output, &e.to_string());
            e.exit_code() as u8
        })?;
    let errors = form.validate().map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;

    if errors.is_empty() {
        if json_output {
            println!(r#"{{"valid":true}}"#);
        } else {
            println!("Valid");
        }
        return Ok(());
    }

    if json_output {
        let output = serde_json::json!({
            "valid": false,
            "errors": errors
        });
        println!("{}", output);
    } else {
        eprintln!("Validation failed:");
        for error in errors {
            eprintln!("  {}", error);
        }
    }
    Err(1)
}

fn run_deps(expression: &str) -> Result<(), u8> {
    let extracted = extract_dependencies(expression);
    let output = serde_json::json!({
        "paths": extracted.paths,
        "rewritten": extracted.rewritten
    });
    println!("{}", output);
    Ok(())
}

fn report_form_error(error: FormError) -> u8 {
    eprintln!("Error: {}", error);
    error.exit_code() as u8
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

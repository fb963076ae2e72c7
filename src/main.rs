//! docsign - interactive document signing
//!
//! Reads `config.toml` (or uses defaults), then offers a small menu to list the key material
//! in the configured key directory and to sign and verify a document.
//!
//! # Quick Start
//!
//! ```bash
//! mkdir keys
//! cp alice.p12 alice.cer keys/
//! cargo run --release
//! ```
//!
//! Set `RUST_LOG=docsign=debug` for per-stage diagnostics.

use anyhow::{Context, Result};
use docsign::configs::AppConfig;
use docsign::document::FileDocument;
use docsign::key_locator;
use docsign::workflow::Workflow;
use secrecy::SecretString;
use std::io::{self, Write};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config);

    println!("=== Document Signing ===\n");
    println!("Key directory: {}", config.keystore.directory.display());

    let workflow = Workflow::from_config(&config);

    loop {
        println!("\n=== Menu ===");
        println!("1. List key material");
        println!("2. Sign and verify a document");
        println!("3. Exit");
        let choice = prompt("\nSelect an option: ")?;

        match choice.trim() {
            "1" => list_key_material(&config)?,
            "2" => sign_document(&workflow)?,
            "3" => {
                println!("\nExiting...");
                break;
            }
            _ => println!("Invalid option. Please select 1-3."),
        }
    }

    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn list_key_material(config: &AppConfig) -> Result<()> {
    println!("\n=== Key Material ===");
    let directory = &config.keystore.directory;

    let sets = [
        ("Private keys", config.keystore.private_key_set()),
        ("Certificates", config.keystore.certificate_set()),
    ];
    for (label, extensions) in sets {
        match key_locator::locate(directory, &extensions) {
            Ok(paths) if paths.is_empty() => println!("{}: none found", label),
            Ok(paths) => {
                println!("{}:", label);
                for path in paths {
                    println!("  {}", path.display());
                }
            }
            Err(e) => println!("✗ {}: {}", label, e),
        }
    }

    let workflow = Workflow::from_config(config);
    match workflow.locate_material() {
        Ok(material) => println!(
            "\nWill sign with {} and verify with {}",
            material.key_path.display(),
            material.certificate_path.display()
        ),
        Err(e) => println!("\n✗ {}", e),
    }
    Ok(())
}

fn sign_document(workflow: &Workflow) -> Result<()> {
    println!("\n=== Sign Document ===");
    let path = prompt("Document path: ")?;
    if path.trim().is_empty() {
        println!("No document selected.");
        return Ok(());
    }
    let password = SecretString::from(
        rpassword::prompt_password("Private key password: ")
            .context("Failed to read password")?,
    );

    let document = FileDocument::new(path.trim());
    let report = workflow.run(&document, password, &CancellationToken::new());

    println!();
    for (stage, status) in report.stages() {
        let mark = if status.is_success() { "✓" } else { "·" };
        println!("{} {:<22} {}", mark, stage.to_string(), status);
    }

    if let Some(signature) = &report.signature {
        println!("\nSignature: {} bytes", signature.len());
    }
    if let Some(digest) = &report.digest {
        println!("Document SHA-256: {}", digest);
    }

    if report.verified() {
        println!("\n✓ {}", report.summary());
    } else {
        println!("\n✗ {}", report.summary());
    }
    Ok(())
}

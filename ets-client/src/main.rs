//! ETS (Evidence Timestamping Service) CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest as _, Sha256};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use ets_client::{EtsConfig, EvidenceService, SubmissionOptions, VerifyOptions};
use ets_types::{Digest, EvidenceRecord, SubmissionResult};

#[derive(Parser)]
#[command(name = "ets")]
#[command(about = "ETS evidence timestamping client", long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configuration
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Timestamp a file or a digest with both protocols
    Stamp {
        /// File to timestamp
        file: Option<PathBuf>,

        /// SHA-256 digest (hex) instead of a file
        #[arg(long, conflicts_with = "file")]
        hash: Option<String>,

        /// Skip the calendar proof
        #[arg(long)]
        no_ots: bool,

        /// Skip the authority token
        #[arg(long)]
        no_tsa: bool,

        /// Do not record the evidence; write the proofs to --output-dir
        #[arg(long)]
        no_save: bool,

        /// Where unsaved proofs are written
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Verify the proofs of a digest
    Verify {
        /// Digest (hex) or file path
        input: String,

        /// Calendar proof to check instead of the stored one
        #[arg(long)]
        ots: Option<PathBuf>,

        /// Authority token to check instead of the stored one
        #[arg(long)]
        tsr: Option<PathBuf>,
    },

    /// Show the record of a digest
    Show {
        /// Digest in hex format
        digest: String,
    },

    /// List all records
    List,

    /// Delete the record of a digest
    Delete {
        /// Digest in hex format
        digest: String,

        /// Keep the proof files on disk
        #[arg(long)]
        keep_files: bool,
    },

    /// Write the default configuration
    InitConfig {
        /// Output file
        path: PathBuf,
    },
}

fn hash_file(path: &Path) -> Result<Digest> {
    let mut file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(Digest::new(hasher.finalize().into()))
}

/// A hex digest if it parses as one, otherwise the hash of the named file
fn digest_from_input(input: &str) -> Result<Digest> {
    match Digest::from_hex(input) {
        Ok(digest) => Ok(digest),
        Err(_) => hash_file(Path::new(input)),
    }
}

fn print_record(record: &EvidenceRecord) {
    println!("Digest:     {}", record.hash);
    println!("OTS:        {}", record.ots_status);
    println!("TSA:        {}", record.tsa_status);
    if let Some(path) = &record.ots_path {
        println!("OTS file:   {}", path.display());
    }
    if let Some(path) = &record.tsa_path {
        println!("TSA file:   {}", path.display());
    }
    println!("Created:    {}", record.created_at);
    println!("Updated:    {}", record.updated_at);
}

fn print_submission(result: &SubmissionResult) {
    println!("Digest:     {}", result.hash);
    println!("OTS:        {}", result.ots_status);
    if let Some(error) = &result.ots_error {
        println!("  error:    {}", error);
    }
    println!("TSA:        {}", result.tsa_status);
    if let Some(error) = &result.tsa_error {
        println!("  error:    {}", error);
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<EtsConfig> {
    let mut config = EtsConfig::load(path)?;
    if let Some(dir) = data_dir {
        config.storage.data_dir = dir;
    }
    Ok(config)
}

fn init_config(path: &Path) -> Result<()> {
    EtsConfig::default().to_file(path)?;
    println!("Default configuration written to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::InitConfig { path } => init_config(&path),
        command => {
            let config = load_config(cli.config.as_deref(), cli.data_dir)?;
            run(command, EvidenceService::from_config(&config)?).await
        }
    }
}

async fn run(command: Commands, service: EvidenceService) -> Result<()> {
    match command {
        Commands::Stamp {
            file,
            hash,
            no_ots,
            no_tsa,
            no_save,
            output_dir,
        } => {
            let digest = match (file, hash) {
                (_, Some(hex)) => Digest::from_hex(&hex)?,
                (Some(file), None) => hash_file(&file)?,
                (None, None) => anyhow::bail!("either a file or --hash is required"),
            };

            let result = service
                .process_submission(SubmissionOptions {
                    hash: digest,
                    ots_enabled: !no_ots,
                    tsa_enabled: !no_tsa,
                    save_record: !no_save,
                })
                .await?;
            print_submission(&result);

            let unsaved = [("ots", &result.ots_bytes), ("tsr", &result.tsa_bytes)];
            for (extension, bytes) in unsaved {
                if let Some(bytes) = bytes {
                    let path = output_dir.join(format!("{}.{}", digest, extension));
                    std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {}", path.display());
                }
            }
        }

        Commands::Verify { input, ots, tsr } => {
            let digest = digest_from_input(&input)?;
            let read = |path: Option<PathBuf>| -> Result<Option<Vec<u8>>> {
                path.map(|p| std::fs::read(&p).with_context(|| format!("Failed to read {}", p.display())))
                    .transpose()
            };
            let report = service
                .verify_submission(VerifyOptions {
                    ots_override: read(ots)?,
                    tsr_override: read(tsr)?,
                    ..VerifyOptions::new(digest)
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Show { digest } => {
            let digest = Digest::from_hex(&digest)?;
            let record = service
                .get_record(&digest)?
                .ok_or_else(|| anyhow::anyhow!("No record found for digest: {}", digest))?;
            print_record(&record);
        }

        Commands::List => {
            let records = service.list_records()?;
            if records.is_empty() {
                println!("No stored evidence");
            } else {
                println!("Stored evidence ({})", records.len());
                println!();
                for record in records {
                    print_record(&record);
                    println!();
                }
            }
        }

        Commands::Delete { digest, keep_files } => {
            let digest = Digest::from_hex(&digest)?;
            if service.delete_evidence(&digest, keep_files)? {
                println!("Deleted {}", digest);
            } else {
                anyhow::bail!("No record found for digest: {}", digest);
            }
        }

        Commands::InitConfig { path } => init_config(&path)?,
    }

    Ok(())
}

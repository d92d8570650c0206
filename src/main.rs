use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use retreat_registration::db::{self, PgStore};
use retreat_registration::form::RegistrationForm;
use retreat_registration::logging::Verbosity;
use retreat_registration::models::{Category, DocId};
use retreat_registration::{
    eligibility, init_logging, report, MemoryStore, RecordStore, RegistrationAssembler, Settings,
};

#[derive(Parser)]
#[command(name = "retreat-registration")]
#[command(about = "Participant registration and ID numbering for the retreat", long_about = None)]
struct Cli {
    /// Settings file (defaults to retreat.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output; repeat for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Submit a filled-in registration form (JSON)
    Register {
        #[arg(long)]
        file: PathBuf,
        /// Validate and number against an empty in-memory store; nothing is saved
        #[arg(long)]
        dry_run: bool,
    },
    /// Register participants from a CSV file, one per row
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show the student id the next registration would receive
    NextId {
        #[arg(long, default_value = "junior")]
        category: Category,
    },
    /// Record that ID cards were generated
    MarkGenerated {
        #[arg(long = "doc-id", required = true, num_args = 1..)]
        doc_ids: Vec<DocId>,
    },
    /// Generate a markdown roster
    Roster {
        #[arg(long, default_value = "roster.md")]
        out: PathBuf,
    },
    /// Export the roster as CSV
    Export {
        #[arg(long)]
        csv: PathBuf,
    },
}

async fn connect(settings: &Settings) -> anyhow::Result<PgStore> {
    let database_url = settings
        .database_url()
        .context("database.url or DATABASE_URL must point at a Postgres instance")?;
    PgStore::connect(&database_url, settings.database.max_connections)
        .await
        .context("failed to connect to Postgres")
}

fn read_form(file: &Path) -> anyhow::Result<RegistrationForm> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a registration form", file.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(Verbosity::from_flags(cli.quiet, cli.verbose));

    let settings = Settings::load_from(cli.config).context("failed to load settings")?;

    if let Commands::Register {
        file,
        dry_run: true,
    } = &cli.command
    {
        let form = read_form(file)?;
        let assembler = RegistrationAssembler::new(MemoryStore::new(), settings);
        let handoff = assembler.submit_form(form).await?;
        info!("Dry run: ids are provisional and nothing was saved");
        println!("{}", serde_json::to_string_pretty(&handoff)?);
        return Ok(());
    }

    let store = connect(&settings).await?;
    let assembler = RegistrationAssembler::new(store, settings);

    match cli.command {
        Commands::InitDb => {
            assembler.store().init().await?;
            println!("Schema ready.");
        }
        Commands::Register { file, .. } => {
            let form = read_form(&file)?;
            let handoff = assembler.submit_form(form).await?;
            println!("{}", serde_json::to_string_pretty(&handoff)?);
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&assembler, &csv).await?;
            println!(
                "Registered {} participants from {} ({} rows skipped).",
                summary.registered,
                csv.display(),
                summary.skipped
            );
        }
        Commands::NextId { category } => {
            let next = assembler.next_id(category).await?;
            println!("{next}");
        }
        Commands::MarkGenerated { doc_ids } => {
            let records = assembler.store().list().await?;
            for doc_id in doc_ids {
                match records.iter().find(|record| record.doc_id == doc_id) {
                    Some(record) => {
                        if assembler
                            .mark_id_generated(doc_id, &record.family_id)
                            .await
                        {
                            println!("Marked {} ({}).", record.student_id, doc_id);
                        } else {
                            println!("Could not mark {} ({}).", record.student_id, doc_id);
                        }
                    }
                    None => println!("No participant with document id {doc_id}."),
                }
            }
        }
        Commands::Roster { out } => {
            let records = assembler.store().list().await?;
            let roster = report::build_roster(
                &assembler.settings().event.name,
                eligibility::today(),
                &records,
            );
            std::fs::write(&out, roster)?;
            info!(participants = records.len(), "Roster generated");
            println!("Roster written to {}.", out.display());
        }
        Commands::Export { csv } => {
            let records = assembler.store().list().await?;
            let file = std::fs::File::create(&csv)
                .with_context(|| format!("failed to create {}", csv.display()))?;
            report::export_csv(&records, file)?;
            println!("Exported {} participants to {}.", records.len(), csv.display());
        }
    }

    Ok(())
}

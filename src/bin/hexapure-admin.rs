use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use hexapure::config::Config;
use hexapure::filter::{AccountFilter, EnquiryFilter};
use hexapure::live::Dashboard;
use hexapure::models::EnquiryStatus;
use hexapure::{Error, Hexapure, Result};

#[derive(Parser, Debug)]
#[clap(name = "hexapure-admin", version)]
#[clap(about = "Manage Hexapure enquiries from the terminal", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// Sign in as this admin before touching the store (password from HEXAPURE_ADMIN_PASSWORD)
    #[clap(long)]
    email: Option<String>,

    /// How long to wait for the first snapshot, in seconds
    #[clap(long, default_value = "10")]
    wait: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List enquiries, newest first
    List {
        #[clap(long)]
        search: Option<String>,
        /// First day to include (YYYY-MM-DD)
        #[clap(long)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD)
        #[clap(long)]
        to: Option<NaiveDate>,
    },
    /// List accounts
    Accounts {
        #[clap(long)]
        search: Option<String>,
    },
    /// Show the dashboard counters
    Stats,
    /// Write the matching enquiries to a CSV file
    Export {
        #[clap(long)]
        search: Option<String>,
        #[clap(long)]
        from: Option<NaiveDate>,
        #[clap(long)]
        to: Option<NaiveDate>,
        /// Directory the file is written to
        #[clap(long, default_value = ".")]
        out: PathBuf,
    },
    /// Change the status of one enquiry
    SetStatus {
        id: String,
        /// new, contacted, pending or resolved
        status: EnquiryStatus,
    },
}

fn enquiry_filter(search: Option<String>, from: Option<NaiveDate>, to: Option<NaiveDate>) -> EnquiryFilter {
    EnquiryFilter::search(search.as_deref().unwrap_or("")).between(from, to)
}

async fn open_dashboard(hexapure: &Hexapure, email: Option<String>) -> Result<Dashboard> {
    match email {
        Some(email) => {
            let password = std::env::var("HEXAPURE_ADMIN_PASSWORD")
                .map_err(|_| Error::config("HEXAPURE_ADMIN_PASSWORD environment variable not found"))?;
            hexapure.session().sign_in(&email, &password).await?;
            hexapure.dashboard().await
        }
        None => Dashboard::open(hexapure.gateway().clone(), hexapure.cache().clone()).await,
    }
}

async fn run() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let hexapure = Hexapure::new(Config::from_env()?)?;
    let dashboard = open_dashboard(&hexapure, cli.email).await?;
    let wait = Duration::from_secs(cli.wait);

    match cli.command {
        Commands::List { search, from, to } => {
            dashboard.enquiries().wait_for_live(wait).await?;
            let rows = dashboard.enquiry_admin().filtered(&enquiry_filter(search, from, to));
            for e in &rows {
                println!("{}\t{}\t{}\t{}\t{}\t{}", e.id, e.date(), e.status, e.name, e.email, e.subject);
            }
            println!("{} enquiries", rows.len());
        }
        Commands::Accounts { search } => {
            dashboard.accounts().wait_for_live(wait).await?;
            let filter = AccountFilter::search(search.as_deref().unwrap_or(""));
            for a in dashboard.account_admin().filtered(&filter) {
                println!("{}\t{}\t{}\t{}\t{}", a.id, a.role, a.status, a.name, a.email);
            }
        }
        Commands::Stats => {
            dashboard.enquiries().wait_for_live(wait).await?;
            let stats = dashboard.stats();
            println!("Total:     {}", stats.total);
            println!("New:       {}", stats.new);
            println!("Contacted: {} ({}%)", stats.contacted, stats.contacted_percent());
            println!("Pending:   {}", stats.pending);
        }
        Commands::Export { search, from, to, out } => {
            dashboard.enquiries().wait_for_live(wait).await?;
            let export = dashboard
                .enquiry_admin()
                .export(&enquiry_filter(search, from, to), Utc::now().date_naive())?;
            let path = out.join(&export.filename);
            std::fs::write(&path, export.content)
                .map_err(|e| Error::config(format!("cannot write {}: {}", path.display(), e)))?;
            println!("Wrote {}", path.display());
        }
        Commands::SetStatus { id, status } => {
            dashboard.enquiries().wait_for_live(wait).await?;
            if dashboard.enquiry_admin().view().get(&id).is_none() {
                return Err(Error::not_found("contacts", &id));
            }
            dashboard.enquiry_admin().set_status(&id, status).await?;
            println!("Enquiry {} is now {}", id, status);
        }
    }

    dashboard.close();
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod ai;
mod analysis_cache;
mod cache_key;
mod db;
mod error;
mod extract;
mod fetch;
mod messaging;
mod models;
mod pipeline;
mod settings;
mod tracker;

use ai::{create_provider, TargetRole};
use analysis_cache::AnalysisCache;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use db::Database;
use extract::{extract_page_content, PageDocument};
use messaging::{send_with_retry, Dispatcher, InProcessChannel, Request};
use models::{Analysis, JobRecord, JobStatus, JobUpdate};
use settings::{Profile, ProviderKind, Settings};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracker::Tracker;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "matcha")]
#[command(about = "Match your CV against job postings and track applications")]
struct Cli {
    /// Database file (defaults to $MATCHA_DB, then the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the stored CV
    Cv {
        #[command(subcommand)]
        command: CvCommands,
    },

    /// Show or change remote analysis settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Extract job content from a URL or a saved HTML file
    Extract {
        /// URL or path to an HTML file
        source: String,

        /// Page URL to assume for a local file
        #[arg(long)]
        url: Option<String>,

        /// Print the full extracted text
        #[arg(long)]
        full: bool,
    },

    /// Analyze a job page against the stored CV
    Analyze {
        /// URL or path to an HTML file
        source: String,

        /// Page URL to assume for a local file
        #[arg(long)]
        url: Option<String>,

        /// Save the result to the tracker
        #[arg(short, long)]
        save: bool,
    },

    /// Manage tracked jobs
    Track {
        #[command(subcommand)]
        command: TrackCommands,
    },

    /// Inspect the analysis cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Read one JSON request from stdin and print the response envelope
    Message,

    /// Delete all stored data
    Reset {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum CvCommands {
    /// Store a CV from a text or markdown file
    Set {
        /// Path to CV file
        file: PathBuf,
    },

    /// Print the stored CV
    Show,

    /// Remove the stored CV
    Clear,

    /// Rewrite the CV with the tailored bullets from a tracked job
    Tailor {
        /// Tracked job ID
        id: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print current settings (secrets masked)
    Show,

    /// Change settings; omitted options keep their value
    Set {
        /// azure, openai or backend
        #[arg(long)]
        provider: Option<ProviderKind>,

        #[arg(long)]
        endpoint: Option<String>,

        #[arg(long)]
        api_key: Option<String>,

        #[arg(long)]
        access_token: Option<String>,

        #[arg(long)]
        deployment: Option<String>,

        #[arg(long)]
        api_version: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        backend_url: Option<String>,
    },

    /// Send a minimal request to check the credentials
    Test,

    /// Turn the on-page floating button on or off
    FloatingButton {
        /// on or off
        state: String,
    },
}

#[derive(Subcommand)]
enum TrackCommands {
    /// Quick-save a page to the Inbox without analysis
    Add {
        /// URL or path to an HTML file
        source: String,

        /// Page URL to assume for a local file
        #[arg(long)]
        url: Option<String>,
    },

    /// List tracked jobs
    List {
        /// Filter by status (inbox, applied, interview, offer, rejected, hidden)
        #[arg(short, long)]
        status: Option<JobStatus>,
    },

    /// Show one tracked job
    Show {
        id: String,
    },

    /// Move a job to another column
    Status {
        id: String,
        status: JobStatus,
    },

    /// Replace a job's notes
    Note {
        id: String,
        text: String,
    },

    /// Stop tracking a job
    Delete {
        id: String,
    },

    /// Search titles and companies
    Search {
        query: String,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached analyses, newest first
    List,

    /// Drop every cached analysis
    Clear,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("matcha=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn database_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| std::env::var_os("MATCHA_DB").map(PathBuf::from))
}

fn load_page(source: &str, url: Option<&str>) -> Result<PageDocument> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let fetcher = fetch::PageFetcher::new()?;
        Ok(fetcher.fetch(source)?)
    } else {
        fetch::load_file(Path::new(source), url)
            .with_context(|| format!("Failed to read page file: {}", source))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let db = Database::open(database_path(cli.db).as_deref())?;
    let profile = Profile::new(&db);
    let tracker = Tracker::new(&db);

    match cli.command {
        Commands::Cv { command } => match command {
            CvCommands::Set { file } => {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read CV file: {}", file.display()))?;
                if text.trim().is_empty() {
                    return Err(anyhow!("CV file {} is empty", file.display()));
                }
                profile.save_cv_text(&text)?;
                println!(
                    "Saved CV ({} characters). Cached analyses were cleared.",
                    text.chars().count()
                );
            }

            CvCommands::Show => match profile.cv_text()? {
                Some(cv) => println!("{}", cv),
                None => println!("No CV stored. Add one with: matcha cv set <file>"),
            },

            CvCommands::Clear => {
                profile.save_cv_text("")?;
                println!("CV removed.");
            }

            CvCommands::Tailor { id, output } => {
                let cv = profile
                    .cv_text()?
                    .ok_or_else(|| anyhow!("No CV stored. Add one with: matcha cv set <file>"))?;
                let job = tracker
                    .get_entry(&id)?
                    .ok_or_else(|| anyhow!("Job entry '{}' not found", id))?;
                let bullets = job
                    .tailored_bullets
                    .clone()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| anyhow!("Job '{}' has no tailored bullets. Analyze it first.", id))?;

                let provider = create_provider(&profile.settings()?.with_env_overrides())?;
                let target = TargetRole {
                    company: job.company.clone(),
                    role_title: job.display_title().to_string(),
                };
                let updated = provider.tailor_cv(&cv, &bullets, &target)?;

                if let Some(out_path) = output {
                    std::fs::write(&out_path, &updated)
                        .with_context(|| format!("Failed to write to {}", out_path.display()))?;
                    println!("Tailored CV saved to: {}", out_path.display());
                } else {
                    println!("{}", updated);
                }
            }
        },

        Commands::Settings { command } => match command {
            SettingsCommands::Show => {
                let settings = profile.settings()?.with_env_overrides();
                print_settings(&settings);
                println!(
                    "Floating button: {}",
                    if profile.floating_button_enabled()? { "on" } else { "off" }
                );
                println!("Database: {}", db.path().display());
            }

            SettingsCommands::Set {
                provider,
                endpoint,
                api_key,
                access_token,
                deployment,
                api_version,
                model,
                backend_url,
            } => {
                let mut settings = profile.settings()?;
                if let Some(provider) = provider {
                    settings.provider = provider;
                }
                for (field, value) in [
                    (&mut settings.azure_endpoint, endpoint),
                    (&mut settings.api_key, api_key),
                    (&mut settings.access_token, access_token),
                    (&mut settings.deployment, deployment),
                    (&mut settings.api_version, api_version),
                    (&mut settings.model, model),
                    (&mut settings.backend_url, backend_url),
                ] {
                    if let Some(value) = value {
                        *field = value.trim().to_string();
                    }
                }
                profile.save_settings(&settings)?;
                println!("Settings saved.");
            }

            SettingsCommands::Test => {
                let provider = create_provider(&profile.settings()?.with_env_overrides())?;
                provider.test_connection()?;
                println!("Connection OK ({}).", provider.model_name());
            }

            SettingsCommands::FloatingButton { state } => {
                let enabled = match state.to_lowercase().as_str() {
                    "on" | "true" | "yes" => true,
                    "off" | "false" | "no" => false,
                    _ => return Err(anyhow!("Expected 'on' or 'off', got '{}'", state)),
                };
                profile.set_floating_button_enabled(enabled)?;
                println!("Floating button {}.", if enabled { "enabled" } else { "disabled" });
            }
        },

        Commands::Extract { source, url, full } => {
            let document = load_page(&source, url.as_deref())?;
            let content = extract_page_content(&document);
            println!("Title:   {}", content.page_title);
            println!("URL:     {}", content.page_url);
            println!("Company: {}", or_dash(&content.company));
            match content.job_level {
                Some(level) => println!("Level:   {}", level),
                None => println!("Level:   -"),
            }
            println!("Text:    {} characters", content.main_text.chars().count());
            if full {
                println!("\n--- Main Text ---\n{}", content.main_text);
            } else {
                println!("\n{}", truncate(&content.main_text, 600));
            }
        }

        Commands::Analyze { source, url, save } => {
            let document = load_page(&source, url.as_deref())?;
            let page = extract_page_content(&document);
            let provider = create_provider(&profile.settings()?.with_env_overrides())?;

            let outcome = pipeline::analyze_page(&db, provider.as_ref(), &page)?;
            println!("{}", page.page_title);
            if outcome.cache_hit {
                println!("(cached result {})", outcome.cache_key);
            }
            print_analysis(&outcome.analysis);

            if save {
                let record = pipeline::save_analyzed(&db, &page, &outcome.analysis)?;
                println!("\nSaved to tracker as {}", record.id);
            }
        }

        Commands::Track { command } => match command {
            TrackCommands::Add { source, url } => {
                let document = load_page(&source, url.as_deref())?;
                let page = extract_page_content(&document);
                match pipeline::quick_save_page(&db, &page) {
                    Ok(record) => println!("Saved '{}' to Inbox ({})", record.display_title(), record.id),
                    Err(e) if e.is_duplicate() => println!("{}", pipeline::already_tracked_message()),
                    Err(e) => return Err(e.into()),
                }
            }

            TrackCommands::List { status } => {
                let entries = tracker.entries_by_status(status)?;
                print_entries(&entries);
            }

            TrackCommands::Show { id } => match tracker.get_entry(&id)? {
                Some(job) => print_entry(&job),
                None => println!("Job entry '{}' not found.", id),
            },

            TrackCommands::Status { id, status } => {
                let updated = tracker.update_job_entry(
                    &id,
                    JobUpdate {
                        status: Some(status),
                        ..JobUpdate::default()
                    },
                )?;
                println!("Moved '{}' to {}.", updated.display_title(), updated.status);
            }

            TrackCommands::Note { id, text } => {
                let updated = tracker.update_job_entry(
                    &id,
                    JobUpdate {
                        notes: Some(text),
                        ..JobUpdate::default()
                    },
                )?;
                println!("Notes updated for '{}'.", updated.display_title());
            }

            TrackCommands::Delete { id } => {
                tracker.delete_job_entry(&id)?;
                println!("Deleted {}.", id);
            }

            TrackCommands::Search { query } => {
                let entries = tracker.search(&query)?;
                print_entries(&entries);
            }
        },

        Commands::Cache { command } => {
            let cache = AnalysisCache::new(&db);
            match command {
                CacheCommands::List => {
                    let entries = cache.entries()?;
                    if entries.is_empty() {
                        println!("Analysis cache is empty.");
                    } else {
                        println!("{:<20} {:>5} {:<8} {:<20} {:<40}", "KEY", "SCORE", "LABEL", "CACHED", "URL");
                        println!("{}", "-".repeat(97));
                        for (key, cached) in entries {
                            let when = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(cached.timestamp)
                                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_default();
                            println!(
                                "{:<20} {:>5} {:<8} {:<20} {:<40}",
                                truncate(&key, 18),
                                cached.analysis.match_score,
                                cached.analysis.match_label,
                                when,
                                truncate(&cached.job_url, 40)
                            );
                        }
                    }
                }

                CacheCommands::Clear => {
                    cache.clear()?;
                    println!("Analysis cache cleared.");
                }
            }
        }

        Commands::Message => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read request from stdin")?;
            let request: Request =
                serde_json::from_str(&input).context("Request is not a valid message")?;

            let channel = InProcessChannel::new(Dispatcher::new(&db));
            let response = send_with_retry(&channel, &request)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Reset { yes } => {
            if !yes {
                println!("This deletes the CV, tracker, cache and settings. Re-run with --yes to confirm.");
            } else {
                profile.clear_all_data()?;
                println!("All data cleared.");
            }
        }
    }

    Ok(())
}

fn print_settings(settings: &Settings) {
    println!("Provider:     {:?}", settings.provider);
    println!("Endpoint:     {}", or_dash(&settings.azure_endpoint));
    println!("Deployment:   {}", or_dash(&settings.deployment));
    println!("API version:  {}", settings.api_version);
    println!("Model:        {}", or_dash(&settings.model));
    println!("Backend URL:  {}", or_dash(&settings.backend_url));
    println!("API key:      {}", mask(&settings.api_key));
    println!("Access token: {}", mask(&settings.access_token));
}

fn print_analysis(analysis: &Analysis) {
    let width = 80;
    println!(
        "\nMatch: {}% ({})",
        analysis.match_score,
        analysis.match_label.to_string().to_uppercase()
    );

    println!("\nStrength:\n{}", indent(&analysis.explanation.strength, width));
    println!("Risk:\n{}", indent(&analysis.explanation.risk, width));
    println!("Suggestion:\n{}", indent(&analysis.explanation.suggestion, width));

    println!("\nGaps:");
    for gap in &analysis.gap_analysis {
        println!("{}", bullet(gap, width));
    }

    println!("\nTailored bullets:");
    for line in &analysis.tailored_bullets {
        println!("{}", bullet(line, width));
    }
}

fn print_entries(entries: &[JobRecord]) {
    if entries.is_empty() {
        println!("No jobs found.");
        return;
    }
    println!("{:<22} {:<10} {:<32} {:<20} {:>5}", "ID", "STATUS", "TITLE", "COMPANY", "MATCH");
    println!("{}", "-".repeat(93));
    for job in entries {
        let score = job
            .match_score
            .map(|s| format!("{}%", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<22} {:<10} {:<32} {:<20} {:>5}",
            truncate(&job.id, 22),
            job.status,
            truncate(job.display_title(), 30),
            truncate(&job.company, 18),
            score
        );
    }
}

fn print_entry(job: &JobRecord) {
    println!("Job {}", job.id);
    println!("Title: {}", job.display_title());
    if !job.company.is_empty() {
        println!("Company: {}", job.company);
    }
    println!("Status: {}", job.status);
    println!("URL: {}", job.url);
    if let (Some(score), Some(label)) = (job.match_score, job.match_label) {
        println!("Match: {}% ({})", score, label);
    }
    println!("Saved: {}", job.created_at_utc.format("%Y-%m-%d %H:%M"));
    println!("Updated: {}", job.updated_at_utc.format("%Y-%m-%d %H:%M"));
    if let Some(explanation) = &job.explanation {
        println!("\nStrength: {}", explanation.strength);
        println!("Risk: {}", explanation.risk);
        println!("Suggestion: {}", explanation.suggestion);
    }
    if let Some(gaps) = &job.gap_analysis {
        println!("\nGaps:");
        for gap in gaps {
            println!("{}", bullet(gap, 80));
        }
    }
    if let Some(bullets) = &job.tailored_bullets {
        println!("\nTailored bullets:");
        for line in bullets {
            println!("{}", bullet(line, 80));
        }
    }
    if !job.notes.is_empty() {
        println!("\n--- Notes ---\n{}", job.notes);
    }
}

fn indent(text: &str, width: usize) -> String {
    let options = textwrap::Options::new(width)
        .initial_indent("  ")
        .subsequent_indent("  ");
    textwrap::fill(text, options)
}

fn bullet(text: &str, width: usize) -> String {
    let options = textwrap::Options::new(width)
        .initial_indent("  - ")
        .subsequent_indent("    ");
    textwrap::fill(text, options)
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        "-".to_string()
    } else if count <= 8 {
        "********".to_string()
    } else {
        let tail: String = secret.chars().skip(count - 4).collect();
        format!("****{}", tail)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

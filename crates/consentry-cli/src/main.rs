//! `consentry` CLI: replay page loads against a browser profile.
//!
//! Each invocation is one load of the site in a simulated browser: the
//! profile's cookie jar and local storage are opened, the consent mechanism
//! initializes, the requested interaction runs, and the resulting page state
//! is printed.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;
mod fetch;
mod profile;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use consentry_core::consent::{ConsentState, Persistence};
use consentry_core::i18n::{LANGUAGE_STORAGE_KEY, Language, save_language};
use consentry_core::prompt::PromptSurface;
use consentry_storage::StorageBackend;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;
use crate::profile::{LoadOptions, PageLoad, PageReport, Profile};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ── CLI structure ────────────────────────────────────────────────────

/// consentry: analytics consent, one page load at a time.
#[derive(Parser)]
#[command(
    name = "consentry",
    version,
    about = "consentry CLI: drive the analytics consent prompt against a browser profile",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         CONSENTRY_PROFILE_DIR     Browser profile directory (default: ./.consentry-profile)\n  \
         CONSENTRY_LOG_LEVEL       Log filter when RUST_LOG is unset (default: warn)\n  \
         CONSENTRY_MEASUREMENT_ID  Analytics measurement id\n  \
         CONSENTRY_POLICY_VERSION  Policy version for new decisions\n\n\
         {DIM}Examples:{RESET}\n  \
         consentry visit\n  \
         consentry accept --json\n  \
         consentry --lang ko-KR visit /blog\n  \
         consentry reset"
    ),
)]
struct Cli {
    /// Browser profile directory.
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Language the browser reports (e.g. `ko-KR`).
    #[arg(long, global = true)]
    lang: Option<String>,

    /// Block network fetches, as a content blocker would.
    #[arg(long, global = true, default_value = "false")]
    offline: bool,

    /// Refuse cookies for this load.
    #[arg(long, global = true, default_value = "false")]
    no_cookies: bool,

    /// Print page state as JSON.
    #[arg(long, global = true, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a page and let the consent mechanism initialize.
    Visit {
        /// Path to load.
        #[arg(default_value = "/")]
        path: String,
    },
    /// Load a page and click "Accept".
    Accept,
    /// Load a page and click "Decline".
    Decline,
    /// Load a page and revoke the stored decision.
    Reset,
    /// Load a page and follow the prompt's "Learn more" link.
    LearnMore,
    /// Show the stored decision without loading a page.
    Status,
    /// Print the `Cookie:` header the site would receive.
    CookieHeader,
    /// Apply a raw `document.cookie` assignment.
    SetCookie {
        /// Assignment such as `name=value; path=/`.
        assignment: String,
    },
    /// Store the site language preference.
    SetLanguage {
        /// One of `en`, `ko`, `es`.
        code: String,
    },
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<20}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn state_badge(state: ConsentState) -> String {
    match state {
        ConsentState::Granted => format!("{GREEN}{BOLD}granted{RESET}"),
        ConsentState::Declined => format!("{RED}{BOLD}declined{RESET}"),
        ConsentState::Undecided => format!("{YELLOW}{BOLD}undecided{RESET}"),
    }
}

fn persistence_label(persistence: Persistence) -> &'static str {
    match persistence {
        Persistence::Durable => "cookie + local storage",
        Persistence::CookieOnly => "cookie only",
        Persistence::LocalOnly => "local storage only",
        Persistence::MemoryOnly => "this page load only",
    }
}

fn print_report(title: &str, report: &PageReport, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(report).context("failed to encode page state")?;
        println!("{out}");
        return Ok(());
    }

    header("◉", title);
    kv_line("Consent", &state_badge(report.state));
    kv_line("Location", &report.location);
    kv_line("Language", report.language);
    kv_line("Prompt visible", yes_no(report.prompt_visible));
    kv_line("Analytics active", yes_no(report.analytics_active));
    if let Some(decided_at) = &report.decided_at {
        kv_line("Decided at", decided_at);
    }
    if let Some(version) = &report.policy_version {
        kv_line("Policy version", version);
    }
    for script in &report.scripts {
        let status = if script.loaded { "loaded" } else { "pending" };
        kv_line("Script", &format!("{} {DIM}({status}){RESET}", script.src));
    }
    if !report.data_layer.is_empty() {
        kv_line("dataLayer", &report.data_layer.join(", "));
    }
    if let Some(persistence) = report.persistence {
        kv_line("Stored in", persistence_label(persistence));
        if !persistence.survives_reload() {
            warning("Decision could not be stored and will be forgotten on the next load.");
        }
    }
    println!();
    Ok(())
}

// ── Command dispatch ─────────────────────────────────────────────────

fn init_tracing(config: &CliConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = CliConfig::from_env();
    if let Some(dir) = cli.profile.clone() {
        config.profile_dir = dir;
    }
    if let Some(lang) = cli.lang.clone() {
        config.browser_language = Some(lang);
    }
    init_tracing(&config);

    match run(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, config: &CliConfig) -> Result<()> {
    let profile = Profile::open(&config.profile_dir)?;
    let options = |location: &str| LoadOptions {
        location: location.to_owned(),
        browser_language: config.browser_language.clone(),
        offline: cli.offline,
        cookies_enabled: !cli.no_cookies,
    };

    match &cli.command {
        Commands::Visit { path } => cmd_visit(&profile, &options(path.as_str()), config, cli.json).await,
        Commands::Accept => cmd_decide(&profile, &options("/"), config, cli.json, true).await,
        Commands::Decline => cmd_decide(&profile, &options("/"), config, cli.json, false).await,
        Commands::Reset => cmd_reset(&profile, &options("/"), config, cli.json).await,
        Commands::LearnMore => cmd_learn_more(&profile, &options("/"), config, cli.json).await,
        Commands::Status => cmd_status(&profile, &options("/"), config, cli.json).await,
        Commands::CookieHeader => cmd_cookie_header(&profile, !cli.no_cookies).await,
        Commands::SetCookie { assignment } => cmd_set_cookie(&profile, assignment).await,
        Commands::SetLanguage { code } => cmd_set_language(&profile, code).await,
    }
}

// ── Page load commands ───────────────────────────────────────────────

async fn cmd_visit(profile: &Profile, options: &LoadOptions, config: &CliConfig, json: bool) -> Result<()> {
    let load = PageLoad::open(profile, options, config).await?;
    load.manager.initialize().await;
    load.settle().await;
    print_report("Page loaded", &load.report(None).await, json)
}

async fn cmd_decide(
    profile: &Profile,
    options: &LoadOptions,
    config: &CliConfig,
    json: bool,
    granted: bool,
) -> Result<()> {
    let load = PageLoad::open(profile, options, config).await?;
    load.manager.initialize().await;

    let decision = if granted {
        load.manager.accept().await
    } else {
        load.manager.decline().await
    };
    load.settle().await;

    let report = load.report(Some(decision.persistence)).await;
    if !json {
        let verb = if granted { "accepted" } else { "declined" };
        success(&format!("Analytics {verb}."));
    }
    print_report("Page state", &report, json)
}

async fn cmd_reset(profile: &Profile, options: &LoadOptions, config: &CliConfig, json: bool) -> Result<()> {
    let load = PageLoad::open(profile, options, config).await?;
    load.manager.initialize().await;
    load.manager.reset_handle().call().await;
    load.settle().await;

    if !json {
        success("Consent reset. The prompt is showing again.");
    }
    print_report("Page state", &load.report(None).await, json)
}

async fn cmd_learn_more(profile: &Profile, options: &LoadOptions, config: &CliConfig, json: bool) -> Result<()> {
    let load = PageLoad::open(profile, options, config).await?;
    load.manager.initialize().await;
    if !load.prompt.is_visible().await {
        bail!("the consent prompt is not showing; run `consentry reset` first");
    }
    load.prompt.learn_more().await;
    load.settle().await;
    print_report("Page state", &load.report(None).await, json)
}

/// Read the stored decision without initializing, so no analytics or
/// prompt side effects happen.
async fn cmd_status(profile: &Profile, options: &LoadOptions, config: &CliConfig, json: bool) -> Result<()> {
    let load = PageLoad::open(profile, options, config).await?;
    let record = load.manager.read_decision().await;

    if json {
        let out = serde_json::json!({
            "state": ConsentState::of(record.as_ref()),
            "record": record.as_ref().map(|r| serde_json::json!({
                "analytics": r.analytics_granted,
                "decided_at": r.decided_at.to_rfc3339(),
                "policy_version": r.policy_version,
            })),
        });
        let out = serde_json::to_string_pretty(&out).context("failed to encode status")?;
        println!("{out}");
        return Ok(());
    }

    header("◉", "Stored consent");
    kv_line("Consent", &state_badge(ConsentState::of(record.as_ref())));
    match record {
        Some(r) => {
            kv_line("Decided at", &r.decided_at.to_rfc3339());
            kv_line("Policy version", &r.policy_version);
        }
        None => kv_line("Record", "none"),
    }
    println!();
    Ok(())
}

// ── Profile commands ─────────────────────────────────────────────────

async fn cmd_cookie_header(profile: &Profile, cookies_enabled: bool) -> Result<()> {
    let jar = profile.cookie_jar(cookies_enabled)?;
    println!("{}", jar.cookie_header().await);
    Ok(())
}

async fn cmd_set_cookie(profile: &Profile, assignment: &str) -> Result<()> {
    let jar = profile.cookie_jar(true)?;
    jar.set_cookie(assignment)
        .await
        .context("failed to set cookie")?;
    Ok(())
}

async fn cmd_set_language(profile: &Profile, code: &str) -> Result<()> {
    let Some(language) = Language::from_code(code) else {
        let supported: Vec<&str> = Language::SUPPORTED.iter().map(|l| l.code()).collect();
        bail!("unsupported language '{code}' (expected one of: {})", supported.join(", "));
    };
    let local = profile.local_storage()?;
    save_language(&local, language).await;
    if local.get(LANGUAGE_STORAGE_KEY).await?.as_deref() != Some(language.code()) {
        bail!("language preference was not stored");
    }
    success(&format!("Language set to {language}."));
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli =
            Cli::try_parse_from(["consentry", "visit", "/blog", "--json", "--offline"]).unwrap();
        assert!(cli.json && cli.offline && !cli.no_cookies);
        assert!(matches!(cli.command, Commands::Visit { ref path } if path == "/blog"));
    }
}

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use stackpull_core::extractor::{DEFAULT_CONCURRENCY, DEFAULT_LEDGER_FILE};
use stackpull_core::sitemap::POST_PATH_MARKER;
use stackpull_core::{
    DateFilter, ExtractResult, Extraction, Extractor, ExtractorConfig, FetchConfig, Fetcher, MediaPolicy,
    OutputFormat, discover, post_id, publication_root,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod echo;

use echo::{print_banner, print_error, print_info, print_step, print_success, print_summary, print_warning, progress};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Download posts from a newsletter publication
#[derive(Parser, Debug)]
#[command(name = "stackpull")]
#[command(version)]
#[command(about = "Download newsletter posts and their images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "30", value_name = "SECS", global = true)]
    timeout: u64,

    /// Custom User-Agent for HTTP requests
    #[arg(long, value_name = "UA", global = true)]
    user_agent: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a single post, or every post of a publication
    Download(DownloadArgs),
    /// List the post URLs of a publication
    List(ListArgs),
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Post URL (contains /p/) or publication URL
    #[arg(short, long, value_name = "URL")]
    url: String,

    /// Output format (html, md, txt)
    #[arg(short, long, default_value = "html", value_name = "FORMAT")]
    format: OutputFormat,

    /// Directory posts are written under
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    output: PathBuf,

    /// Show what would be downloaded without downloading
    #[arg(short, long)]
    dry_run: bool,

    /// Download posts even if the ledger lists them
    #[arg(long)]
    force: bool,

    /// Ledger of already downloaded post ids
    #[arg(long, alias = "log-file", default_value = DEFAULT_LEDGER_FILE, value_name = "PATH")]
    ledger_file: PathBuf,

    #[command(flatten)]
    dates: DateArgs,

    /// Number of posts downloaded at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, value_name = "N")]
    concurrency: usize,

    /// What to do when an image cannot be downloaded (fail-fast, best-effort)
    #[arg(long, default_value = "fail-fast", value_name = "POLICY")]
    media_policy: MediaPolicy,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Any URL of the publication
    #[arg(value_name = "URL")]
    url: String,

    #[command(flatten)]
    dates: DateArgs,
}

#[derive(Args, Debug)]
struct DateArgs {
    /// Only posts last modified before this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    before: Option<String>,

    /// Only posts last modified after this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    after: Option<String>,
}

impl DateArgs {
    fn filter(&self) -> Option<DateFilter> {
        DateFilter::new(self.before.as_deref(), self.after.as_deref())
    }
}

/// Route library logs to stderr. `RUST_LOG` overrides the verbosity flag.
fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Cancel `cancel` on the first Ctrl-C.
fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            print_warning("Interrupted, stopping downloads");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        print_banner();
    }

    let fetch = FetchConfig {
        timeout: cli.timeout,
        user_agent: cli.user_agent.unwrap_or_else(|| FetchConfig::default().user_agent),
    };

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    match cli.command {
        Command::Download(args) => download(&args, fetch, &cancel).await,
        Command::List(args) => list(&args, &fetch, &cancel).await,
    }
}

async fn download(args: &DownloadArgs, fetch: FetchConfig, cancel: &CancellationToken) -> anyhow::Result<()> {
    let config = ExtractorConfig::builder()
        .output_dir(&args.output)
        .ledger_path(&args.ledger_file)
        .force(args.force)
        .concurrency(args.concurrency)
        .media_policy(args.media_policy)
        .output_format(args.format)
        .fetch(fetch)
        .build();
    debug!(?config, "Downloader configured");
    let extractor = Extractor::new(config).context("Failed to set up the downloader")?;

    if args.url.contains(POST_PATH_MARKER) {
        if args.dates.before.is_some() || args.dates.after.is_some() {
            print_warning("--before and --after only apply to whole publications; ignoring them");
        }
        download_single(&extractor, args, cancel).await
    } else {
        download_archive(&extractor, args, cancel).await
    }
}

fn is_known(extractor: &Extractor, url: &str) -> bool {
    !extractor.config().force && post_id(url).is_some_and(|id| extractor.is_processed(&id))
}

async fn download_single(
    extractor: &Extractor,
    args: &DownloadArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    if args.dry_run {
        if is_known(extractor, &args.url) {
            print_info(&format!("Already downloaded: {}", args.url));
        } else {
            println!("{}", args.url);
            print_info(&format!("Would download into {}", args.output.display()));
        }
        return Ok(());
    }

    print_step(1, 1, &format!("Downloading {}", args.url.bright_white().underline()));

    let extraction = extractor
        .extract_post(&args.url, cancel)
        .await
        .with_context(|| format!("Failed to download {}", args.url))?;

    match extraction {
        Extraction::Extracted(post) => {
            let path = post.output_path(extractor.output_dir(), args.format);
            print_success(&format!("Output written to {}", path.display().bright_white()));
        }
        Extraction::Skipped(reason) => print_info(&format!("Skipping {}: {}", args.url, reason)),
    }

    Ok(())
}

async fn download_archive(
    extractor: &Extractor,
    args: &DownloadArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let root = publication_root(&args.url).context("Invalid publication URL")?;
    let filter = args.dates.filter();

    print_step(1, 2, &format!("Reading sitemap of {}", root.bright_white().underline()));
    let urls = extractor
        .discover(&root, filter.as_ref(), cancel)
        .await
        .with_context(|| format!("Failed to list posts of {}", root))?;

    if urls.is_empty() {
        print_warning("No posts found");
        return Ok(());
    }
    print_info(&format!("Found {} posts", urls.len()));

    if args.dry_run {
        for url in &urls {
            if is_known(extractor, url) {
                print_info(&format!("Already downloaded: {}", url));
            } else {
                println!("{}", url);
            }
        }
        return Ok(());
    }

    print_step(2, 2, "Downloading posts");
    let total = urls.len();
    let mut run = extractor.run_all(urls, cancel.clone());
    let mut done = 0;

    while let Some(result) = run.next().await {
        done += 1;
        let prefix = progress(done, total);
        match result {
            ExtractResult::Completed(post) => {
                let path = post.output_path(extractor.output_dir(), args.format);
                print_success(&format!("{} {}", prefix, path.display()));
            }
            ExtractResult::Skipped { url, reason } => print_info(&format!("{} Skipping {}: {}", prefix, url, reason)),
            ExtractResult::Failed { url, error } if error.is_cancelled() => {
                print_warning(&format!("{} Cancelled {}", prefix, url));
            }
            ExtractResult::Failed { url, error } => print_error(&format!("{} {}: {}", prefix, url, error)),
        }
    }

    let summary = run.finish().await.context("Failed to update the ledger")?;
    print_summary(&summary);

    if cancel.is_cancelled() {
        anyhow::bail!("Interrupted before all posts were downloaded");
    }
    Ok(())
}

async fn list(args: &ListArgs, fetch: &FetchConfig, cancel: &CancellationToken) -> anyhow::Result<()> {
    let root = publication_root(&args.url).context("Invalid publication URL")?;
    let fetcher = Fetcher::new(fetch).context("Failed to set up the HTTP client")?;

    let urls = discover(&fetcher, &root, args.dates.filter().as_ref(), cancel)
        .await
        .with_context(|| format!("Failed to list posts of {}", root))?;

    if urls.is_empty() {
        print_warning("No posts found");
    }
    for url in urls {
        println!("{}", url);
    }

    Ok(())
}

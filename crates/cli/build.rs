use std::{env, fs, path::PathBuf};

fn date_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(clap::arg!(--before <DATE> "Only posts last modified before this date (YYYY-MM-DD)"))
        .arg(clap::arg!(--after <DATE> "Only posts last modified after this date (YYYY-MM-DD)"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=OUT_DIR");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let completions_dir = out_dir.join("completions");

    fs::create_dir_all(&completions_dir).unwrap();

    let download = clap::Command::new("download")
        .about("Download a single post, or every post of a publication")
        .arg(clap::arg!(-u --url <URL> "Post URL (contains /p/) or publication URL").required(true))
        .arg(
            clap::arg!(-f --format <FORMAT> "Output format (html, md, txt)")
                .default_value("html")
                .value_parser(["html", "md", "txt"]),
        )
        .arg(
            clap::arg!(-o --output <DIR> "Directory posts are written under")
                .default_value(".")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(clap::arg!(-d --dry_run "Show what would be downloaded without downloading"))
        .arg(clap::arg!(--force "Download posts even if the ledger lists them"))
        .arg(
            clap::arg!(--ledger_file <PATH> "Ledger of already downloaded post ids")
                .alias("log-file")
                .default_value("downloaded_posts.log")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(clap::arg!(--concurrency <N> "Number of posts downloaded at once").default_value("8"))
        .arg(
            clap::arg!(--media_policy <POLICY> "What to do when an image cannot be downloaded")
                .default_value("fail-fast")
                .value_parser(["fail-fast", "best-effort"]),
        );

    let list = clap::Command::new("list")
        .about("List the post URLs of a publication")
        .arg(clap::arg!(<URL> "Any URL of the publication"));

    let mut cmd = clap::Command::new("stackpull")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Download newsletter posts and their images")
        .arg(clap::arg!(-v --verbose "Enable debug logging").global(true))
        .arg(
            clap::arg!(--timeout <SECS> "HTTP timeout in seconds")
                .required(false)
                .default_value("30")
                .global(true),
        )
        .arg(
            clap::arg!(--user_agent <UA> "Custom User-Agent for HTTP requests")
                .required(false)
                .global(true),
        )
        .subcommand(date_args(download))
        .subcommand(date_args(list));

    clap_complete::generate_to(clap_complete::shells::Bash, &mut cmd, "stackpull", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Zsh, &mut cmd, "stackpull", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Fish, &mut cmd, "stackpull", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::PowerShell, &mut cmd, "stackpull", &completions_dir).unwrap();

    println!("cargo:warning=Shell completions generated in: {}", completions_dir.display());
}

use std::env;
use std::io::{self, BufRead, Write};
use std::thread;

use buildrone_client::dashboard::Event;
use buildrone_client::provision::ROTATION_WARNING;
use buildrone_client::{Config, Dashboard, HttpTransport, Phase, RepoKey, SecretEvent};
use chrono::Local;
use env_logger::Builder;
use failure::{Error, ResultExt};
use log::{debug, log_enabled, LevelFilter};
use structopt::StructOpt;

type Engine = Dashboard<HttpTransport>;

fn main() {
    let args = Args::from_args();

    if args.example_config {
        if let Err(e) = generate_example() {
            report(&e);
        }
        return;
    }

    if let Err(e) = run(&args) {
        report(&e);
        std::process::exit(1);
    }
}

fn report(e: &Error) {
    eprintln!("Error: {}", e);

    for cause in e.iter_causes() {
        eprintln!("\tCaused By: {}", cause);
    }
}

fn generate_example() -> Result<(), Error> {
    let example = Config::example();
    println!("{}", example.as_toml()?);
    Ok(())
}

fn run(args: &Args) -> Result<(), Error> {
    initialize_logging(args)?;
    let cfg = args.config()?;

    if log_enabled!(log::Level::Debug) {
        for line in format!("{:#?}", cfg.timing).lines() {
            debug!("{}", line);
        }
    }

    let transport = HttpTransport::new(cfg.general.base_url.as_str());
    let mut dashboard = Dashboard::new(transport, cfg.timing);

    if !dashboard.start() {
        login(&mut dashboard, &cfg)?;
    }
    print_events(&mut dashboard);

    match args.cmd {
        Command::Repos => list_repos(&dashboard),
        Command::Builds {
            ref repo,
            ref branch,
            all,
        } => show_builds(&mut dashboard, repo, branch.as_ref().map(|s| s.as_str()), all)?,
        Command::Key {
            ref repo,
            new_secret,
            yes,
        } => provision_key(&mut dashboard, repo, new_secret, yes)?,
    }

    Ok(())
}

fn login(dashboard: &mut Engine, cfg: &Config) -> Result<(), Error> {
    let username = match cfg.general.username {
        Some(ref name) => name.clone(),
        None => prompt("Username")?,
    };
    let password = match cfg.general.password {
        Some(ref pw) => pw.clone(),
        None => prompt("Password")?,
    };

    dashboard
        .login(&username, &password)
        .context("Unable to log in")?;

    Ok(())
}

fn prompt(question: &str) -> Result<String, Error> {
    print!("{}: ", question);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    Ok(line.trim_end_matches(|c| c == '\r' || c == '\n').to_string())
}

fn list_repos(dashboard: &Engine) {
    for repo in dashboard.repositories() {
        let status = if repo.secret { "configured" } else { "not set up" };

        match repo.latest_build() {
            Some(build) => println!(
                "{:<40} {:<12} {} ({}, {})",
                repo.key(),
                status,
                build.short_commit(),
                build.branch,
                build.date.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            ),
            None => println!("{:<40} {}", repo.key(), status),
        }
    }
}

fn show_builds(
    dashboard: &mut Engine,
    repo: &RepoKey,
    branch: Option<&str>,
    all: bool,
) -> Result<(), Error> {
    dashboard
        .open_repository(repo)
        .with_context(|_| format!("Unable to open {}", repo))?;

    // always grab the first page, then keep going if asked to
    while dashboard.has_more(repo) {
        dashboard
            .load_next_page(repo)
            .with_context(|_| format!("Unable to fetch builds for {}", repo))?;
        print_events(dashboard);

        if !all {
            break;
        }
    }

    if let Some(branch) = branch {
        dashboard.activate_branch(repo, branch)?;
    }

    let partition = match dashboard.active_partition(repo) {
        Some(p) => p,
        None => {
            println!("No builds found for {}", repo);
            return Ok(());
        }
    };
    let repository = match dashboard.repository(repo) {
        Some(r) => r,
        None => return Ok(()),
    };

    println!("{} ({})", repo, partition.branch());
    for commit in partition.commits() {
        if let Some(build) = repository.builds().get(commit) {
            println!(
                "  {}  {}  {}",
                build.short_commit(),
                build.date.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                build.name
            );
            for file in &build.files {
                println!("      {} ({})", file.name, file.size);
            }
        }
    }

    if dashboard.has_more(repo) {
        println!("(more builds available, use --all to fetch them)");
    }

    Ok(())
}

fn provision_key(
    dashboard: &mut Engine,
    repo: &RepoKey,
    new_secret: bool,
    yes: bool,
) -> Result<(), Error> {
    let mut phase = dashboard
        .request_key(repo, new_secret)
        .with_context(|_| format!("Unable to request a key for {}", repo))?;

    if phase == Phase::ConfirmPending {
        println!("{}", ROTATION_WARNING);

        if yes || prompt("Continue? [y/N]")?.eq_ignore_ascii_case("y") {
            phase = dashboard.confirm_key(repo)?;
        } else {
            dashboard.cancel_key(repo)?;
            print_events(dashboard);
            return Ok(());
        }
    }

    print_events(dashboard);

    // keep the key on screen until it expires
    while phase == Phase::Disclosed {
        wait_for_next_deadline(dashboard);
        print_events(dashboard);
        phase = dashboard.secret_phase(repo);
    }

    Ok(())
}

fn wait_for_next_deadline(dashboard: &mut Engine) {
    if let Some(deadline) = dashboard.next_deadline() {
        let remaining = deadline.checked_sub(dashboard.now()).unwrap_or_default();
        thread::sleep(remaining);
        dashboard.advance(remaining);
    }
}

fn print_events(dashboard: &mut Engine) {
    for event in dashboard.drain_events() {
        match event {
            Event::LoginRequired {
                message: Some(message),
            } => eprintln!("Login failed: {}", message),
            Event::RepositoriesOrdered { order } => {
                debug!("{} repositories", order.len())
            }
            Event::Secret(SecretEvent::Disclosed { key, secret, note }) => {
                println!("Build key for {}:", key);
                println!();
                println!("    {}", secret);
                println!();
                println!("{}", note);
            }
            Event::Secret(SecretEvent::Cleared { key }) => {
                println!("The key for {} is no longer shown", key)
            }
            Event::Secret(SecretEvent::Failed { key, reason }) => {
                eprintln!("Unable to get a key for {}: {}", key, reason)
            }
            other => debug!("{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, StructOpt)]
struct Args {
    #[structopt(
        short = "c",
        long = "config",
        default_value = "~/.buildrone.toml",
        help = "The configuration file to use."
    )]
    config_file: String,
    #[structopt(
        short = "v",
        long = "verbose",
        parse(from_occurrences),
        help = "Verbose output (repeat for more verbosity)"
    )]
    verbosity: u64,
    #[structopt(
        long = "example-config",
        help = "Generate an example config and immediately exit."
    )]
    example_config: bool,
    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, PartialEq, StructOpt)]
enum Command {
    /// List every repository, configured and most recently built first.
    #[structopt(name = "repos")]
    Repos,
    /// Show the builds for a repository.
    #[structopt(name = "builds")]
    Builds {
        #[structopt(help = "The repository (e.g. \"namespace/name\")")]
        repo: RepoKey,
        #[structopt(short = "b", long = "branch", help = "Show this branch instead of the default")]
        branch: Option<String>,
        #[structopt(long = "all", help = "Fetch every page of builds")]
        all: bool,
    },
    /// Generate a build key for a repository.
    #[structopt(name = "key")]
    Key {
        #[structopt(help = "The repository (e.g. \"namespace/name\")")]
        repo: RepoKey,
        #[structopt(long = "new-secret", help = "Rotate the secret, invalidating old keys")]
        new_secret: bool,
        #[structopt(short = "y", long = "yes", help = "Don't ask before rotating the secret")]
        yes: bool,
    },
}

impl Args {
    pub fn config(&self) -> Result<Config, Error> {
        let config_file =
            shellexpand::full(&self.config_file).context("Unable to expand wildcards")?;

        Config::from_file(&*config_file)
            .context("Couldn't load the config")
            .map_err(Into::into)
    }
}

fn initialize_logging(args: &Args) -> Result<(), Error> {
    let mut builder = Builder::new();

    let level = match args.verbosity {
        0 => None,
        1 => Some(LevelFilter::Info),
        2 => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    };

    if let Some(lvl) = level {
        builder.filter(Some("buildrone_client"), lvl);
        builder.filter(Some("buildrone"), lvl);
    }

    if let Ok(filter) = env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    }

    builder.format(|out, record| match record.line() {
        Some(line) => writeln!(
            out,
            "{} [{:5}] ({}#{}): {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            line,
            record.args()
        ),
        None => writeln!(
            out,
            "{} [{:5}] ({}): {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        ),
    });

    builder.try_init()?;

    Ok(())
}

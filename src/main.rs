//! Xtream Viewer
//! Live TV from Xtream Codes panels with an XMLTV program guide and a
//! passthrough proxy for clients that cannot reach the panel directly.

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

mod api;
mod config;
mod epg;
mod error;
mod logger;
mod models;
mod player;
mod proxy;
mod session;
mod shell;
mod transport;
mod view;

#[cfg(test)]
mod test_support;

use config::AppConfig;
use epg::DisplayZone;
use error::ViewerError;
use logger::Logger;
use models::Credentials;
use player::PlayRequest;
use proxy::ProxyController;
use session::Session;
use shell::{PlayerSettings, Shell, ShellOutcome};
use transport::{Gateway, HttpTransport, Transport};

/// Panel requests give up after this long; XMLTV downloads can be large.
const CLIENT_TIMEOUT_SECS: u64 = 300;

#[derive(Parser)]
#[command(name = "xtream_viewer", version, about)]
struct Cli {
    /// Panel base URL, e.g. http://panel.example:8080
    #[arg(long, global = true, env = "XTREAM_SERVER")]
    server: Option<String>,

    #[arg(long, short = 'u', global = true, env = "XTREAM_USERNAME")]
    username: Option<String>,

    #[arg(long, short = 'p', global = true, env = "XTREAM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Route panel requests through this proxy endpoint (…/proxy)
    #[arg(long, global = true, env = "XTREAM_PROXY", conflicts_with = "direct")]
    proxy: Option<String>,

    /// Talk to the panel without any proxy
    #[arg(long, global = true)]
    direct: bool,

    /// Port for `serve`
    #[arg(long, global = true, env = "XTREAM_PORT")]
    port: Option<u16>,

    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the passthrough proxy (GET /proxy?url=...)
    Serve,
    /// Check credentials against the panel
    Login {
        /// Save the login for later commands
        #[arg(long)]
        remember: bool,
    },
    /// Forget the saved login
    Logout,
    /// List live categories
    Categories,
    /// List the channels of a category (id or name)
    Channels {
        category: String,
        /// Only channels whose name contains this text
        #[arg(long, short = 's')]
        search: Option<String>,
    },
    /// Show the guide for an XMLTV channel id
    Epg {
        epg_channel_id: String,
        /// Only this day (YYYY-MM-DD); every day when omitted
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Play a live stream
    Play {
        stream_id: String,
        /// Print the stream URL instead of starting the player
        #[arg(long)]
        print: bool,
    },
    /// Interactive browser (default)
    Shell,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();
    Logger::init(cli.verbose, cli.quiet);

    let mut config = AppConfig::load();
    let command = cli.command.take().unwrap_or(Commands::Shell);

    match &command {
        Commands::Serve => serve(&cli, &config),
        Commands::Logout => {
            config.forget();
            config.save().context("saving config")?;
            println!("Logged out.");
            Ok(())
        }
        Commands::Login { remember } => {
            let session = login(&cli, &config)?;
            println!(
                "Logged in as {} ({} categories).",
                session.credentials().username,
                session.categories().len()
            );
            if *remember {
                config.remember(session.credentials());
                config.save().context("saving config")?;
                info!("login saved to {}", AppConfig::config_path().display());
            }
            Ok(())
        }
        Commands::Categories => {
            let session = login(&cli, &config)?;
            print!("{}", view::categories(session.categories()));
            Ok(())
        }
        Commands::Channels { category, search } => {
            let mut session = login(&cli, &config)?;
            let id = session
                .find_category(category)
                .map(|c| c.id.clone())
                .ok_or_else(|| anyhow!("Unknown category '{}'.", category))?;
            session.select_category(&id)?;
            let channels = session.search(search.as_deref().unwrap_or(""));
            println!("{}", view::channels(&channels, None).trim_end());
            Ok(())
        }
        Commands::Epg {
            epg_channel_id,
            date,
        } => {
            let mut session = login(&cli, &config)?;
            session.rebuild_epg()?;
            if let Some(name) = session.epg().display_name(epg_channel_id) {
                println!("{}", name);
            }
            let result = session.schedule(Some(epg_channel_id.as_str()), *date);
            println!("{}", view::schedule(&result, session.zone()).trim_end());
            Ok(())
        }
        Commands::Play { stream_id, print } => {
            let session = login(&cli, &config)?;
            let url = session.stream_url(stream_id);
            if *print {
                println!("{}", url);
                return Ok(());
            }
            let user_agent = Some(config.user_agent.as_str()).filter(|ua| !ua.is_empty());
            let request = PlayRequest {
                url: &url,
                title: stream_id,
                user_agent,
            };
            let mut child = player::launch(config.player(), &request)
                .with_context(|| format!("Failed to launch player '{}'", config.player()))?;
            child.wait()?;
            Ok(())
        }
        Commands::Shell => {
            let mut session = login(&cli, &config)?;
            let settings = PlayerSettings {
                command: config.player().to_string(),
                user_agent: Some(config.user_agent.clone()).filter(|ua| !ua.is_empty()),
                print_only: false,
            };

            let outcome = {
                let stdout = io::stdout();
                let mut shell = Shell::new(&mut session, settings, stdout.lock());
                shell.start()?;
                shell.run(io::stdin().lock())?
            };

            if outcome == ShellOutcome::LoggedOut {
                config.forget();
                config.save().context("saving config")?;
                session.logout();
                println!("Logged out.");
            }
            Ok(())
        }
    }
}

fn serve(cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    let port = cli.port.unwrap_or(config.listen_port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?
        .block_on(ProxyController::serve(addr, transport))
}

/// Command-line login wins; otherwise the saved one.
fn credentials(cli: &Cli, config: &AppConfig) -> Result<Credentials, ViewerError> {
    if let (Some(username), Some(password)) = (&cli.username, &cli.password) {
        let server = cli.server.as_deref().unwrap_or(&config.server_url);
        return Ok(Credentials::new(server, username, password));
    }

    let mut saved = config.saved_credentials().ok_or(ViewerError::MissingCredentials)?;
    if let Some(ref server) = cli.server {
        saved = Credentials::new(server, &saved.username, &saved.password);
    }
    Ok(saved)
}

/// Where panel requests go: `--direct`, an explicit proxy, or an embedded
/// proxy started for this process. The embedded proxy sends the configured
/// user agent upstream so the panel sees it.
fn gateway(cli: &Cli, config: &AppConfig) -> anyhow::Result<Gateway> {
    if cli.direct || !config.use_proxy {
        return Ok(Gateway::Direct);
    }
    if let Some(endpoint) = cli.proxy.clone().or_else(|| config.proxy_url.clone()) {
        return Ok(Gateway::Proxy(endpoint));
    }

    let upstream = HttpTransport::with_user_agent(&config.user_agent);
    let addr = ProxyController::spawn_local(Arc::new(upstream))
        .context("starting embedded proxy")?;
    Ok(Gateway::Proxy(format!("http://{}/proxy", addr)))
}

fn login(cli: &Cli, config: &AppConfig) -> anyhow::Result<Session> {
    let credentials = credentials(cli, config)?;
    let gateway = gateway(cli, config)?;
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::for_client(&config.user_agent, CLIENT_TIMEOUT_SECS));
    let zone = DisplayZone::from_offset_hours(config.epg_time_offset);

    Ok(Session::login(credentials, gateway, transport, zone)?)
}

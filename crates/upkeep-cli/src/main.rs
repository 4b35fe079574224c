//! upkeep - operator CLI for the upkeep session layer.
//!
//! Signs in against the configured backend, inspects token and
//! connectivity state, issues authenticated requests, and can run the
//! inactivity tracker interactively.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use upkeep_core::client::RequestOptions;
use upkeep_core::{
    ApiResponse, AuthService, ClientConfig, FileStore, HealthCheckSource, KeyringStore,
    NetworkObserver, ReqwestTransport, RequestClient, RestAuthBackend, SessionEvent,
    SessionLifecycleManager, TokenManager,
};

const USAGE: &str = "\
Usage: upkeep <command>

Commands:
  login [email] [--remember]   Sign in (uses saved credentials when no email is given)
  logout                       Sign out and clear stored tokens
  status                       Show token expiry and connectivity
  health                       Check the backend health endpoint
  get <endpoint>               Authenticated GET, prints the JSON response
  watch                        Track inactivity; each stdin line counts as activity";

/// Log file prefix under the data directory
const LOG_FILE_PREFIX: &str = "upkeep.log";

/// Initialize logging to stderr and a daily log file.
///
/// The returned guard flushes the file writer and must outlive `main`'s work.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match ClientConfig::data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

/// Everything a command needs, wired the way the app wires it.
struct App {
    config: ClientConfig,
    transport: Arc<ReqwestTransport>,
    auth: Arc<AuthService>,
    tokens: Arc<TokenManager>,
}

impl App {
    fn build() -> Result<Self> {
        let config = ClientConfig::load().context("Failed to load config")?;
        let secrets = Arc::new(KeyringStore::new());
        let transport = Arc::new(ReqwestTransport::new().context("Failed to build HTTP client")?);

        let backend = Arc::new(
            RestAuthBackend::new(&config, secrets.clone()).context("Failed to build auth client")?,
        );
        let tokens = Arc::new(TokenManager::with_expiry_buffer(
            backend.clone(),
            secrets.clone(),
            config.token_expiry_buffer(),
        ));
        let auth = Arc::new(AuthService::new(backend, tokens.clone(), secrets));

        Ok(Self {
            config,
            transport,
            auth,
            tokens,
        })
    }

    fn client(&self) -> RequestClient {
        RequestClient::new(&self.config, self.transport.clone(), self.tokens.clone())
    }

    async fn network(&self) -> Arc<NetworkObserver> {
        let source = Arc::new(HealthCheckSource::new(self.transport.clone(), &self.config));
        Arc::new(NetworkObserver::init(source, self.transport.clone(), &self.config).await)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let app = App::build()?;
    info!(command = %command, backend = %app.config.base_url(), "upkeep starting");

    match command.as_str() {
        "login" => login(&app, &args[1..]).await,
        "logout" => logout(&app).await,
        "status" => status(&app).await,
        "health" => health(&app).await,
        "get" => {
            let endpoint = args.get(1).context("get requires an endpoint")?;
            get(&app, endpoint).await
        }
        "watch" => watch(&app).await,
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }
}

async fn login(app: &App, args: &[String]) -> Result<()> {
    let remember = args.iter().any(|a| a == "--remember");
    let email = args.iter().find(|a| !a.starts_with("--")).cloned();

    let user = match email {
        None if app.auth.has_saved_credentials() => app
            .auth
            .sign_in_with_saved()
            .await
            .context("Sign-in with saved credentials failed")?,
        email => {
            let email = match email {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password =
                rpassword::prompt_password("Password: ").context("Failed to read password")?;
            app.auth
                .sign_in(&email, &password, remember)
                .await
                .context("Sign-in failed")?
        }
    };

    println!(
        "Signed in as {}",
        user.email.as_deref().unwrap_or(user.id.as_str())
    );
    Ok(())
}

async fn logout(app: &App) -> Result<()> {
    app.auth.sign_out().await;
    println!("Signed out");
    Ok(())
}

async fn status(app: &App) -> Result<()> {
    match app.tokens.seconds_until_expiry().await {
        Some(secs) if secs > 0 => println!("Token:        valid for {}", format_duration(secs)),
        Some(_) => println!("Token:        expired (will refresh on next request)"),
        None => println!("Token:        not signed in"),
    }
    if let Some(last) = app.tokens.last_refresh() {
        println!("Last refresh: {last}");
    }
    if let Some(email) = app.auth.saved_email() {
        println!("Saved login:  {email}");
    }

    let network = app.network().await;
    let net = network.get_status();
    println!(
        "Network:      {} ({})",
        if net.is_online() { "online" } else { "offline" },
        net.connection_type
    );
    println!("Backend:      {}", app.config.base_url());
    Ok(())
}

async fn health(app: &App) -> Result<()> {
    if app.client().health_check().await {
        println!("Backend healthy");
        Ok(())
    } else {
        bail!("Backend unhealthy or unreachable at {}", app.config.base_url())
    }
}

async fn get(app: &App, endpoint: &str) -> Result<()> {
    let network = app.network().await;
    let client = app.client().with_network(network);
    let response: ApiResponse<serde_json::Value> =
        client.get(endpoint, RequestOptions::default()).await;

    match response.into_result() {
        Ok(Some(data)) => println!("{}", serde_json::to_string_pretty(&data)?),
        Ok(None) => println!("(empty response)"),
        Err(e) => bail!("GET {endpoint} failed: {e}"),
    }
    Ok(())
}

async fn watch(app: &App) -> Result<()> {
    if app.tokens.get_tokens().await.is_none() {
        bail!("Not signed in. Run `upkeep login` first.");
    }

    let data_dir = ClientConfig::data_dir()?;
    let preferences = Arc::new(FileStore::in_dir(&data_dir));
    let manager = SessionLifecycleManager::init(preferences, app.auth.clone());

    let (tx, mut events) = mpsc::unbounded_channel();
    let _subscription = manager.add_event_listener(move |event: &SessionEvent| {
        let _ = tx.send(event.clone());
    });

    let config = manager.get_config();
    println!(
        "Watching session: warning after {}, expiry after {}. Press Enter to register activity.",
        format_duration((config.warning_timeout_ms / 1000) as i64),
        format_duration((config.inactivity_timeout_ms / 1000) as i64),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "extend" => {
                    manager.extend_session();
                }
                Some(_) => {
                    manager.update_activity();
                    if let Some(left) = manager.time_until_expiry() {
                        let left = format_duration(left.as_secs() as i64);
                        println!("Activity recorded; expires in {left}");
                    }
                }
                None => break,
            },
            Some(event) = events.recv() => {
                println!("{}", serde_json::to_string(&event)?);
                if matches!(event, SessionEvent::Expired { .. }) {
                    // Wait for the sign-out instead of dropping it on exit
                    app.auth.sign_out().await;
                    break;
                }
            }
        }
    }

    manager.destroy();
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn format_duration(total_secs: i64) -> String {
    let (mins, secs) = (total_secs / 60, total_secs % 60);
    if mins >= 60 {
        format!("{}h {}m", mins / 60, mins % 60)
    } else if mins > 0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

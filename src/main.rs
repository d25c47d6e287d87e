use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;

use session_keeper::auth::{decoder, RestoreAction, SessionCoordinator, SessionEvent};
use session_keeper::config::{self, Command, Config};
use session_keeper::http_client::AuthHttpClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    // Validate once logging is up so its warnings are visible
    config.validate()?;

    tracing::debug!("Backend: {}", config.base_url);

    let session = SessionCoordinator::new(config.session_config())?;
    tracing::info!("Token storage: {}", session.store().backend_kind());

    match session.start() {
        RestoreAction::Scheduled(delay) => {
            tracing::debug!("Proactive renewal armed in {}s", delay.as_secs())
        }
        RestoreAction::ImmediateRenewal(delay) => {
            tracing::debug!("Renewal due in {}ms", delay.as_millis())
        }
        RestoreAction::Idle => {}
    }

    match command {
        Command::Login { email, password } => {
            let (email, password) = config::prompt_credentials(email, password)?;
            let pair = session.login(&email, &password).await?;
            println!("✅ Logged in as {}", email);
            println!("   Token expires at {}", format_ms(pair.expires_at_ms));
        }
        Command::Register {
            email,
            name,
            password,
        } => {
            let (email, password) = config::prompt_credentials(email, password)?;
            let pair = session.register(&email, &password, name.as_deref()).await?;
            println!("✅ Registered {}", email);
            println!("   Token expires at {}", format_ms(pair.expires_at_ms));
        }
        Command::Status => print_status(&session),
        Command::Get { path } => {
            let client = AuthHttpClient::new(session.clone());
            let response = client.get(&path).await?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            println!("{}", status);
            if !body.is_empty() {
                println!("{}", body);
            }
        }
        Command::Logout => {
            session.logout().await;
            println!("👋 Logged out");
        }
        Command::Watch => watch(&session).await,
    }

    Ok(())
}

/// Print the stored session state
fn print_status(session: &SessionCoordinator) {
    let store = session.store();
    println!("Storage:        {}", store.backend_kind());

    let Some(token) = session.access_token() else {
        println!("Session:        none (run `login`)");
        return;
    };

    let state = if session.is_authenticated() {
        "valid"
    } else {
        "expiring or expired"
    };
    println!("Session:        {}", state);

    if let Some(expires_at) = store.expires_at_ms() {
        println!("Expires at:     {}", format_ms(expires_at));
    }
    match session.pending_renewal() {
        Some(delay) => println!("Renewal in:     {}s", delay.as_secs()),
        None => println!("Renewal in:     not scheduled"),
    }

    if let Some(claims) = decoder::claims(&token) {
        if let Some(sub) = &claims.sub {
            println!("Subject:        {}", sub);
        }
        if let Some(email) = &claims.email {
            println!("Email:          {}", email);
        }
        if let Some(name) = &claims.name {
            println!("Name:           {}", name);
        }
        if let Some(issued) = claims.issued_at() {
            println!("Issued at:      {}", issued.to_rfc3339());
        }
    }

    for cookie in store.cookie_headers() {
        println!("Set-Cookie:     {}", cookie);
    }
}

/// Keep the session alive, printing events until shutdown or session end
async fn watch(session: &SessionCoordinator) {
    let mut events = session.subscribe();
    tracing::info!("Watching session, press Ctrl+C to stop");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Renewed) => {
                    let expires = session
                        .store()
                        .expires_at_ms()
                        .map(format_ms)
                        .unwrap_or_else(|| "unknown".to_string());
                    println!("🔄 Session renewed, expires at {}", expires);
                }
                Ok(SessionEvent::SessionEnded { reason }) => {
                    println!("⛔ Session ended: {:?}", reason);
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} session events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => break,
        }
    }
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}

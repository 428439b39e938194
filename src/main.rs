use color_eyre::{eyre::eyre, Result};
use lampsync::config::AppConfig;
use lampsync::mqtt::ConnectionManager;
use lampsync::router::inbound_topics;
use lampsync::session::{Intent, SessionHandle, SessionView};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    // Config loading logs through a scoped subscriber until the configured
    // level is known
    let (config, level) = {
        let _bootstrap = tracing::subscriber::set_default(log_subscriber(Level::INFO));
        let config_path = AppConfig::default_path()?;
        let config = AppConfig::load_or_create(&config_path).await?;
        let level = config.logging.level();
        (config, level)
    };
    tracing::subscriber::set_global_default(log_subscriber(level))?;
    info!("Logging at {}", level);

    let (mut connection, inbound) =
        ConnectionManager::connect(&config.broker, inbound_topics(&config.topics));

    let mut session = SessionHandle::spawn(
        &config,
        Arc::new(connection.publisher()),
        inbound,
        connection.subscribe_state(),
    )
    .map_err(|e| eyre!("Failed to spawn control session: {}", e))?;

    let mut views = session.subscribe();
    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;
    info!("Reading intents from stdin, Ctrl-C to quit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }

            changed = views.changed() => {
                if changed.is_err() {
                    warn!("Control session stopped");
                    break;
                }
                log_view(&views.borrow_and_update());
            }

            line = console.next_line(), if console_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<Intent>() {
                    Ok(intent) => session.send(intent).await?,
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => {
                    debug!("stdin closed");
                    console_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    console_open = false;
                }
            },
        }
    }

    session.dispose().await?;
    connection.disconnect().await?;
    Ok(())
}

fn log_view(view: &SessionView) {
    let lamps: Vec<String> = view
        .snapshot
        .lamp_status
        .iter()
        .map(|(lamp, on)| format!("{}={}", lamp, if *on { "ON" } else { "OFF" }))
        .collect();
    info!(
        "[{}] intensity {}% threshold {}% mode {} | {}",
        view.connection,
        view.snapshot.light_intensity,
        view.snapshot.terrace_threshold,
        view.snapshot.terrace_mode,
        lamps.join(", ")
    );
    if let Some(notice) = &view.notice {
        warn!("{}", notice.message);
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn log_subscriber(level: Level) -> impl tracing::Subscriber + Send + Sync + 'static {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .finish()
}

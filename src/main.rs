use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod app;
mod client;
mod config;
mod handler;
mod tui;
mod ui;

use app::App;
use client::ChatClient;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = Config::load_or_init().unwrap_or_else(|_| Config::new());
    let client = ChatClient::new(config.endpoint());
    tracing::info!(
        "starting chatbox v{} against {}",
        env!("CARGO_PKG_VERSION"),
        client.base_url()
    );

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut app = App::new(client);
    let mut events = tui::EventHandler::new();

    let result = run(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App, events: &mut tui::EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        if let Some(event) = events.next().await {
            handler::handle_event(app, event).await?;
        }
    }
    Ok(())
}

/// Diagnostics go to a log file; the terminal itself is the UI.
fn init_tracing() -> Result<()> {
    let log_path = Config::log_path()?;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    Ok(())
}

mod app_service;
mod app_state;
mod commands;
mod config;
mod storage;
mod tasks;
mod ui;
mod workflow;

use anyhow::Context;
use chrono::Local;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::app_service::refresh_ui;
use crate::app_state::{App, AppEvent};
use crate::commands::{AppCommand, CommandHandler};
use crate::config::AppConfig;
use crate::tasks::{TaskService, WorkflowRunner};
use crate::ui::draw;
use crate::workflow::WorkflowContext;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let log_dir = std::path::PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join(format!("curator-{}.log", ts)))?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Warn)
        .filter_module("survey_curator", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error)
        .init();

    let mut startup_info = Vec::new();
    match dotenv::dotenv() {
        Ok(path) => startup_info.push(format!("✓ Loaded {}", path.display())),
        Err(_) => startup_info.push("⚠ No .env file, using the process environment".to_string()),
    }

    let config = AppConfig::from_env().context("invalid configuration")?;
    let ctx = Arc::new(WorkflowContext::from_config(&config).context("invalid configuration")?);
    log::info!("Configuration: {:?}", config);
    startup_info.push(format!(
        "✓ Project {} as {} ({} workers)",
        config.naming.project, config.operator, config.task_workers
    ));

    let db = Arc::new(
        storage::establish_connection(&config.database_url)
            .await
            .with_context(|| format!("cannot open {}", config.database_url))?,
    );
    startup_info.push(format!("✓ Database {}", config.database_url));

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<AppCommand>();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel::<AppEvent>();

    let runner = Arc::new(WorkflowRunner::new(db.clone(), ctx.clone()));
    let tasks = Arc::new(TaskService::new(
        db.clone(),
        runner,
        evt_tx.clone(),
        config.task_workers,
    ));
    tasks.recover().await;
    tasks.start_workers();

    {
        let dbc = db.clone();
        let txc = evt_tx.clone();
        tokio::spawn(async move {
            loop {
                refresh_ui(&dbc, &txc).await;
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        });
    }

    let handler = CommandHandler::new(db.clone(), ctx, tasks, evt_tx);
    tokio::spawn(handler.run(cmd_rx));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(startup_info, cmd_tx, evt_rx);
    let res = match app.evt_rx.take() {
        Some(rx) => run_app_loop(&mut terminal, &mut app, rx).await,
        None => Ok(()),
    };

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

async fn run_app_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    mut evt_rx: mpsc::UnboundedReceiver<AppEvent>,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| draw(f, app))?;

        while let Ok(event) = evt_rx.try_recv() {
            app.apply_event(event);
        }

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.handle_key_event(key.code) {
                    return Ok(());
                }
            }
        }
    }
}

mod align;
mod api;
mod command;
mod config;
mod error_log;
mod notes;
mod pnl;
mod poller;
mod tui;
mod view;

use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use color_eyre::Result;
use tokio::task;

use crate::api::BackendClient;
use crate::command::{Command, ControlCommand};
use crate::error_log::ErrorLogStore;
use crate::poller::Poller;
use crate::tui::TuiApp;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let param = config::CliParams::parse();
    use tokio::sync::{broadcast, mpsc};

    let (tx, mut rx) = broadcast::channel::<Command>(64);
    let (control_tx, control_rx) = mpsc::channel::<ControlCommand>(16);

    let backend = Arc::new(BackendClient::new(&param)?);
    let poller = Poller::new(
        backend,
        tx.clone(),
        control_rx,
        param.market_interval.as_duration(),
        param.portfolio_interval.as_duration(),
        ErrorLogStore::new(ErrorLogStore::default_path()),
    );
    let poller_tx = tx.clone();
    task::spawn(async move {
        if let Err(err) = poller.run().await {
            let _ = poller_tx.send(Command::Error(format!("poller error: {err}")));
        }
    });

    let mut app = TuiApp::new(control_tx.clone(), param.display_timezone());
    let app_result = tokio::select! {
        result = app.run(&mut rx) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    let _ = control_tx.try_send(ControlCommand::Shutdown);
    let _ = tx.send(Command::Exit);
    app.dispose();
    app_result.map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

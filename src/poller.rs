use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::api::Backend;
use crate::command::{AggregatedData, Command, ControlCommand, MarketQuote, SingleModelData};
use crate::error_log::ErrorLogStore;
use crate::view::{CycleKind, FetchTicket, ViewMode, ViewState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchTrigger {
    Scheduled,
    Manual,
}

enum FetchPayload {
    Single(Box<SingleModelData>),
    Aggregated(AggregatedData),
    Market(Vec<(String, MarketQuote)>),
    Failed(String),
}

struct FetchOutcome {
    ticket: FetchTicket,
    trigger: FetchTrigger,
    payload: FetchPayload,
}

/// Owns the recurring fetch cycles and the `ViewState`. All transitions and
/// staleness checks run inside this one task; fetches are spawned and report
/// back with the ticket they captured, so a completion that outlived its
/// generation is dropped without rendering.
pub struct Poller<B: Backend + 'static> {
    backend: Arc<B>,
    view: ViewState,
    tx: broadcast::Sender<Command>,
    control_rx: mpsc::Receiver<ControlCommand>,
    outcome_tx: mpsc::Sender<FetchOutcome>,
    outcome_rx: mpsc::Receiver<FetchOutcome>,
    market_interval: Duration,
    portfolio_interval: Duration,
    // Generation of the scheduled fetch currently in flight, per cycle kind.
    // Manual refreshes bypass these and may overlap a scheduled fetch.
    scheduled_market: Option<u64>,
    scheduled_portfolio: Option<u64>,
    // Latches true the first time a non-empty model list is seen; portfolio
    // cycles are inert until then.
    active: bool,
    error_log: ErrorLogStore,
}

impl<B: Backend + 'static> Poller<B> {
    pub fn new(
        backend: Arc<B>,
        tx: broadcast::Sender<Command>,
        control_rx: mpsc::Receiver<ControlCommand>,
        market_interval: Duration,
        portfolio_interval: Duration,
        error_log: ErrorLogStore,
    ) -> Poller<B> {
        let (outcome_tx, outcome_rx) = mpsc::channel(32);
        Poller {
            backend,
            view: ViewState::new(),
            tx,
            control_rx,
            outcome_tx,
            outcome_rx,
            market_interval,
            portfolio_interval,
            scheduled_market: None,
            scheduled_portfolio: None,
            active: false,
            error_log,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        self.reload_models().await;
        // The market cycle fires immediately; the portfolio cycle waits a full
        // period because activation already fired the initial portfolio fetch.
        let mut market_tick = time::interval(self.market_interval);
        market_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut portfolio_tick = time::interval_at(
            Instant::now() + self.portfolio_interval,
            self.portfolio_interval,
        );
        portfolio_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = market_tick.tick() => self.tick(CycleKind::Market),
                _ = portfolio_tick.tick() => self.tick(CycleKind::Portfolio),
                Some(outcome) = self.outcome_rx.recv() => self.apply_outcome(outcome),
                command = self.control_rx.recv() => match command {
                    Some(ControlCommand::Shutdown) | None => break,
                    Some(command) => self.handle_control(command).await,
                },
            }
        }
        self.view.invalidate();
        Ok(())
    }

    /// A scheduled tick is skipped while a scheduled fetch of the same kind is
    /// still in flight for the current generation.
    fn tick(&mut self, kind: CycleKind) {
        let generation = self.view.generation();
        match kind {
            CycleKind::Market => {
                if self.scheduled_market == Some(generation) {
                    return;
                }
                self.scheduled_market = Some(generation);
                self.spawn_market_fetch(FetchTrigger::Scheduled);
            }
            CycleKind::Portfolio => {
                if !self.active || self.scheduled_portfolio == Some(generation) {
                    return;
                }
                self.scheduled_portfolio = Some(generation);
                self.spawn_portfolio_fetch(FetchTrigger::Scheduled);
            }
        }
    }

    fn spawn_market_fetch(&self, trigger: FetchTrigger) {
        let ticket = self.view.ticket(CycleKind::Market);
        let backend = Arc::clone(&self.backend);
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let payload = match backend.fetch_market_prices().await {
                Ok(quotes) => FetchPayload::Market(quotes),
                Err(err) => FetchPayload::Failed(format!("failed to load market prices: {err:#}")),
            };
            let _ = outcome_tx
                .send(FetchOutcome {
                    ticket,
                    trigger,
                    payload,
                })
                .await;
        });
    }

    fn spawn_portfolio_fetch(&self, trigger: FetchTrigger) {
        let ticket = self.view.ticket(CycleKind::Portfolio);
        let backend = Arc::clone(&self.backend);
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let payload = match ticket.mode {
                ViewMode::Single(model_id) => match backend.fetch_model_data(model_id).await {
                    Ok(data) => FetchPayload::Single(Box::new(data)),
                    Err(err) => FetchPayload::Failed(format!(
                        "failed to load data for model {model_id}: {err:#}"
                    )),
                },
                ViewMode::Aggregated => match backend.fetch_aggregated().await {
                    Ok(data) => FetchPayload::Aggregated(data),
                    Err(err) => {
                        FetchPayload::Failed(format!("failed to load aggregated data: {err:#}"))
                    }
                },
            };
            let _ = outcome_tx
                .send(FetchOutcome {
                    ticket,
                    trigger,
                    payload,
                })
                .await;
        });
    }

    /// Completion path: release the in-flight marker, drop stale results
    /// silently, log failures, render the rest. Within one generation the
    /// last completion wins, whichever fetch started first.
    fn apply_outcome(&mut self, outcome: FetchOutcome) {
        if outcome.trigger == FetchTrigger::Scheduled {
            match outcome.ticket.kind {
                CycleKind::Market => {
                    if self.scheduled_market == Some(outcome.ticket.generation) {
                        self.scheduled_market = None;
                    }
                }
                CycleKind::Portfolio => {
                    if self.scheduled_portfolio == Some(outcome.ticket.generation) {
                        self.scheduled_portfolio = None;
                    }
                }
            }
        }
        if !self.view.accepts(&outcome.ticket) {
            // StaleResult: deliberate no-op, no render, no error.
            return;
        }
        match outcome.payload {
            FetchPayload::Single(data) => {
                let _ = self.tx.send(Command::SingleModel(data));
            }
            FetchPayload::Aggregated(data) => {
                let _ = self.tx.send(Command::Aggregated(data));
            }
            FetchPayload::Market(quotes) => {
                let _ = self.tx.send(Command::MarketPrices(quotes));
            }
            FetchPayload::Failed(message) => self.report_error("fetch", message),
        }
    }

    async fn handle_control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::SelectModel(model_id) => {
                let mode = self.view.select_single(model_id);
                let _ = self.tx.send(Command::ViewChanged(mode));
                self.reload_models().await;
                self.spawn_portfolio_fetch(FetchTrigger::Manual);
            }
            ControlCommand::SelectAggregated => {
                let mode = self.view.select_aggregated();
                let _ = self.tx.send(Command::ViewChanged(mode));
                self.reload_models().await;
                self.spawn_portfolio_fetch(FetchTrigger::Manual);
            }
            ControlCommand::Refresh => {
                self.reload_models().await;
                self.spawn_market_fetch(FetchTrigger::Manual);
                if self.active {
                    self.spawn_portfolio_fetch(FetchTrigger::Manual);
                }
            }
            ControlCommand::DeleteModel(model_id) => match self.backend.delete_model(model_id).await
            {
                Ok(()) => {
                    let changed = self.view.on_model_deleted(model_id);
                    self.reload_models().await;
                    if changed {
                        let _ = self.tx.send(Command::ViewChanged(self.view.current()));
                        self.spawn_portfolio_fetch(FetchTrigger::Manual);
                    }
                }
                Err(err) => {
                    self.report_error("delete", format!("failed to delete model {model_id}: {err:#}"));
                }
            },
            ControlCommand::LoadSettings => match self.backend.fetch_settings().await {
                Ok(settings) => {
                    let _ = self.tx.send(Command::Settings(settings));
                }
                Err(err) => self.report_error("settings", format!("failed to load settings: {err:#}")),
            },
            ControlCommand::SaveSettings(settings) => {
                match self.backend.save_settings(&settings).await {
                    Ok(()) => {
                        let _ = self.tx.send(Command::SettingsSaved);
                    }
                    Err(err) => {
                        self.report_error("settings", format!("failed to save settings: {err:#}"));
                    }
                }
            }
            ControlCommand::CheckUpdate => match self.backend.check_update().await {
                Ok(info) => {
                    let _ = self.tx.send(Command::Update(info));
                }
                Err(err) => {
                    self.report_error("update", format!("failed to check for updates: {err:#}"));
                }
            },
            ControlCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    /// Refreshes the model list; the first non-empty list activates the
    /// portfolio cycle and fires its initial out-of-band fetch.
    async fn reload_models(&mut self) {
        match self.backend.fetch_models().await {
            Ok(models) => {
                let newly_active = !self.active && !models.is_empty();
                let _ = self.tx.send(Command::Models(models));
                if newly_active {
                    self.active = true;
                    let _ = self.tx.send(Command::ViewChanged(self.view.current()));
                    self.spawn_portfolio_fetch(FetchTrigger::Manual);
                }
            }
            Err(err) => self.report_error("models", format!("failed to load models: {err:#}")),
        }
    }

    fn report_error(&self, source: &str, message: String) {
        let _ = self.error_log.record(source, message.as_str());
        let _ = self.tx.send(Command::Error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use crate::command::{AppSettings, ModelInfo, PortfolioSnapshot, UpdateInfo};

    struct StubBackend {
        models: Vec<ModelInfo>,
        fetch_delay: Duration,
        fail_portfolio: bool,
        single_fetches: AtomicUsize,
        aggregated_fetches: AtomicUsize,
        market_fetches: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl StubBackend {
        fn new(model_ids: &[i64], fetch_delay: Duration) -> StubBackend {
            StubBackend {
                models: model_ids
                    .iter()
                    .map(|id| ModelInfo {
                        id: *id,
                        name: format!("model-{id}"),
                        model_name: format!("stub-{id}"),
                    })
                    .collect(),
                fetch_delay,
                fail_portfolio: false,
                single_fetches: AtomicUsize::new(0),
                aggregated_fetches: AtomicUsize::new(0),
                market_fetches: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Backend for StubBackend {
        async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(self.models.clone())
        }

        async fn fetch_model_data(&self, model_id: i64) -> Result<SingleModelData> {
            self.single_fetches.fetch_add(1, Ordering::SeqCst);
            time::sleep(self.fetch_delay).await;
            if self.fail_portfolio {
                return Err(anyhow!("stub portfolio failure"));
            }
            Ok(SingleModelData {
                model_id,
                portfolio: PortfolioSnapshot {
                    total_value: model_id as f64,
                    ..PortfolioSnapshot::default()
                },
                history: Vec::new(),
                trades: Vec::new(),
                conversations: Vec::new(),
            })
        }

        async fn fetch_aggregated(&self) -> Result<AggregatedData> {
            self.aggregated_fetches.fetch_add(1, Ordering::SeqCst);
            time::sleep(self.fetch_delay).await;
            if self.fail_portfolio {
                return Err(anyhow!("stub aggregated failure"));
            }
            Ok(AggregatedData {
                portfolio: PortfolioSnapshot::default(),
                chart: Vec::new(),
            })
        }

        async fn fetch_market_prices(&self) -> Result<Vec<(String, MarketQuote)>> {
            self.market_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![(
                "BTC".to_string(),
                MarketQuote {
                    price: 60_000.0,
                    change_24h: 1.0,
                },
            )])
        }

        async fn delete_model(&self, _model_id: i64) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_settings(&self) -> Result<AppSettings> {
            Ok(AppSettings {
                trading_frequency_minutes: 60,
                trading_fee_rate: 0.001,
            })
        }

        async fn save_settings(&self, _settings: &AppSettings) -> Result<()> {
            Ok(())
        }

        async fn check_update(&self) -> Result<UpdateInfo> {
            Ok(UpdateInfo::default())
        }
    }

    struct Harness {
        backend: Arc<StubBackend>,
        control_tx: mpsc::Sender<ControlCommand>,
        rx: broadcast::Receiver<Command>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    fn start_poller(backend: StubBackend) -> Harness {
        let backend = Arc::new(backend);
        let (tx, rx) = broadcast::channel(256);
        let (control_tx, control_rx) = mpsc::channel(16);
        let poller = Poller::new(
            Arc::clone(&backend),
            tx,
            control_rx,
            Duration::from_secs(5),
            Duration::from_secs(10),
            ErrorLogStore::new(std::env::temp_dir().join("trade-board-poller-tests.jsonl")),
        );
        let handle = tokio::spawn(poller.run());
        Harness {
            backend,
            control_tx,
            rx,
            handle,
        }
    }

    async fn shutdown_and_drain(mut harness: Harness) -> (Arc<StubBackend>, Vec<Command>) {
        harness
            .control_tx
            .send(ControlCommand::Shutdown)
            .await
            .unwrap();
        harness.handle.await.unwrap().unwrap();
        let mut commands = Vec::new();
        while let Ok(command) = harness.rx.try_recv() {
            commands.push(command);
        }
        (harness.backend, commands)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_mode_switches_render_only_the_final_selection() {
        let harness = start_poller(StubBackend::new(&[1, 2], Duration::from_millis(500)));
        harness
            .control_tx
            .send(ControlCommand::SelectModel(1))
            .await
            .unwrap();
        harness
            .control_tx
            .send(ControlCommand::SelectAggregated)
            .await
            .unwrap();
        harness
            .control_tx
            .send(ControlCommand::SelectModel(2))
            .await
            .unwrap();
        // Let every overlapped fetch complete.
        time::sleep(Duration::from_secs(2)).await;
        let (_, commands) = shutdown_and_drain(harness).await;

        let singles: Vec<i64> = commands
            .iter()
            .filter_map(|command| match command {
                Command::SingleModel(data) => Some(data.model_id),
                _ => None,
            })
            .collect();
        assert_eq!(singles, vec![2], "only the final selection may render");
        assert!(
            !commands
                .iter()
                .any(|command| matches!(command, Command::Aggregated(_))),
            "the superseded aggregated fetch must be dropped"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_viewed_model_falls_back_and_refetches_aggregated() {
        let harness = start_poller(StubBackend::new(&[1], Duration::ZERO));
        time::sleep(Duration::from_millis(20)).await;
        harness
            .control_tx
            .send(ControlCommand::SelectModel(1))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(20)).await;
        let aggregated_before = harness.backend.aggregated_fetches.load(Ordering::SeqCst);
        harness
            .control_tx
            .send(ControlCommand::DeleteModel(1))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(20)).await;
        let (backend, commands) = shutdown_and_drain(harness).await;

        assert_eq!(backend.deletes.load(Ordering::SeqCst), 1);
        assert!(
            backend.aggregated_fetches.load(Ordering::SeqCst) > aggregated_before,
            "falling back to the aggregated view must trigger an aggregated fetch"
        );
        let last_view = commands
            .iter()
            .rev()
            .find_map(|command| match command {
                Command::ViewChanged(mode) => Some(*mode),
                _ => None,
            })
            .expect("a view change must be broadcast");
        assert_eq!(last_view, ViewMode::Aggregated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_other_model_changes_nothing() {
        let harness = start_poller(StubBackend::new(&[1, 2], Duration::ZERO));
        time::sleep(Duration::from_millis(20)).await;
        harness
            .control_tx
            .send(ControlCommand::SelectModel(1))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(20)).await;
        let singles_before = harness.backend.single_fetches.load(Ordering::SeqCst);
        let aggregated_before = harness.backend.aggregated_fetches.load(Ordering::SeqCst);
        harness
            .control_tx
            .send(ControlCommand::DeleteModel(2))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(20)).await;
        let (backend, commands) = shutdown_and_drain(harness).await;

        assert_eq!(backend.single_fetches.load(Ordering::SeqCst), singles_before);
        assert_eq!(
            backend.aggregated_fetches.load(Ordering::SeqCst),
            aggregated_before
        );
        let last_view = commands
            .iter()
            .rev()
            .find_map(|command| match command {
                Command::ViewChanged(mode) => Some(*mode),
                _ => None,
            })
            .expect("a view change must be broadcast");
        assert_eq!(last_view, ViewMode::Single(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_reports_and_polling_continues() {
        let mut stub = StubBackend::new(&[1], Duration::ZERO);
        stub.fail_portfolio = true;
        let harness = start_poller(stub);
        // Across two market periods the market cycle must keep delivering
        // even though every portfolio fetch fails.
        time::sleep(Duration::from_secs(12)).await;
        let (backend, commands) = shutdown_and_drain(harness).await;

        assert!(
            commands
                .iter()
                .any(|command| matches!(command, Command::Error(_))),
            "portfolio failures must surface as errors"
        );
        let market_updates = commands
            .iter()
            .filter(|command| matches!(command, Command::MarketPrices(_)))
            .count();
        assert!(market_updates >= 2, "market cycle must keep running");
        assert!(backend.aggregated_fetches.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_portfolio_cycle_reuses_current_mode() {
        let harness = start_poller(StubBackend::new(&[3], Duration::ZERO));
        time::sleep(Duration::from_millis(20)).await;
        harness
            .control_tx
            .send(ControlCommand::SelectModel(3))
            .await
            .unwrap();
        // Two full portfolio periods while Single(3) stays selected.
        time::sleep(Duration::from_secs(25)).await;
        let (backend, commands) = shutdown_and_drain(harness).await;

        assert!(
            backend.single_fetches.load(Ordering::SeqCst) >= 3,
            "scheduled ticks must refetch the selected model"
        );
        let mut saw_single = false;
        for command in &commands {
            if let Command::SingleModel(data) = command {
                saw_single = true;
                assert_eq!(data.model_id, 3);
            }
        }
        assert!(saw_single);
    }
}

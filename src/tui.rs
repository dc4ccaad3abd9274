use std::time::{Duration, Instant};

use chrono::Utc;
use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::GraphType;
use ratatui::widgets::{Axis, Block, Chart, Clear, Dataset, Paragraph, Wrap};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::align::{self, AlignedChart};
use crate::command::{
    AppSettings, Command, ControlCommand, ConversationRecord, MarketQuote, ModelInfo,
    PortfolioSnapshot, TradeRecord, UpdateInfo,
};
use crate::config::ConfiguredTimeZone;
use crate::notes::format_release_notes;
use crate::pnl::{self, PnlClass};
use crate::view::ViewMode;

const SERIES_PALETTE: [Color; 8] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::LightBlue,
    Color::Red,
    Color::LightMagenta,
    Color::LightCyan,
];
const SIDEBAR_WIDTH: u16 = 30;
const CONTENT_CARD_HEIGHT: u16 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ContentTab {
    Positions,
    Trades,
    Conversations,
}

impl ContentTab {
    fn title(&self) -> &'static str {
        match self {
            ContentTab::Positions => "持仓",
            ContentTab::Trades => "交易记录",
            ContentTab::Conversations => "AI 对话",
        }
    }

    fn next(&self) -> ContentTab {
        match self {
            ContentTab::Positions => ContentTab::Trades,
            ContentTab::Trades => ContentTab::Conversations,
            ContentTab::Conversations => ContentTab::Positions,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SettingsField {
    Frequency,
    FeeRate,
}

#[derive(Clone, Debug)]
struct SettingsForm {
    frequency: String,
    fee_rate: String,
    active_field: SettingsField,
    error: Option<String>,
}

impl SettingsForm {
    fn from_settings(settings: &AppSettings) -> SettingsForm {
        SettingsForm {
            frequency: settings.trading_frequency_minutes.to_string(),
            fee_rate: settings.trading_fee_rate.to_string(),
            active_field: SettingsField::Frequency,
            error: None,
        }
    }

    fn toggle_field(&mut self) {
        self.active_field = match self.active_field {
            SettingsField::Frequency => SettingsField::FeeRate,
            SettingsField::FeeRate => SettingsField::Frequency,
        };
    }

    fn active_value_mut(&mut self) -> &mut String {
        match self.active_field {
            SettingsField::Frequency => &mut self.frequency,
            SettingsField::FeeRate => &mut self.fee_rate,
        }
    }

    /// Synchronous form validation; nothing is submitted on failure.
    fn validate(&self) -> Result<AppSettings, String> {
        let frequency: u32 = self
            .frequency
            .trim()
            .parse()
            .map_err(|_| "请输入有效的交易频率（1-1440分钟）".to_string())?;
        if !(1..=1440).contains(&frequency) {
            return Err("请输入有效的交易频率（1-1440分钟）".to_string());
        }
        let fee_rate: f64 = self
            .fee_rate
            .trim()
            .parse()
            .map_err(|_| "请输入有效的交易费率（0-0.01）".to_string())?;
        if !(0.0..=0.01).contains(&fee_rate) {
            return Err("请输入有效的交易费率（0-0.01）".to_string());
        }
        Ok(AppSettings {
            trading_frequency_minutes: frequency,
            trading_fee_rate: fee_rate,
        })
    }
}

pub struct TuiApp {
    control_tx: mpsc::Sender<ControlCommand>,
    timezone: ConfiguredTimeZone,
    mode: ViewMode,
    models: Vec<ModelInfo>,
    models_loaded: bool,
    selected_row: usize,
    snapshot: Option<PortfolioSnapshot>,
    chart: AlignedChart,
    trades: Vec<TradeRecord>,
    conversations: Vec<ConversationRecord>,
    quotes: Vec<(String, MarketQuote)>,
    tab: ContentTab,
    status_message: Option<String>,
    status_visible_until: Option<Instant>,
    status_is_error: bool,
    last_draw: Instant,
    min_redraw_gap: Duration,
    dirty: bool,
    settings_form: Option<SettingsForm>,
    update_modal: Option<UpdateInfo>,
    delete_target: Option<ModelInfo>,
    exit_confirmation: bool,
}

impl TuiApp {
    pub fn new(control_tx: mpsc::Sender<ControlCommand>, timezone: ConfiguredTimeZone) -> TuiApp {
        let min_redraw_gap = Duration::from_millis(100);
        TuiApp {
            control_tx,
            timezone,
            mode: ViewMode::Aggregated,
            models: Vec::new(),
            models_loaded: false,
            selected_row: 0,
            snapshot: None,
            chart: AlignedChart::default(),
            trades: Vec::new(),
            conversations: Vec::new(),
            quotes: Vec::new(),
            tab: ContentTab::Positions,
            status_message: None,
            status_visible_until: None,
            status_is_error: false,
            last_draw: Instant::now() - min_redraw_gap,
            min_redraw_gap,
            dirty: false,
            settings_form: None,
            update_modal: None,
            delete_target: None,
            exit_confirmation: false,
        }
    }

    pub fn dispose(&self) {
        ratatui::restore();
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(3));
        self.status_is_error = false;
        self.dirty = true;
    }

    fn set_error_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(5));
        self.status_is_error = true;
        self.dirty = true;
    }

    fn clear_status_if_allowed(&mut self) {
        if let Some(visible_until) = self.status_visible_until {
            if Instant::now() < visible_until {
                return;
            }
        }
        self.status_message = None;
        self.status_visible_until = None;
        self.status_is_error = false;
    }

    fn send_control(&mut self, command: ControlCommand) {
        match self.control_tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.set_error_status_message("指令队列已满，请稍后重试");
            }
            Err(TrySendError::Closed(_)) => {
                self.set_error_status_message("后台轮询已停止");
            }
        }
    }

    pub async fn run(&mut self, rx: &mut broadcast::Receiver<Command>) -> Result<()> {
        color_eyre::install()?;
        let mut terminal = ratatui::init();
        let mut input_tick = tokio::time::interval(self.min_redraw_gap);
        terminal.draw(|frame| self.render(frame))?;
        self.last_draw = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = input_tick.tick() => {
                    if self.poll_input()? {
                        return Ok(());
                    }
                    if self.dirty && self.last_draw.elapsed() >= self.min_redraw_gap {
                        terminal.draw(|frame| self.render(frame))?;
                        self.last_draw = Instant::now();
                        self.dirty = false;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(Command::Exit) => return Ok(()),
                        Ok(command) => {
                            self.clear_status_if_allowed();
                            self.handle_command(command);
                            if self.last_draw.elapsed() >= self.min_redraw_gap {
                                terminal.draw(|frame| self.render(frame))?;
                                self.last_draw = Instant::now();
                                self.dirty = false;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Models(models) => {
                self.models = models;
                self.models_loaded = true;
                self.sync_selected_row();
                self.dirty = true;
            }
            Command::ViewChanged(mode) => {
                self.mode = mode;
                // Data from the previous mode is discarded, not reinterpreted.
                self.snapshot = None;
                self.chart = AlignedChart::default();
                self.trades.clear();
                self.conversations.clear();
                self.tab = ContentTab::Positions;
                self.sync_selected_row();
                self.dirty = true;
            }
            Command::SingleModel(data) => {
                if self.mode != ViewMode::Single(data.model_id) {
                    return;
                }
                let label = self
                    .models
                    .iter()
                    .find(|model| model.id == data.model_id)
                    .map(|model| model.name.clone())
                    .unwrap_or_else(|| "账户价值".to_string());
                self.chart = align::single_model_chart(
                    label,
                    &data.history,
                    data.portfolio.total_value,
                    Utc::now().timestamp_millis(),
                );
                self.snapshot = Some(data.portfolio);
                self.trades = data.trades;
                self.conversations = data.conversations;
                self.dirty = true;
            }
            Command::Aggregated(data) => {
                if self.mode != ViewMode::Aggregated {
                    return;
                }
                self.chart = align::align_series(&data.chart);
                self.snapshot = Some(data.portfolio);
                self.dirty = true;
            }
            Command::MarketPrices(quotes) => {
                self.quotes = quotes;
                self.dirty = true;
            }
            Command::Settings(settings) => {
                self.settings_form = Some(SettingsForm::from_settings(&settings));
                self.dirty = true;
            }
            Command::SettingsSaved => {
                self.settings_form = None;
                self.set_status_message("设置保存成功");
            }
            Command::Update(info) => {
                if info.update_available {
                    self.update_modal = Some(info);
                    self.dirty = true;
                } else if let Some(error) = info.error.as_deref() {
                    self.set_error_status_message(format!("检查更新失败: {error}"));
                } else {
                    self.set_status_message("当前已是最新版本");
                }
            }
            Command::Error(message) => {
                self.set_error_status_message(message);
            }
            Command::Exit => {}
        }
    }

    fn sync_selected_row(&mut self) {
        match self.mode {
            ViewMode::Aggregated => {
                if self.selected_row > self.models.len() {
                    self.selected_row = 0;
                }
            }
            ViewMode::Single(model_id) => {
                if let Some(idx) = self.models.iter().position(|model| model.id == model_id) {
                    self.selected_row = idx + 1;
                } else {
                    self.selected_row = self.selected_row.min(self.models.len());
                }
            }
        }
    }

    fn poll_input(&mut self) -> Result<bool> {
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if self.handle_key_event(key) {
                        return Ok(true);
                    }
                }
                _ => {}
            }
        }
        Ok(false)
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> bool {
        if self.exit_confirmation {
            return self.handle_exit_confirmation_key(key);
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if let KeyCode::Char('c') = key.code {
                self.exit_confirmation = true;
                self.dirty = true;
                return false;
            }
        }
        if self.settings_form.is_some() {
            self.handle_settings_key(key);
            return false;
        }
        if self.update_modal.is_some() {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q')) {
                self.update_modal = None;
                self.dirty = true;
            }
            return false;
        }
        if self.delete_target.is_some() {
            self.handle_delete_confirmation_key(key);
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.exit_confirmation = true;
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_row = self.selected_row.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected_row < self.models.len() {
                    self.selected_row += 1;
                }
            }
            KeyCode::Enter => {
                if self.selected_row == 0 {
                    self.send_control(ControlCommand::SelectAggregated);
                } else if let Some(model) = self.models.get(self.selected_row - 1) {
                    let model_id = model.id;
                    self.send_control(ControlCommand::SelectModel(model_id));
                }
            }
            KeyCode::Char('a') => {
                self.selected_row = 0;
                self.send_control(ControlCommand::SelectAggregated);
            }
            KeyCode::Char('d') => {
                if self.selected_row > 0 {
                    self.delete_target = self.models.get(self.selected_row - 1).cloned();
                }
            }
            KeyCode::Char('r') => {
                self.send_control(ControlCommand::Refresh);
                self.set_status_message("正在刷新...");
            }
            KeyCode::Char('s') => {
                self.send_control(ControlCommand::LoadSettings);
            }
            KeyCode::Char('u') => {
                self.send_control(ControlCommand::CheckUpdate);
                self.set_status_message("正在检查更新...");
            }
            KeyCode::Tab => {
                if self.mode.model_id().is_some() {
                    self.tab = self.tab.next();
                }
            }
            KeyCode::Char('1') => self.tab = ContentTab::Positions,
            KeyCode::Char('2') => self.tab = ContentTab::Trades,
            KeyCode::Char('3') => self.tab = ContentTab::Conversations,
            _ => return false,
        }
        self.dirty = true;
        false
    }

    fn handle_exit_confirmation_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter | KeyCode::Char('q')
            | KeyCode::Char('Q') => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.exit_confirmation = false;
                self.dirty = true;
            }
            _ => {}
        }
        false
    }

    fn handle_delete_confirmation_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                if let Some(model) = self.delete_target.take() {
                    self.send_control(ControlCommand::DeleteModel(model.id));
                    self.set_status_message(format!("正在删除模型 {}...", model.name));
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.delete_target = None;
                self.dirty = true;
            }
            _ => {}
        }
    }

    fn handle_settings_key(&mut self, key: KeyEvent) {
        let Some(form) = self.settings_form.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc => {
                self.settings_form = None;
            }
            KeyCode::Tab | KeyCode::Up | KeyCode::Down => {
                form.toggle_field();
            }
            KeyCode::Backspace => {
                form.active_value_mut().pop();
                form.error = None;
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => {
                form.active_value_mut().push(c);
                form.error = None;
            }
            KeyCode::Enter => match form.validate() {
                Ok(settings) => {
                    self.send_control(ControlCommand::SaveSettings(settings));
                }
                Err(message) => {
                    form.error = Some(message);
                }
            },
            _ => {}
        }
        self.dirty = true;
    }

    fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let has_status = self.status_message.is_some() && area.height >= 8;
        let (main_area, status_area) = if has_status {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(5), Constraint::Length(3)])
                .split(area);
            (chunks[0], Some(chunks[1]))
        } else {
            (area, None)
        };
        self.render_dashboard(frame, main_area);
        if let Some(status_area) = status_area {
            self.render_status(frame, status_area);
        }
        if let Some(form) = self.settings_form.clone() {
            self.render_settings_form(frame, &form);
        }
        if let Some(info) = self.update_modal.clone() {
            self.render_update_modal(frame, &info);
        }
        if let Some(target) = self.delete_target.clone() {
            self.render_delete_confirmation(frame, &target);
        }
        if self.exit_confirmation {
            self.render_exit_confirmation(frame);
        }
    }

    fn render_dashboard(&self, frame: &mut Frame, area: Rect) {
        if area.width < 40 || area.height < 8 {
            self.render_chart_panel(frame, area);
            return;
        }
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(30)])
            .split(area);
        self.render_sidebar(frame, columns[0]);
        self.render_main_column(frame, columns[1]);
    }

    fn render_sidebar(&self, frame: &mut Frame, area: Rect) {
        let market_height = if area.height >= 20 { 12 } else { 0 };
        if market_height > 0 {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(6), Constraint::Length(market_height)])
                .split(area);
            self.render_model_list(frame, chunks[0]);
            self.render_market_panel(frame, chunks[1]);
        } else {
            self.render_model_list(frame, area);
        }
    }

    fn render_model_list(&self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered().title("模型列表");
        let inner_height = area.height.saturating_sub(2) as usize;
        let mut lines = Vec::new();
        if !self.models_loaded {
            lines.push(Line::from("加载中..."));
        } else if self.models.is_empty() {
            lines.push(Line::from("暂无模型"));
        } else {
            let total_rows = self.models.len() + 1;
            let selected = clamp_index(self.selected_row, total_rows);
            let (start, end) = visible_range(total_rows, inner_height.max(1), selected);
            for row in start..end {
                if row == 0 {
                    let active = self.mode == ViewMode::Aggregated;
                    let marker = if active { "● " } else { "  " };
                    lines.push(Line::from(Span::styled(
                        format!("{marker}聚合视图 · 所有模型汇总"),
                        row_style(row == selected),
                    )));
                } else {
                    let model = &self.models[row - 1];
                    let active = self.mode == ViewMode::Single(model.id);
                    let marker = if active { "● " } else { "  " };
                    let label = format!("{marker}{} ({})", model.name, model.model_name);
                    lines.push(Line::from(Span::styled(
                        clip_to_width(&label, area.width.saturating_sub(2) as usize),
                        row_style(row == selected),
                    )));
                }
            }
        }
        let paragraph = Paragraph::new(lines).block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_market_panel(&self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered().title("行情");
        let mut lines = Vec::new();
        if self.quotes.is_empty() {
            lines.push(Line::from("暂无行情数据"));
        } else {
            let visible = (area.height.saturating_sub(2) as usize).max(1);
            for (coin, quote) in self.quotes.iter().take(visible) {
                let change_color = if quote.change_24h >= 0.0 {
                    Color::Green
                } else {
                    Color::Red
                };
                lines.push(Line::from(vec![
                    Span::styled(
                        format_column_value(coin, ColumnAlign::Left, 8),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(format_column_value(
                        &pnl::format_price(quote.price),
                        ColumnAlign::Right,
                        12,
                    )),
                    Span::raw(" "),
                    Span::styled(pnl::format_change_24h(quote.change_24h), Style::default().fg(change_color)),
                ]));
            }
        }
        let paragraph = Paragraph::new(lines).block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_main_column(&self, frame: &mut Frame, area: Rect) {
        let show_content = self.mode.model_id().is_some() && area.height >= 20;
        let constraints = if show_content {
            vec![
                Constraint::Length(4),
                Constraint::Min(8),
                Constraint::Length(CONTENT_CARD_HEIGHT),
            ]
        } else {
            vec![Constraint::Length(4), Constraint::Min(8)]
        };
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(area);
        self.render_stats(frame, chunks[0]);
        self.render_chart_panel(frame, chunks[1]);
        if show_content {
            self.render_content_card(frame, chunks[2]);
        }
    }

    fn stats_title(&self) -> String {
        match self.mode {
            ViewMode::Aggregated => "聚合账户总览".to_string(),
            ViewMode::Single(model_id) => {
                let name = self
                    .models
                    .iter()
                    .find(|model| model.id == model_id)
                    .map(|model| model.name.as_str())
                    .unwrap_or("账户信息");
                format!("账户信息 · {name}")
            }
        }
    }

    fn render_stats(&self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered().title(self.stats_title());
        let line = match &self.snapshot {
            Some(snapshot) => {
                let cells = [
                    ("总资产", snapshot.total_value, false),
                    ("现金", snapshot.cash, false),
                    ("已实现盈亏", snapshot.realized_pnl, true),
                    ("未实现盈亏", snapshot.unrealized_pnl, true),
                ];
                let mut spans = Vec::new();
                for (idx, (label, value, signed)) in cells.iter().enumerate() {
                    if idx > 0 {
                        spans.push(Span::raw("   "));
                    }
                    spans.push(Span::styled(
                        format!("{label} "),
                        Style::default().fg(Color::Gray),
                    ));
                    spans.push(Span::styled(
                        pnl::format_signed(*value, *signed),
                        Style::default()
                            .fg(class_color(pnl::classify(*value, *signed)))
                            .add_modifier(Modifier::BOLD),
                    ));
                }
                Line::from(spans)
            }
            None => Line::from("等待数据..."),
        };
        let paragraph = Paragraph::new(vec![line])
            .alignment(Alignment::Left)
            .block(block);
        frame.render_widget(paragraph, area);
    }

    fn chart_title(&self) -> &'static str {
        match self.mode {
            ViewMode::Aggregated => "模型表现对比",
            ViewMode::Single(_) => "账户价值",
        }
    }

    fn render_chart_panel(&self, frame: &mut Frame, area: Rect) {
        if self.chart.is_empty() {
            let reason = if self.models_loaded && self.models.is_empty() {
                "暂无模型数据"
            } else {
                "暂无数据"
            };
            self.render_empty_state(frame, area, reason);
            return;
        }
        let axis = &self.chart.axis;
        let mut raw_min_y = f64::INFINITY;
        let mut raw_max_y = f64::NEG_INFINITY;
        let mut plotted: Vec<(String, Color, Vec<(f64, f64)>)> = Vec::new();
        for (idx, series) in self.chart.series.iter().enumerate() {
            let color = SERIES_PALETTE[idx % SERIES_PALETTE.len()];
            // Gap markers are skipped here; the line widget connects the
            // surviving points, which is exactly the bridge-the-gap policy.
            let points: Vec<(f64, f64)> = axis
                .iter()
                .zip(series.values.iter())
                .filter_map(|(ts, value)| value.map(|value| (*ts as f64, value)))
                .collect();
            for (_, y) in &points {
                raw_min_y = raw_min_y.min(*y);
                raw_max_y = raw_max_y.max(*y);
            }
            plotted.push((series.label.clone(), color, points));
        }
        let (y_min, y_max) = if !raw_min_y.is_finite() || !raw_max_y.is_finite() {
            (0.0, 1.0)
        } else if (raw_max_y - raw_min_y).abs() < f64::EPSILON {
            let padding = (raw_max_y.abs() * 0.05).max(1.0);
            (raw_min_y - padding, raw_max_y + padding)
        } else {
            let padding = (raw_max_y - raw_min_y) * 0.05;
            (raw_min_y - padding, raw_max_y + padding)
        };
        let first_ts = *axis.first().unwrap_or(&0);
        let last_ts = *axis.last().unwrap_or(&0);
        let x_bounds = if first_ts < last_ts {
            [first_ts as f64, last_ts as f64]
        } else {
            [first_ts as f64 - 1.0, last_ts as f64 + 1.0]
        };
        let mid_ts = axis[axis.len() / 2];
        let x_labels = vec![
            Span::styled(
                self.timezone.time_label(first_ts),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(self.timezone.time_label(mid_ts)),
            Span::styled(
                self.timezone.time_label(last_ts),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ];
        let y_mid = f64::midpoint(y_min, y_max);
        let y_labels = vec![
            Span::styled(
                format!("${y_min:.2}"),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("${y_mid:.2}")),
            Span::styled(
                format!("${y_max:.2}"),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ];
        let datasets: Vec<Dataset> = plotted
            .iter()
            .map(|(label, color, points)| {
                Dataset::default()
                    .name(label.clone())
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(*color))
                    .data(points.as_slice())
            })
            .collect();
        let chart = Chart::new(datasets)
            .block(Block::bordered().title(self.chart_title()))
            .x_axis(
                Axis::default()
                    .title("Time")
                    .style(Style::default().fg(Color::Gray))
                    .labels(x_labels)
                    .labels_alignment(Alignment::Left)
                    .bounds(x_bounds),
            )
            .y_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .labels(y_labels)
                    .bounds([y_min, y_max]),
            );
        frame.render_widget(chart, area);
    }

    fn render_empty_state(&self, frame: &mut Frame, area: Rect, reason: &str) {
        let block = Block::bordered().title(self.chart_title());
        let vertical_pad = area.height.saturating_sub(3) / 2;
        let mut lines = vec![Line::from(""); vertical_pad as usize];
        lines.push(Line::from(Span::styled(
            reason.to_string(),
            Style::default().fg(Color::Gray),
        )));
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_content_card(&self, frame: &mut Frame, area: Rect) {
        let tabs_line = {
            let mut spans = Vec::new();
            for (idx, tab) in [
                ContentTab::Positions,
                ContentTab::Trades,
                ContentTab::Conversations,
            ]
            .iter()
            .enumerate()
            {
                if idx > 0 {
                    spans.push(Span::raw(" | "));
                }
                let style = if *tab == self.tab {
                    Style::default()
                        .fg(Color::LightCyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Gray)
                };
                spans.push(Span::styled(format!("{}.{}", idx + 1, tab.title()), style));
            }
            Line::from(spans)
        };
        let visible = area.height.saturating_sub(3) as usize;
        let mut lines = vec![tabs_line];
        match self.tab {
            ContentTab::Positions => self.positions_lines(&mut lines, visible),
            ContentTab::Trades => self.trades_lines(&mut lines, visible),
            ContentTab::Conversations => self.conversation_lines(&mut lines, visible),
        }
        let paragraph = Paragraph::new(lines).block(Block::bordered().title("明细"));
        frame.render_widget(paragraph, area);
    }

    fn positions_lines(&self, lines: &mut Vec<Line<'static>>, visible: usize) {
        let positions = self
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.positions.as_slice())
            .unwrap_or(&[]);
        if positions.is_empty() {
            let message = match self.mode {
                ViewMode::Aggregated => "聚合视图暂无持仓",
                ViewMode::Single(_) => "暂无持仓",
            };
            lines.push(Line::from(message));
            return;
        }
        lines.push(Line::from(format_columns(&[
            ("币种", ColumnAlign::Left, 8),
            ("方向", ColumnAlign::Left, 4),
            ("数量", ColumnAlign::Right, 12),
            ("均价", ColumnAlign::Right, 12),
            ("现价", ColumnAlign::Right, 12),
            ("杠杆", ColumnAlign::Right, 6),
            ("盈亏", ColumnAlign::Right, 12),
        ])));
        for position in positions.iter().take(visible.saturating_sub(1)) {
            let current_label = position
                .current_price
                .map(pnl::format_price)
                .unwrap_or_else(|| "-".to_string());
            let (pnl_label, pnl_class) = match position.pnl {
                Some(value) if value != 0.0 => {
                    (pnl::format_signed(value, true), pnl::classify(value, true))
                }
                _ => ("-".to_string(), PnlClass::Neutral),
            };
            let side_color = match position.side {
                crate::command::PositionSide::Long => Color::Green,
                crate::command::PositionSide::Short => Color::Red,
            };
            lines.push(Line::from(vec![
                Span::raw(format_column_value(&position.coin, ColumnAlign::Left, 8)),
                Span::raw(" "),
                Span::styled(
                    format_column_value(position.side.label(), ColumnAlign::Left, 4),
                    Style::default().fg(side_color),
                ),
                Span::raw(" "),
                Span::raw(format_column_value(
                    &pnl::format_quantity(position.quantity),
                    ColumnAlign::Right,
                    12,
                )),
                Span::raw(" "),
                Span::raw(format_column_value(
                    &pnl::format_price(position.avg_price),
                    ColumnAlign::Right,
                    12,
                )),
                Span::raw(" "),
                Span::raw(format_column_value(&current_label, ColumnAlign::Right, 12)),
                Span::raw(" "),
                Span::raw(format_column_value(
                    &format!("{}x", position.leverage),
                    ColumnAlign::Right,
                    6,
                )),
                Span::raw(" "),
                Span::styled(
                    format_column_value(&pnl_label, ColumnAlign::Right, 12),
                    Style::default()
                        .fg(class_color(pnl_class))
                        .add_modifier(Modifier::BOLD),
                ),
            ]));
        }
    }

    fn trades_lines(&self, lines: &mut Vec<Line<'static>>, visible: usize) {
        if self.trades.is_empty() {
            lines.push(Line::from("暂无交易记录"));
            return;
        }
        lines.push(Line::from(format_columns(&[
            ("时间", ColumnAlign::Left, 14),
            ("币种", ColumnAlign::Left, 8),
            ("信号", ColumnAlign::Left, 6),
            ("数量", ColumnAlign::Right, 12),
            ("价格", ColumnAlign::Right, 12),
            ("盈亏", ColumnAlign::Right, 12),
            ("手续费", ColumnAlign::Right, 10),
        ])));
        for trade in self.trades.iter().take(visible.saturating_sub(1)) {
            let pnl_class = pnl::classify(trade.pnl, true);
            lines.push(Line::from(vec![
                Span::raw(format_column_value(
                    &self.timezone.datetime_label(trade.ts),
                    ColumnAlign::Left,
                    14,
                )),
                Span::raw(" "),
                Span::raw(format_column_value(&trade.coin, ColumnAlign::Left, 8)),
                Span::raw(" "),
                Span::raw(format_column_value(
                    trade.signal.label(),
                    ColumnAlign::Left,
                    6,
                )),
                Span::raw(" "),
                Span::raw(format_column_value(
                    &pnl::format_quantity(trade.quantity),
                    ColumnAlign::Right,
                    12,
                )),
                Span::raw(" "),
                Span::raw(format_column_value(
                    &pnl::format_price(trade.price),
                    ColumnAlign::Right,
                    12,
                )),
                Span::raw(" "),
                Span::styled(
                    format_column_value(
                        &pnl::format_signed(trade.pnl, true),
                        ColumnAlign::Right,
                        12,
                    ),
                    Style::default().fg(class_color(pnl_class)),
                ),
                Span::raw(" "),
                Span::raw(format_column_value(
                    &pnl::format_price(trade.fee),
                    ColumnAlign::Right,
                    10,
                )),
            ]));
        }
    }

    fn conversation_lines(&self, lines: &mut Vec<Line<'static>>, visible: usize) {
        if self.conversations.is_empty() {
            lines.push(Line::from("暂无对话记录"));
            return;
        }
        let mut remaining = visible;
        for conversation in &self.conversations {
            if remaining < 2 {
                break;
            }
            lines.push(Line::from(Span::styled(
                self.timezone.datetime_label(conversation.ts),
                Style::default().fg(Color::Gray),
            )));
            let preview = conversation.ai_response.replace('\n', " ");
            lines.push(Line::from(clip_to_width(&preview, 120)));
            remaining -= 2;
        }
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        if let Some(message) = &self.status_message {
            let color = if self.status_is_error {
                Color::Red
            } else {
                Color::Yellow
            };
            let block = Block::bordered().title("Status");
            let status = Paragraph::new(message.as_str())
                .style(Style::default().fg(color))
                .alignment(Alignment::Left)
                .block(block);
            frame.render_widget(status, area);
        }
    }

    fn render_settings_form(&self, frame: &mut Frame, form: &SettingsForm) {
        let area = frame.area();
        let Some(popup) = popup_rect(area, 46, 8) else {
            return;
        };
        let field_line = |label: &str, value: &str, active: bool| {
            let marker = if active { "▶ " } else { "  " };
            Line::from(vec![
                Span::raw(marker.to_string()),
                Span::styled(format!("{label}: "), Style::default().fg(Color::Gray)),
                Span::styled(
                    format!("{value}_"),
                    if active {
                        Style::default().add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    },
                ),
            ])
        };
        let mut lines = vec![
            field_line(
                "交易频率(分钟)",
                &form.frequency,
                form.active_field == SettingsField::Frequency,
            ),
            field_line(
                "交易费率",
                &form.fee_rate,
                form.active_field == SettingsField::FeeRate,
            ),
            Line::from(""),
            Line::from("Tab 切换 · Enter 保存 · Esc 取消"),
        ];
        if let Some(error) = &form.error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            )));
        }
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .block(Block::bordered().title("系统设置"));
        frame.render_widget(Clear, popup);
        frame.render_widget(paragraph, popup);
    }

    fn render_update_modal(&self, frame: &mut Frame, info: &UpdateInfo) {
        let area = frame.area();
        let height = area.height.saturating_sub(6).clamp(8, 20);
        let Some(popup) = popup_rect(area, 64, height) else {
            return;
        };
        let mut lines = vec![
            Line::from(vec![
                Span::styled("当前版本 ", Style::default().fg(Color::Gray)),
                Span::raw(format!("v{}", info.current_version)),
                Span::raw("   "),
                Span::styled("最新版本 ", Style::default().fg(Color::Gray)),
                Span::styled(
                    format!("v{}", info.latest_version),
                    Style::default()
                        .fg(Color::Green)
                        .add_modifier(Modifier::BOLD),
                ),
            ]),
            Line::from(""),
        ];
        match info.release_notes.as_deref() {
            Some(raw_notes) => {
                lines.extend(markup_lines(&format_release_notes(raw_notes)));
            }
            None => lines.push(Line::from("暂无更新说明")),
        }
        if let Some(url) = info.release_url.as_deref() {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                url.to_string(),
                Style::default().fg(Color::Blue),
            )));
        }
        lines.push(Line::from(""));
        lines.push(Line::from("Esc/Enter 关闭"));
        let paragraph = Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(Block::bordered().title("发现新版本"));
        frame.render_widget(Clear, popup);
        frame.render_widget(paragraph, popup);
    }

    fn render_delete_confirmation(&self, frame: &mut Frame, target: &ModelInfo) {
        let area = frame.area();
        let Some(popup) = popup_rect(area, 44, 6) else {
            return;
        };
        let lines = vec![
            Line::from(Span::styled(
                format!("确定要删除模型 {} 吗？", target.name),
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from("删除后历史数据不可恢复"),
            Line::from("Y/Enter 确认删除 · N/Esc 取消"),
        ];
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .block(Block::bordered().title("删除模型"));
        frame.render_widget(Clear, popup);
        frame.render_widget(paragraph, popup);
    }

    fn render_exit_confirmation(&self, frame: &mut Frame) {
        let area = frame.area();
        let Some(popup) = popup_rect(area, 40, 6) else {
            return;
        };
        let lines = vec![
            Line::from(Span::styled(
                "确定要退出仪表盘？",
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from("Y/Enter 确认退出 · N/Esc 取消"),
            Line::from("再次按 q/Q 也可确认 · Ctrl+C 立即退出"),
        ];
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .block(Block::bordered().title("确认退出"));
        frame.render_widget(Clear, popup);
        frame.render_widget(paragraph, popup);
    }
}

fn popup_rect(area: Rect, width: u16, height: u16) -> Option<Rect> {
    if area.width < 24 || area.height < 5 {
        return None;
    }
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height.saturating_sub(2));
    let left = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let top = area.y + (area.height.saturating_sub(popup_height)) / 2;
    Some(Rect::new(left, top, popup_width, popup_height))
}

fn class_color(class: PnlClass) -> Color {
    match class {
        PnlClass::Positive => Color::Green,
        PnlClass::Negative => Color::Red,
        PnlClass::Neutral => Color::White,
    }
}

/// Converts formatter markup into styled terminal lines.
fn markup_lines(markup: &str) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for raw in markup.split('\n') {
        let mut text = raw;
        if let Some(rest) = text.strip_prefix("<p>") {
            text = rest;
        }
        let mut paragraph_end = false;
        if let Some(rest) = text.strip_suffix("</p>") {
            text = rest;
            paragraph_end = true;
        }
        if let Some(inner) = strip_wrapped(text, "<h1>", "</h1>")
            .or_else(|| strip_wrapped(text, "<h2>", "</h2>"))
            .or_else(|| strip_wrapped(text, "<h3>", "</h3>"))
        {
            lines.push(Line::from(Span::styled(
                strip_inline_tags(inner),
                Style::default().add_modifier(Modifier::BOLD),
            )));
        } else if let Some(inner) = strip_wrapped(text, "<ul>", "</ul>") {
            for item in inner.split("</li>") {
                if let Some(item) = item.strip_prefix("<li>") {
                    lines.push(Line::from(format!("• {}", strip_inline_tags(item))));
                }
            }
        } else {
            lines.push(Line::from(strip_inline_tags(text)));
        }
        if paragraph_end {
            lines.push(Line::from(""));
        }
    }
    lines
}

fn strip_wrapped<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    text.strip_prefix(open)?.strip_suffix(close)
}

fn strip_inline_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => break,
        }
    }
    out.push_str(rest);
    out
}

#[derive(Clone, Copy)]
enum ColumnAlign {
    Left,
    Right,
}

fn row_style(selected: bool) -> Style {
    if selected {
        Style::default()
            .bg(Color::LightCyan)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    }
}

fn format_columns(columns: &[(&str, ColumnAlign, usize)]) -> String {
    let mut row = String::new();
    for (idx, (value, align, width)) in columns.iter().enumerate() {
        row.push_str(&format_column_value(value, *align, *width));
        if idx + 1 != columns.len() {
            row.push(' ');
        }
    }
    row
}

fn format_column_value(value: &str, align: ColumnAlign, width: usize) -> String {
    let clipped = clip_to_width(value, width);
    pad_to_width(&clipped, width, align)
}

fn clip_to_width(value: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(value) <= width {
        return value.to_string();
    }
    let mut result = String::new();
    let mut remaining = width.saturating_sub(1);
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if ch_width > remaining {
            break;
        }
        result.push(ch);
        remaining = remaining.saturating_sub(ch_width);
    }
    result.push('…');
    result
}

fn pad_to_width(value: &str, width: usize, align: ColumnAlign) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    let padding = " ".repeat(width - current);
    match align {
        ColumnAlign::Left => format!("{value}{padding}"),
        ColumnAlign::Right => format!("{padding}{value}"),
    }
}

fn clamp_index(idx: usize, len: usize) -> usize {
    if len == 0 { 0 } else { idx.min(len - 1) }
}

fn visible_range(len: usize, visible: usize, selected: usize) -> (usize, usize) {
    if len == 0 || visible == 0 {
        return (0, 0);
    }
    if len <= visible {
        return (0, len);
    }
    let max_start = len - visible;
    let clamped = clamp_index(selected, len);
    let start = clamped.min(max_start);
    (start, start + visible)
}

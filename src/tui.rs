use crate::api::PortfolioApi;
use crate::commands::{fetch_holdings, HoldingsScope};
use crate::config::Config;
use crate::holdings::{AggregatedPosition, Holdings, SortDirection, SortKey};
use crate::models::{Portfolio, SearchItem, Stock, Watchlist, WatchlistItem};
use crate::search::{spawn_search_worker, SearchRequest, SearchStatus, StockSearch, Typeahead};
use crate::session::{Theme, WatchlistSelection};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, Tabs, Wrap},
    Frame, Terminal,
};
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tui_big_text::{BigText, PixelSize};

fn currency_symbol(currency: &str) -> Option<&'static str> {
    match currency {
        "INR" => Some("₹"),
        "USD" => Some("$"),
        "EUR" => Some("€"),
        "GBP" => Some("£"),
        _ => None,
    }
}

fn format_with_commas(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (integer_part, decimal_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));

    let mut grouped = String::with_capacity(integer_part.len() + integer_part.len() / 3);
    for (i, c) in integer_part.chars().enumerate() {
        if i > 0 && (integer_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if value < 0.0 && formatted != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{decimal_part}")
}

fn format_money(value: f64, currency: &str) -> String {
    match currency_symbol(currency) {
        Some(symbol) if value < 0.0 => format!("-{symbol}{}", format_with_commas(-value)),
        Some(symbol) => format!("{symbol}{}", format_with_commas(value)),
        None => format!("{} {currency}", format_with_commas(value)),
    }
}

fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 {
        format!("{quantity:.0}")
    } else {
        format!("{quantity:.3}")
    }
}

fn format_opt(value: Option<f64>, f: impl Fn(f64) -> String) -> String {
    value.map(f).unwrap_or_else(|| "N/A".to_string())
}

fn format_percent(value: f64) -> String {
    format!("{value:+.2}%")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tab {
    Positions,
    Funds,
    Watchlist,
}

impl Tab {
    fn title(self) -> &'static str {
        match self {
            Tab::Positions => "Positions",
            Tab::Funds => "Mutual Funds",
            Tab::Watchlist => "Watchlist",
        }
    }

    fn all() -> &'static [Tab] {
        &[Tab::Positions, Tab::Funds, Tab::Watchlist]
    }
}

impl FromStr for Tab {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positions" | "stocks" => Ok(Tab::Positions),
            "funds" | "mf" | "mutual-funds" => Ok(Tab::Funds),
            "watchlist" => Ok(Tab::Watchlist),
            _ => Err(format!("Unknown tab: '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppMode {
    Normal,
    History,
    Search,
}

/// Work for the background loader.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Reload { seq: u64 },
    Items { seq: u64, watchlist_id: String },
    Watch { watchlist_id: String, ticker: String },
}

/// What a key press asks the event loop to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Fetch(Request),
    Search(SearchRequest),
}

/// Results sent back by the background loader.
#[derive(Debug)]
pub enum Update {
    Holdings {
        seq: u64,
        tab: Tab,
        result: Result<Holdings, String>,
    },
    Watchlists {
        seq: u64,
        result: Result<Vec<Watchlist>, String>,
    },
    Items {
        seq: u64,
        watchlist_id: String,
        result: Result<Vec<WatchlistItem>, String>,
    },
    Watched {
        watchlist_id: String,
        ticker: String,
        result: Result<(), String>,
    },
}

struct Palette {
    text: Color,
    muted: Color,
    accent: Color,
    selected_bg: Color,
    gain: Color,
    loss: Color,
}

impl Palette {
    fn for_theme(theme: Theme) -> Palette {
        match theme {
            Theme::Dark => Palette {
                text: Color::White,
                muted: Color::Gray,
                accent: Color::Yellow,
                selected_bg: Color::DarkGray,
                gain: Color::Green,
                loss: Color::Red,
            },
            Theme::Light => Palette {
                text: Color::Black,
                muted: Color::DarkGray,
                accent: Color::Blue,
                selected_bg: Color::Gray,
                gain: Color::Green,
                loss: Color::Red,
            },
        }
    }

    fn signed(&self, value: Option<f64>) -> Color {
        match value {
            Some(v) if v > 0.0 => self.gain,
            Some(v) if v < 0.0 => self.loss,
            _ => self.text,
        }
    }
}

pub struct App {
    pub current_tab: Tab,
    pub mode: AppMode,
    pub should_quit: bool,
    pub portfolio: Portfolio,
    pub currency: String,
    pub theme: Theme,
    pub stocks: Option<Holdings>,
    pub funds: Option<Holdings>,
    pub watchlists: Vec<Watchlist>,
    pub watchlist: WatchlistSelection,
    pub items: Option<Vec<WatchlistItem>>,
    pub sort: SortKey,
    pub direction: SortDirection,
    pub selected: usize,
    pub error_message: Option<String>,
    pub status_message: Option<String>,
    pub search: Typeahead<Stock>,
    pub last_refresh: Instant,
    reload_seq: u64,
    items_seq: u64,
}

impl App {
    pub fn new(portfolio: Portfolio, currency: String, theme: Theme, min_query_len: usize) -> App {
        App {
            current_tab: Tab::Positions,
            mode: AppMode::Normal,
            should_quit: false,
            portfolio,
            currency,
            theme,
            stocks: None,
            funds: None,
            watchlists: Vec::new(),
            watchlist: WatchlistSelection::default(),
            items: None,
            sort: SortKey::Invested,
            direction: SortDirection::Descending,
            selected: 0,
            error_message: None,
            status_message: None,
            search: Typeahead::new(min_query_len),
            last_refresh: Instant::now(),
            reload_seq: 0,
            items_seq: 0,
        }
    }

    /// Start a full refresh. Results from earlier refreshes are ignored.
    pub fn reload(&mut self) -> Request {
        self.reload_seq += 1;
        self.last_refresh = Instant::now();
        Request::Reload {
            seq: self.reload_seq,
        }
    }

    fn request_items(&mut self) -> Option<Request> {
        let watchlist_id = self.watchlist.current_id()?.to_string();
        self.items_seq += 1;
        Some(Request::Items {
            seq: self.items_seq,
            watchlist_id,
        })
    }

    /// Fold a loader result into the state. Stale results are dropped.
    pub fn apply(&mut self, update: Update) -> Option<Request> {
        match update {
            Update::Holdings { seq, tab, result } => {
                if seq != self.reload_seq {
                    debug!(seq, latest = self.reload_seq, "dropping stale holdings");
                    return None;
                }
                match result {
                    Ok(holdings) => match tab {
                        Tab::Funds => self.funds = Some(holdings),
                        _ => self.stocks = Some(holdings),
                    },
                    Err(e) => self.error_message = Some(format!("{}: {e}", tab.title())),
                }
                self.clamp_selection();
                None
            }
            Update::Watchlists { seq, result } => {
                if seq != self.reload_seq {
                    return None;
                }
                match result {
                    Ok(watchlists) => {
                        self.watchlists = watchlists;
                        self.watchlist.resolve(&self.watchlists);
                        if self.watchlist.current_id().is_none() {
                            self.items = Some(Vec::new());
                        }
                        self.request_items()
                    }
                    Err(e) => {
                        self.error_message = Some(format!("Watchlists: {e}"));
                        None
                    }
                }
            }
            Update::Items {
                seq,
                watchlist_id,
                result,
            } => {
                if seq != self.items_seq || self.watchlist.current_id() != Some(watchlist_id.as_str()) {
                    debug!(%watchlist_id, "dropping items for a watchlist no longer selected");
                    return None;
                }
                match result {
                    Ok(items) => self.items = Some(items),
                    Err(e) => {
                        self.error_message = Some(format!("Watchlist: {e}"));
                        self.items = Some(Vec::new());
                    }
                }
                self.clamp_selection();
                None
            }
            Update::Watched {
                watchlist_id,
                ticker,
                result,
            } => match result {
                Ok(()) => {
                    let name = self
                        .watchlists
                        .iter()
                        .find(|w| w.watchlist_id == watchlist_id)
                        .map(|w| w.name.as_str())
                        .unwrap_or("watchlist");
                    self.status_message = Some(format!("Added {ticker} to {name}"));
                    if self.watchlist.current_id() == Some(watchlist_id.as_str()) {
                        self.request_items()
                    } else {
                        None
                    }
                }
                Err(e) => {
                    self.error_message = Some(format!("Could not add {ticker}: {e}"));
                    None
                }
            },
        }
    }

    pub fn current_watchlist(&self) -> Option<&Watchlist> {
        let id = self.watchlist.current_id()?;
        self.watchlists.iter().find(|w| w.watchlist_id == id)
    }

    /// Move to the next watchlist. The old rows are cleared right away.
    pub fn cycle_watchlist(&mut self) -> Option<Request> {
        if self.watchlists.len() < 2 {
            return None;
        }
        let index = self
            .watchlist
            .current_id()
            .and_then(|id| self.watchlists.iter().position(|w| w.watchlist_id == id))
            .unwrap_or(0);
        let next = self.watchlists[(index + 1) % self.watchlists.len()].watchlist_id.clone();
        self.watchlist.select(&next);
        self.items = None;
        self.selected = 0;
        self.request_items()
    }

    pub fn next_tab(&mut self) {
        let tabs = Tab::all();
        let current_index = tabs
            .iter()
            .position(|&t| t == self.current_tab)
            .unwrap_or(0);
        self.set_tab(tabs[(current_index + 1) % tabs.len()]);
    }

    pub fn previous_tab(&mut self) {
        let tabs = Tab::all();
        let current_index = tabs
            .iter()
            .position(|&t| t == self.current_tab)
            .unwrap_or(0);
        self.set_tab(tabs[(current_index + tabs.len() - 1) % tabs.len()]);
    }

    fn set_tab(&mut self, tab: Tab) {
        if tab != self.current_tab {
            self.current_tab = tab;
            self.selected = 0;
        }
    }

    fn current_holdings(&self) -> Option<&Holdings> {
        match self.current_tab {
            Tab::Positions => self.stocks.as_ref(),
            Tab::Funds => self.funds.as_ref(),
            Tab::Watchlist => None,
        }
    }

    fn row_count(&self) -> usize {
        match self.current_tab {
            Tab::Watchlist => self.items.as_ref().map_or(0, Vec::len),
            _ => self.current_holdings().map_or(0, Holdings::len),
        }
    }

    fn clamp_selection(&mut self) {
        self.selected = self.selected.min(self.row_count().saturating_sub(1));
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.row_count() {
            self.selected += 1;
        }
    }

    pub fn select_previous(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// The highlighted row of the Positions or Mutual Funds table.
    pub fn selected_position(&self) -> Option<&AggregatedPosition> {
        self.current_holdings()?
            .sorted(self.sort, self.direction)
            .get(self.selected)
            .copied()
    }

    pub fn on_key(&mut self, code: KeyCode) -> Option<Action> {
        if self.error_message.take().is_some() {
            return None;
        }
        match self.mode {
            AppMode::Normal => self.on_normal_key(code),
            AppMode::History => {
                if matches!(code, KeyCode::Esc | KeyCode::Char('h') | KeyCode::Char('q') | KeyCode::Enter) {
                    self.mode = AppMode::Normal;
                }
                None
            }
            AppMode::Search => self.on_search_key(code),
        }
    }

    fn on_normal_key(&mut self, code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('l') | KeyCode::Right | KeyCode::Tab => self.next_tab(),
            KeyCode::Left | KeyCode::BackTab => self.previous_tab(),
            KeyCode::Char('1') => self.set_tab(Tab::Positions),
            KeyCode::Char('2') => self.set_tab(Tab::Funds),
            KeyCode::Char('3') => self.set_tab(Tab::Watchlist),
            KeyCode::Char('j') | KeyCode::Down => self.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.select_previous(),
            KeyCode::Char('s') => {
                self.sort = self.sort.next();
                self.selected = 0;
            }
            KeyCode::Char('S') => self.direction = self.direction.toggle(),
            KeyCode::Char('h') => {
                if self.selected_position().is_some() {
                    self.mode = AppMode::History;
                }
            }
            KeyCode::Char('w') => return self.cycle_watchlist().map(Action::Fetch),
            KeyCode::Char('r') => return Some(Action::Fetch(self.reload())),
            KeyCode::Char('/') => {
                self.set_tab(Tab::Watchlist);
                self.status_message = None;
                self.search.open();
                self.mode = AppMode::Search;
            }
            _ => {}
        }
        None
    }

    fn on_search_key(&mut self, code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Esc => {
                self.search.close();
                self.mode = AppMode::Normal;
                None
            }
            KeyCode::Up => {
                self.search.move_up();
                None
            }
            KeyCode::Down => {
                self.search.move_down();
                None
            }
            KeyCode::Enter => {
                let stock = self.search.commit()?;
                self.mode = AppMode::Normal;
                match self.watchlist.current_id() {
                    Some(id) => Some(Action::Fetch(Request::Watch {
                        watchlist_id: id.to_string(),
                        ticker: stock.key().to_string(),
                    })),
                    None => {
                        self.error_message = Some("No watchlist selected".to_string());
                        None
                    }
                }
            }
            KeyCode::Backspace => self.search.pop_char().map(Action::Search),
            KeyCode::Char(c) => Some(Action::Search(self.search.push_char(c))),
            _ => None,
        }
    }
}

/// Runs fetches off the UI loop and reports back over a channel.
struct Loader {
    api: Arc<dyn PortfolioApi>,
    portfolio_id: String,
    email: Option<String>,
    sender: mpsc::UnboundedSender<Update>,
}

impl Loader {
    fn dispatch(&self, request: Request) {
        let api = self.api.clone();
        let sender = self.sender.clone();
        match request {
            Request::Reload { seq } => {
                debug!(seq, portfolio = %self.portfolio_id, "reloading");
                let stocks = HoldingsScope::Stocks {
                    portfolio_id: self.portfolio_id.clone(),
                    symbol: None,
                };
                let funds = self.email.clone().map(|email| HoldingsScope::Funds {
                    email,
                    portfolio_id: self.portfolio_id.clone(),
                });
                let portfolio_id = self.portfolio_id.clone();
                tokio::spawn(async move {
                    let result = fetch_holdings(api.as_ref(), &stocks)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = sender.send(Update::Holdings {
                        seq,
                        tab: Tab::Positions,
                        result,
                    });

                    let result = match funds {
                        Some(scope) => fetch_holdings(api.as_ref(), &scope)
                            .await
                            .map_err(|e| e.to_string()),
                        None => Err("sign in with an email account to load funds".to_string()),
                    };
                    let _ = sender.send(Update::Holdings {
                        seq,
                        tab: Tab::Funds,
                        result,
                    });

                    let result = api.watchlists(&portfolio_id).await.map_err(|e| e.to_string());
                    let _ = sender.send(Update::Watchlists { seq, result });
                });
            }
            Request::Items { seq, watchlist_id } => {
                tokio::spawn(async move {
                    let result = api
                        .watchlist_items(&watchlist_id)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = sender.send(Update::Items {
                        seq,
                        watchlist_id,
                        result,
                    });
                });
            }
            Request::Watch {
                watchlist_id,
                ticker,
            } => {
                info!(%watchlist_id, %ticker, "adding to watchlist");
                tokio::spawn(async move {
                    let result = api
                        .add_to_watchlist(&watchlist_id, &ticker)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = sender.send(Update::Watched {
                        watchlist_id,
                        ticker,
                        result,
                    });
                });
            }
        }
    }
}

pub async fn run_tui(
    api: Arc<dyn PortfolioApi>,
    portfolio: Portfolio,
    email: Option<String>,
    cfg: &Config,
    theme: Theme,
    tab: Option<Tab>,
) -> eyre::Result<()> {
    let settings = cfg.stock_search();
    let mut app = App::new(portfolio, cfg.currency.clone(), theme, settings.min_query_len);
    if let Some(tab) = tab {
        app.current_tab = tab;
    }

    let (sender, mut updates) = mpsc::unbounded_channel();
    let loader = Loader {
        api: api.clone(),
        portfolio_id: app.portfolio.portfolio_id.clone(),
        email,
        sender,
    };
    let mut search = spawn_search_worker(Arc::new(StockSearch::new(api)), settings);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(
        &mut terminal,
        &mut app,
        &loader,
        &mut updates,
        &mut search,
        cfg.refresh_interval(),
    )
    .await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    loader: &Loader,
    updates: &mut mpsc::UnboundedReceiver<Update>,
    search: &mut crate::search::SearchHandle<Stock>,
    refresh: Duration,
) -> io::Result<()> {
    loader.dispatch(app.reload());

    loop {
        terminal.draw(|f| ui(f, app))?;

        while let Ok(update) = updates.try_recv() {
            if let Some(request) = app.apply(update) {
                loader.dispatch(request);
            }
        }
        while let Ok(response) = search.responses.try_recv() {
            app.search.apply(response);
        }
        if app.last_refresh.elapsed() >= refresh {
            loader.dispatch(app.reload());
        }

        if crossterm::event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match app.on_key(key.code) {
                        Some(Action::Fetch(request)) => loader.dispatch(request),
                        Some(Action::Search(request)) => {
                            if search.requests.send(request).is_err() {
                                warn!("search worker stopped");
                                app.error_message = Some("Search is unavailable".to_string());
                            }
                        }
                        None => {}
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &App) {
    let palette = Palette::for_theme(app.theme);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(7),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    let tab_titles: Vec<Line> = Tab::all()
        .iter()
        .map(|t| {
            let style = if *t == app.current_tab {
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(palette.text)
            };
            Line::from(Span::styled(t.title(), style))
        })
        .collect();

    let tabs = Tabs::new(tab_titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Portfolio Buzz: {}", app.portfolio.name)),
        )
        .style(Style::default().fg(palette.text))
        .highlight_style(Style::default().fg(palette.accent))
        .select(
            Tab::all()
                .iter()
                .position(|&t| t == app.current_tab)
                .unwrap_or(0),
        );
    f.render_widget(tabs, chunks[0]);

    render_header(f, chunks[1], app, &palette);

    match app.current_tab {
        Tab::Positions => render_holdings(f, chunks[2], app, app.stocks.as_ref(), "Qty", &palette),
        Tab::Funds => render_holdings(f, chunks[2], app, app.funds.as_ref(), "Units", &palette),
        Tab::Watchlist => render_watchlist(f, chunks[2], app, &palette),
    }

    let help = match app.mode {
        AppMode::Normal => {
            "Tab/1-3 (tabs) | j/k (select) | s/S (sort) | h (history) | w (watchlist) | / (search) | r (refresh) | q (quit)"
        }
        AppMode::History => "Esc (close)",
        AppMode::Search => "Type to search | Up/Down (move) | Enter (add to watchlist) | Esc (close)",
    };
    let footer = app.status_message.as_deref().unwrap_or(help);
    let help_text = Paragraph::new(footer)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .style(Style::default().fg(palette.muted))
        .alignment(Alignment::Center);
    f.render_widget(help_text, chunks[3]);

    if app.mode == AppMode::History {
        render_history_popup(f, app, &palette);
    }
    if app.search.is_open() {
        render_search_popup(f, app, &palette);
    }

    if let Some(error) = &app.error_message {
        render_error_popup(f, error);
    }
}

fn render_header(f: &mut Frame, area: Rect, app: &App, palette: &Palette) {
    let (headline, title, color) = match app.current_tab {
        Tab::Watchlist => {
            let name = app
                .current_watchlist()
                .map(|w| w.name.clone())
                .unwrap_or_else(|| "-".to_string());
            (name, "Watchlist".to_string(), palette.accent)
        }
        _ => match app.current_holdings() {
            Some(holdings) => {
                let totals = holdings.totals();
                let headline = if totals.priced_invested > 0.0 {
                    format_money(totals.current_value, &app.currency)
                } else {
                    format_money(totals.invested, &app.currency)
                };
                let title = format!(
                    "Invested {} | P&L {} ({})",
                    format_money(totals.invested, &app.currency),
                    format_money(totals.pnl, &app.currency),
                    format_opt(totals.pnl_percent(), format_percent)
                );
                (headline, title, palette.signed(Some(totals.pnl)))
            }
            None => ("...".to_string(), "Loading".to_string(), palette.muted),
        },
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .title_alignment(Alignment::Center);
    f.render_widget(block, area);

    let big_text = BigText::builder()
        .pixel_size(PixelSize::Quadrant)
        .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
        .lines(vec![headline.clone().into()])
        .build();

    let inner = area.inner(Margin {
        horizontal: 1,
        vertical: 1,
    });
    // quadrant glyphs are roughly four columns wide
    let big_text_width = headline.chars().count() as u16 * 4;
    let centered_area = if big_text_width < inner.width {
        let margin = (inner.width - big_text_width) / 2;
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(margin),
                Constraint::Min(0),
                Constraint::Length(margin),
            ])
            .split(inner)[1]
    } else {
        inner
    };
    f.render_widget(big_text, centered_area);
}

fn header_row(names: &[&str], palette: &Palette) -> Row<'static> {
    let cells: Vec<Cell> = names
        .iter()
        .map(|h| {
            Cell::from(h.to_string()).style(
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            )
        })
        .collect();
    Row::new(cells).height(1).bottom_margin(1)
}

fn render_holdings(
    f: &mut Frame,
    area: Rect,
    app: &App,
    holdings: Option<&Holdings>,
    quantity_label: &str,
    palette: &Palette,
) {
    let Some(holdings) = holdings else {
        render_loading(f, area);
        return;
    };

    let header = header_row(
        &["Name", quantity_label, "Avg", "Invested", "Price", "Value", "P&L", "P&L%", "Day%"],
        palette,
    );

    let rows = holdings
        .sorted(app.sort, app.direction)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let row_style = if i == app.selected {
                Style::default().bg(palette.selected_bg)
            } else {
                Style::default()
            };
            let pnl_color = palette.signed(p.pnl());
            Row::new(vec![
                Cell::from(p.instrument_name.clone()),
                Cell::from(format_quantity(p.total_quantity)),
                Cell::from(format_opt(p.avg_price(), |v| format!("{v:.2}"))),
                Cell::from(format!("{:.2}", p.total_invested)),
                Cell::from(format_opt(p.current_price(), |v| format!("{v:.2}"))),
                Cell::from(format_opt(p.current_value(), |v| format!("{v:.2}"))),
                Cell::from(format_opt(p.pnl(), |v| format!("{v:.2}"))).style(Style::default().fg(pnl_color)),
                Cell::from(format_opt(p.pnl_percent(), format_percent)).style(Style::default().fg(pnl_color)),
                Cell::from(format_opt(p.day_change_percent(), format_percent))
                    .style(Style::default().fg(palette.signed(p.day_change_percent()))),
            ])
            .height(1)
            .style(row_style)
        });

    let widths = [
        Constraint::Percentage(22),
        Constraint::Percentage(8),
        Constraint::Percentage(9),
        Constraint::Percentage(11),
        Constraint::Percentage(9),
        Constraint::Percentage(11),
        Constraint::Percentage(10),
        Constraint::Percentage(10),
        Constraint::Percentage(10),
    ];
    let title = format!(
        "{} - sorted by {} {}",
        app.current_tab.title(),
        app.sort,
        match app.direction {
            SortDirection::Ascending => "▲",
            SortDirection::Descending => "▼",
        }
    );
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .style(Style::default().fg(palette.text));
    f.render_widget(table, area);
}

fn render_watchlist(f: &mut Frame, area: Rect, app: &App, palette: &Palette) {
    let Some(items) = &app.items else {
        render_loading(f, area);
        return;
    };

    let title = match app.current_watchlist() {
        Some(w) => format!("{} ({}/{}) - w to switch", w.name, position_of(app, w) + 1, app.watchlists.len()),
        None => "No watchlist".to_string(),
    };

    if items.is_empty() {
        let empty = Paragraph::new("Nothing here yet. Press / to search and add a stock.")
            .block(Block::default().borders(Borders::ALL).title(title))
            .style(Style::default().fg(palette.muted))
            .alignment(Alignment::Center);
        f.render_widget(empty, area);
        return;
    }

    let header = header_row(&["Ticker", "Name", "Price", "Day%"], palette);
    let rows = items.iter().enumerate().map(|(i, item)| {
        let row_style = if i == app.selected {
            Style::default().bg(palette.selected_bg)
        } else {
            Style::default()
        };
        Row::new(vec![
            Cell::from(item.instrument_id.clone()),
            Cell::from(item.name.clone()),
            Cell::from(format_opt(item.current_price, |v| format!("{v:.2}"))),
            Cell::from(format_opt(item.change_percent, format_percent))
                .style(Style::default().fg(palette.signed(item.change_percent))),
        ])
        .style(row_style)
    });
    let widths = [
        Constraint::Percentage(20),
        Constraint::Percentage(50),
        Constraint::Percentage(15),
        Constraint::Percentage(15),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .style(Style::default().fg(palette.text));
    f.render_widget(table, area);
}

fn position_of(app: &App, watchlist: &Watchlist) -> usize {
    app.watchlists
        .iter()
        .position(|w| w.watchlist_id == watchlist.watchlist_id)
        .unwrap_or(0)
}

fn render_history_popup(f: &mut Frame, app: &App, palette: &Palette) {
    let Some(position) = app.selected_position() else {
        return;
    };
    let popup_area = centered_rect(70, 60, f.area());
    f.render_widget(Clear, popup_area);

    let header = header_row(&["Date", "Quantity", "Price", "Invested", "Id"], palette);
    let rows = position.transactions.iter().map(|tx| {
        Row::new(vec![
            Cell::from(tx.purchase_date.to_string()),
            Cell::from(format_quantity(tx.quantity)),
            Cell::from(format!("{:.2}", tx.purchase_price)),
            Cell::from(format!("{:.2}", tx.invested_amount)),
            Cell::from(tx.position_id.clone()),
        ])
    });
    let widths = [
        Constraint::Percentage(20),
        Constraint::Percentage(15),
        Constraint::Percentage(15),
        Constraint::Percentage(20),
        Constraint::Percentage(30),
    ];
    let table = Table::new(rows, widths).header(header).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.accent))
            .title(format!(" {} ({}) ", position.instrument_name, position.instrument_id))
            .title_alignment(Alignment::Center),
    );
    f.render_widget(table, popup_area);
}

fn render_search_popup(f: &mut Frame, app: &App, palette: &Palette) {
    let popup_area = centered_rect(60, 50, f.area());
    f.render_widget(Clear, popup_area);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(popup_area);

    let input = Paragraph::new(format!("{}▌", app.search.query()))
        .style(Style::default().fg(palette.text).add_modifier(Modifier::BOLD))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.accent))
                .title(" Add stock to watchlist "),
        );
    f.render_widget(input, layout[0]);

    let results_block = Block::default().borders(Borders::ALL);
    match app.search.status() {
        SearchStatus::Ready => {
            let items: Vec<ListItem> = app
                .search
                .results()
                .iter()
                .enumerate()
                .map(|(i, stock)| {
                    let style = if i == app.search.cursor() {
                        Style::default().bg(palette.selected_bg).fg(palette.accent)
                    } else {
                        Style::default().fg(palette.text)
                    };
                    ListItem::new(stock.label()).style(style)
                })
                .collect();
            f.render_widget(List::new(items).block(results_block), layout[1]);
        }
        status => {
            let message = match status {
                SearchStatus::Idle => "Start typing a symbol or company name".to_string(),
                SearchStatus::Loading => "Searching...".to_string(),
                SearchStatus::Empty => "No matches".to_string(),
                SearchStatus::Failed(e) => format!("Search failed: {e}"),
                SearchStatus::Ready => String::new(),
            };
            let paragraph = Paragraph::new(message)
                .block(results_block)
                .style(Style::default().fg(palette.muted))
                .alignment(Alignment::Center);
            f.render_widget(paragraph, layout[1]);
        }
    }
}

fn render_loading(f: &mut Frame, area: Rect) {
    let loading_text = Paragraph::new("Loading...")
        .block(Block::default().borders(Borders::ALL).title("Loading"))
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center);

    f.render_widget(loading_text, area);
}

fn render_error_popup(f: &mut Frame, error: &str) {
    let popup_area = centered_rect(60, 20, f.area());
    f.render_widget(Clear, popup_area);

    let error_paragraph = Paragraph::new(error)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Error")
                .style(Style::default().fg(Color::Red)),
        )
        .style(Style::default().fg(Color::White))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    f.render_widget(error_paragraph, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

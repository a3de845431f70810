use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use colored::Colorize;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, CellAlignment, Color as TColor, ContentArrangement, Table};
use eyre::{bail, eyre, Result, WrapErr};
use tracing::{info, warn};

use crate::api::{HttpApi, PortfolioApi};
use crate::config::Config;
use crate::content::html_to_text;
use crate::error::{ApiError, ClientError};
use crate::holdings::{aggregate, Holdings, SortDirection, SortKey};
use crate::models::{Portfolio, SearchItem, Watchlist, WatchlistItem};
use crate::search::{search_once, FundSearch, StockSearch};
use crate::session::{Session, Theme};
use crate::store::ClientStore;
use crate::transaction::{NewFundTransaction, NewTransaction, TransactionForm};

/// Which set of transactions to load.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldingsScope {
    Stocks {
        portfolio_id: String,
        symbol: Option<String>,
    },
    Funds {
        email: String,
        portfolio_id: String,
    },
}

/// Fetch transactions, aggregate them and merge in prices.
///
/// A failed price fetch only costs the price columns.
pub async fn fetch_holdings(api: &dyn PortfolioApi, scope: &HoldingsScope) -> Result<Holdings, ApiError> {
    let (transactions, prices) = match scope {
        HoldingsScope::Stocks {
            portfolio_id,
            symbol,
        } => {
            futures::join!(
                api.positions(portfolio_id, symbol.as_deref()),
                api.market_prices(portfolio_id)
            )
        }
        HoldingsScope::Funds {
            email,
            portfolio_id,
        } => futures::join!(
            api.fund_positions(email, portfolio_id),
            api.fund_prices(email, portfolio_id)
        ),
    };

    let mut holdings = aggregate(&transactions?);
    match prices {
        Ok(prices) => holdings.enrich(&prices),
        Err(e) => warn!("prices unavailable, showing cost basis only: {e}"),
    }
    Ok(holdings)
}

pub struct Ctx {
    pub cfg: Config,
    pub session: Session,
    pub api: Arc<dyn PortfolioApi>,
    owns_http: bool,
}

impl Ctx {
    pub fn new(cfg: Config, store: Arc<dyn ClientStore>) -> Result<Self> {
        let session = Session::restore(store).wrap_err("Failed to read saved session")?;
        let api = build_api(&cfg, session.auth.token())?;
        Ok(Ctx {
            cfg,
            session,
            api,
            owns_http: true,
        })
    }

    #[cfg(test)]
    pub fn with_api(cfg: Config, store: Arc<dyn ClientStore>, api: Arc<dyn PortfolioApi>) -> Result<Self> {
        let session = Session::restore(store)?;
        Ok(Ctx {
            cfg,
            session,
            api,
            owns_http: false,
        })
    }

    // The token lives in the HTTP client, so swap it after login/logout.
    fn rebuild_api(&mut self) -> Result<()> {
        if self.owns_http {
            self.api = build_api(&self.cfg, self.session.auth.token())?;
        }
        Ok(())
    }

    pub fn require_login(&self) -> Result<()> {
        if !self.session.auth.is_authenticated() {
            bail!("Not signed in. Run `portfolio_buzz login <EMAIL>` first");
        }
        Ok(())
    }

    pub fn user_email(&self) -> Result<String> {
        self.session
            .auth
            .user()
            .map(|u| u.email.clone())
            .ok_or_else(|| eyre!(ApiError::MissingContext("No signed-in user")))
    }

    /// Re-fetch the portfolio list and reconcile the saved selection with it.
    pub async fn current_portfolio(&mut self) -> Result<Portfolio> {
        self.require_login()?;
        let portfolios = self
            .api
            .portfolios()
            .await
            .wrap_err("Failed to load portfolios")?;
        self.session.resolve_portfolios(&portfolios)?;
        self.session
            .portfolio
            .current()
            .cloned()
            .ok_or_else(|| eyre!("No portfolios yet. Create one with `portfolio_buzz portfolio create <NAME>`"))
    }

    /// Pick a watchlist by name or id, or fall back to the default one.
    pub async fn current_watchlist(&mut self, wanted: Option<&str>) -> Result<(Watchlist, Vec<Watchlist>)> {
        let portfolio = self.current_portfolio().await?;
        let watchlists = self
            .api
            .watchlists(&portfolio.portfolio_id)
            .await
            .wrap_err("Failed to load watchlists")?;

        if let Some(wanted) = wanted {
            let found = watchlists
                .iter()
                .find(|w| w.watchlist_id == wanted || w.name.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| eyre!("No watchlist named '{wanted}' in {}", portfolio.name))?;
            self.session.watchlist.select(&found.watchlist_id);
        }

        let id = self
            .session
            .watchlist
            .resolve(&watchlists)
            .map(str::to_string)
            .ok_or_else(|| eyre!("Portfolio {} has no watchlists", portfolio.name))?;
        let watchlist = watchlists
            .iter()
            .find(|w| w.watchlist_id == id)
            .cloned()
            .ok_or_else(|| eyre!("Watchlist {id} disappeared"))?;
        Ok((watchlist, watchlists))
    }

    pub async fn stock_scope(&mut self, symbol: Option<String>) -> Result<HoldingsScope> {
        let portfolio = self.current_portfolio().await?;
        Ok(HoldingsScope::Stocks {
            portfolio_id: portfolio.portfolio_id,
            symbol,
        })
    }

    pub async fn fund_scope(&mut self) -> Result<HoldingsScope> {
        let portfolio = self.current_portfolio().await?;
        Ok(HoldingsScope::Funds {
            email: self.user_email()?,
            portfolio_id: portfolio.portfolio_id,
        })
    }
}

pub fn build_api(cfg: &Config, token: Option<&str>) -> Result<Arc<dyn PortfolioApi>> {
    let api = HttpApi::new(&cfg.api_base_url, cfg.request_timeout())?.with_token(token);
    Ok(Arc::new(api))
}

pub fn prompt_password() -> Result<String> {
    if let Ok(pw) = std::env::var("PB_PASSWORD") {
        return Ok(pw);
    }
    eprint!("Password: ");
    io::stderr().flush()?;
    let password = if io::stdin().is_terminal() {
        read_hidden_line()?
    } else {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_string()
    };
    if password.is_empty() {
        bail!("Password is required");
    }
    Ok(password)
}

#[derive(Debug, PartialEq, Eq)]
enum PromptStep {
    Continue,
    Done,
    Cancelled,
}

/// Apply one key press to a hidden input buffer.
fn password_key(buf: &mut String, code: KeyCode, modifiers: KeyModifiers) -> PromptStep {
    match code {
        KeyCode::Enter => PromptStep::Done,
        KeyCode::Esc => PromptStep::Cancelled,
        KeyCode::Char('c' | 'd') if modifiers.contains(KeyModifiers::CONTROL) => PromptStep::Cancelled,
        KeyCode::Char('u') if modifiers.contains(KeyModifiers::CONTROL) => {
            buf.clear();
            PromptStep::Continue
        }
        KeyCode::Backspace => {
            buf.pop();
            PromptStep::Continue
        }
        KeyCode::Char(c) => {
            buf.push(c);
            PromptStep::Continue
        }
        _ => PromptStep::Continue,
    }
}

/// Read a line from the terminal in raw mode so nothing is echoed.
fn read_hidden_line() -> Result<String> {
    terminal::enable_raw_mode()?;
    let result = (|| -> Result<Option<String>> {
        let mut buf = String::new();
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match password_key(&mut buf, key.code, key.modifiers) {
                    PromptStep::Continue => {}
                    PromptStep::Done => return Ok(Some(buf)),
                    PromptStep::Cancelled => return Ok(None),
                }
            }
        }
    })();
    terminal::disable_raw_mode()?;
    eprintln!();
    match result? {
        Some(password) => Ok(password),
        None => bail!("Password entry cancelled"),
    }
}

pub async fn login(ctx: &mut Ctx, email: &str, password: &str) -> Result<()> {
    let payload = ctx
        .api
        .login(email, password)
        .await
        .wrap_err("Login failed")?;
    finish_login(ctx, payload).await
}

pub async fn signup(ctx: &mut Ctx, name: &str, email: &str, password: &str) -> Result<()> {
    let payload = ctx
        .api
        .signup(name, email, password)
        .await
        .wrap_err("Sign-up failed")?;
    finish_login(ctx, payload).await
}

pub async fn google_login(ctx: &mut Ctx, credential: &str) -> Result<()> {
    let payload = ctx
        .api
        .google_login(credential)
        .await
        .wrap_err("Google sign-in failed")?;
    finish_login(ctx, payload).await
}

async fn finish_login(ctx: &mut Ctx, payload: crate::models::AuthPayload) -> Result<()> {
    let email = payload.user.email.clone();
    ctx.session.login(payload)?;
    ctx.rebuild_api()?;
    info!(%email, "signed in");
    println!("{} Signed in as {email}", "✔".green());

    match ctx.current_portfolio().await {
        Ok(p) => println!("Current portfolio: {}", p.name.bold()),
        Err(e) => println!("{} {e}", "!".yellow()),
    }
    Ok(())
}

pub fn logout(ctx: &mut Ctx) -> Result<()> {
    ctx.session.logout()?;
    ctx.rebuild_api()?;
    println!("Signed out");
    Ok(())
}

pub fn whoami(ctx: &Ctx) {
    match ctx.session.auth.user() {
        Some(user) => {
            println!("{} <{}>", user.name, user.email);
            if let Some(p) = ctx.session.portfolio.current() {
                println!("Portfolio: {} ({})", p.name, p.portfolio_id);
            }
        }
        None => println!("Not signed in"),
    }
}

pub async fn list_portfolios(ctx: &mut Ctx) -> Result<()> {
    let current = ctx.current_portfolio().await.ok();
    let portfolios = ctx.api.portfolios().await?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("").add_attribute(Attribute::Bold),
            Cell::new("Id").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Default").add_attribute(Attribute::Bold),
        ]);
    for p in &portfolios {
        let selected = current.as_ref().is_some_and(|c| c.portfolio_id == p.portfolio_id);
        table.add_row(vec![
            Cell::new(if selected { "*" } else { "" }).fg(TColor::Green),
            Cell::new(&p.portfolio_id),
            Cell::new(&p.name),
            Cell::new(if p.is_default { "yes" } else { "" }),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn use_portfolio(ctx: &mut Ctx, wanted: &str) -> Result<()> {
    ctx.require_login()?;
    let portfolios = ctx.api.portfolios().await?;
    let portfolio = portfolios
        .into_iter()
        .find(|p| p.portfolio_id == wanted || p.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| eyre!("No portfolio '{wanted}'"))?;
    println!("Switched to {}", portfolio.name.bold());
    ctx.session.set_current_portfolio(portfolio)?;
    Ok(())
}

pub async fn create_portfolio(ctx: &mut Ctx, name: &str) -> Result<()> {
    ctx.require_login()?;
    let created = ctx.api.create_portfolio(name).await?;
    println!("{} Created portfolio {} ({})", "✔".green(), created.name, created.portfolio_id);
    Ok(())
}

pub async fn delete_portfolio(ctx: &mut Ctx, id: &str) -> Result<()> {
    ctx.require_login()?;
    ctx.api.delete_portfolio(id).await?;
    // re-sync so a deleted selection falls back to the default
    let portfolios = ctx.api.portfolios().await?;
    ctx.session.resolve_portfolios(&portfolios)?;
    println!("{} Deleted portfolio {id}", "✔".green());
    Ok(())
}

pub struct TableOptions {
    pub sort: SortKey,
    pub direction: SortDirection,
    pub history: bool,
}

pub async fn show_positions(ctx: &mut Ctx, symbol: Option<String>, opts: &TableOptions) -> Result<()> {
    let scope = ctx.stock_scope(symbol).await?;
    let holdings = fetch_holdings(ctx.api.as_ref(), &scope)
        .await
        .wrap_err("Failed to load positions")?;
    print_holdings(&holdings, opts, "Quantity");
    Ok(())
}

pub async fn show_funds(ctx: &mut Ctx, opts: &TableOptions) -> Result<()> {
    let scope = ctx.fund_scope().await?;
    let holdings = fetch_holdings(ctx.api.as_ref(), &scope)
        .await
        .wrap_err("Failed to load mutual funds")?;
    print_holdings(&holdings, opts, "Units");
    Ok(())
}

fn print_holdings(holdings: &Holdings, opts: &TableOptions, quantity_label: &str) {
    if holdings.is_empty() {
        println!("No transactions yet");
        return;
    }
    holdings.print(opts.sort, opts.direction, quantity_label);
    if opts.history {
        holdings.print_history();
    }
}

pub async fn show_allocation(ctx: &mut Ctx, funds: bool) -> Result<()> {
    let scope = if funds {
        ctx.fund_scope().await?
    } else {
        ctx.stock_scope(None).await?
    };
    let holdings = fetch_holdings(ctx.api.as_ref(), &scope).await?;
    if holdings.is_empty() {
        println!("No transactions yet");
        return Ok(());
    }
    holdings.draw_pie_chart();
    holdings.print_allocation();
    Ok(())
}

/// Validate a form and send it as a new or replacement transaction.
async fn submit_position(
    api: &dyn PortfolioApi,
    portfolio_id: &str,
    position_id: Option<&str>,
    form: &TransactionForm,
) -> Result<NewTransaction, ClientError> {
    let tx = form.validate()?;
    match position_id {
        Some(id) => api.update_position(portfolio_id, id, &tx).await?,
        None => api.add_position(portfolio_id, &tx).await?,
    }
    Ok(tx)
}

pub async fn add_position(ctx: &mut Ctx, form: &TransactionForm) -> Result<()> {
    let portfolio = ctx.current_portfolio().await?;
    let tx = submit_position(ctx.api.as_ref(), &portfolio.portfolio_id, None, form).await?;
    println!("{} Added {} x {} to {}", "✔".green(), tx.quantity, tx.symbol, portfolio.name);
    Ok(())
}

pub async fn edit_position(ctx: &mut Ctx, position_id: &str, form: &TransactionForm) -> Result<()> {
    let portfolio = ctx.current_portfolio().await?;
    submit_position(ctx.api.as_ref(), &portfolio.portfolio_id, Some(position_id), form).await?;
    println!("{} Updated transaction {position_id}", "✔".green());
    Ok(())
}

pub async fn delete_position(ctx: &mut Ctx, position_id: &str) -> Result<()> {
    let portfolio = ctx.current_portfolio().await?;
    ctx.api
        .delete_position(&portfolio.portfolio_id, position_id)
        .await?;
    println!("{} Deleted transaction {position_id}", "✔".green());
    Ok(())
}

pub async fn add_fund(ctx: &mut Ctx, form: &TransactionForm) -> Result<()> {
    let tx = NewFundTransaction::from(form.validate()?);
    let portfolio = ctx.current_portfolio().await?;
    let email = ctx.user_email()?;
    ctx.api
        .add_fund_position(&email, &portfolio.portfolio_id, &tx)
        .await?;
    println!("{} Added {} units of {}", "✔".green(), tx.units, tx.scheme_code);
    Ok(())
}

pub async fn delete_fund(ctx: &mut Ctx, position_id: &str) -> Result<()> {
    let portfolio = ctx.current_portfolio().await?;
    let email = ctx.user_email()?;
    ctx.api
        .delete_fund_position(&email, &portfolio.portfolio_id, position_id)
        .await?;
    println!("{} Deleted fund transaction {position_id}", "✔".green());
    Ok(())
}

pub async fn list_watchlists(ctx: &mut Ctx) -> Result<()> {
    let (current, watchlists) = ctx.current_watchlist(None).await?;
    for w in &watchlists {
        let marker = if w.watchlist_id == current.watchlist_id { "*" } else { " " };
        let default = if w.is_default { " (default)" } else { "" };
        println!("{marker} {} [{}]{default}", w.name, w.watchlist_id);
    }
    Ok(())
}

pub async fn show_watchlist(ctx: &mut Ctx, name: Option<&str>) -> Result<()> {
    let (watchlist, _) = ctx.current_watchlist(name).await?;
    let items = ctx
        .api
        .watchlist_items(&watchlist.watchlist_id)
        .await
        .wrap_err_with(|| format!("Failed to load watchlist {}", watchlist.name))?;
    println!("{}", watchlist.name.bold());
    print_watchlist(&items);
    Ok(())
}

fn print_watchlist(items: &[WatchlistItem]) {
    if items.is_empty() {
        println!("Watchlist is empty");
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Ticker").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Price").add_attribute(Attribute::Bold),
            Cell::new("%Day").add_attribute(Attribute::Bold),
        ]);
    for item in items {
        let price = item
            .current_price
            .map(|p| format!("{p:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let change = match item.change_percent {
            Some(v) => {
                let c = if v >= 0.0 { TColor::Green } else { TColor::Red };
                Cell::new(format!("{v:.2}%")).fg(c)
            }
            None => Cell::new("-"),
        };
        table.add_row(vec![
            Cell::new(&item.instrument_id),
            Cell::new(&item.name),
            Cell::new(price).set_alignment(CellAlignment::Right),
            change.set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");
}

pub async fn create_watchlist(ctx: &mut Ctx, name: &str) -> Result<()> {
    let portfolio = ctx.current_portfolio().await?;
    let created = ctx
        .api
        .create_watchlist(&portfolio.portfolio_id, name)
        .await?;
    println!("{} Created watchlist {}", "✔".green(), created.name);
    Ok(())
}

pub async fn watch(ctx: &mut Ctx, ticker: &str, watchlist: Option<&str>, add: bool) -> Result<()> {
    let ticker = ticker.trim().to_uppercase();
    if ticker.is_empty() {
        bail!(crate::error::ValidationError::SymbolRequired);
    }
    let (list, _) = ctx.current_watchlist(watchlist).await?;
    if add {
        ctx.api.add_to_watchlist(&list.watchlist_id, &ticker).await?;
        println!("{} Added {ticker} to {}", "✔".green(), list.name);
    } else {
        ctx.api
            .remove_from_watchlist(&list.watchlist_id, &ticker)
            .await?;
        println!("{} Removed {ticker} from {}", "✔".green(), list.name);
    }
    Ok(())
}

pub async fn search(ctx: &Ctx, query: &str, funds: bool) -> Result<()> {
    let labels: Vec<String> = if funds {
        let source = Arc::new(FundSearch::new(ctx.api.clone()));
        search_once(source, ctx.cfg.fund_search(), query)
            .await?
            .iter()
            .map(SearchItem::label)
            .collect()
    } else {
        let source = Arc::new(StockSearch::new(ctx.api.clone()));
        search_once(source, ctx.cfg.stock_search(), query)
            .await?
            .iter()
            .map(SearchItem::label)
            .collect()
    };

    if labels.is_empty() {
        println!("No matches for '{query}'");
    }
    for label in labels {
        println!("{label}");
    }
    Ok(())
}

pub enum AiRequest<'a> {
    Insight(&'a str),
    Research(&'a str),
    Copilot(&'a str),
}

pub async fn ai(ctx: &mut Ctx, request: AiRequest<'_>) -> Result<()> {
    ctx.require_login()?;
    let html = match request {
        AiRequest::Insight(symbol) => ctx.api.ai_insight(&symbol.to_uppercase()).await?,
        AiRequest::Research(symbol) => ctx.api.stock_research(&symbol.to_uppercase()).await?,
        AiRequest::Copilot(message) => {
            let portfolio = ctx.current_portfolio().await.ok();
            ctx.api
                .copilot(message, portfolio.as_ref().map(|p| p.portfolio_id.as_str()))
                .await?
        }
    };
    let text = html_to_text(&html);
    if text.is_empty() {
        println!("(no content returned)");
    } else {
        println!("{text}");
    }
    Ok(())
}

pub fn theme(ctx: &mut Ctx, value: Option<&str>) -> Result<()> {
    if let Some(value) = value {
        let theme: Theme = value.parse().map_err(|e: String| eyre!(e))?;
        ctx.session.set_theme(theme)?;
    }
    println!("Theme: {}", ctx.session.theme.as_str());
    Ok(())
}

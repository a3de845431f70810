use std::sync::Arc;

use clap::{arg, ArgMatches, Command};
use colored::Colorize;
use eyre::{eyre, Result, WrapErr};

use crate::commands::{AiRequest, Ctx, TableOptions};
use crate::config::Config;
use crate::error::ApiError;
use crate::holdings::{SortDirection, SortKey};
use crate::store::{ClientStore, MemoryStore, SledStore};
use crate::transaction::TransactionForm;
use crate::tui::Tab;

mod api;
mod commands;
mod config;
mod content;
mod error;
mod holdings;
mod logging;
mod models;
mod search;
mod session;
mod store;
mod transaction;
mod tui;

fn table_args(cmd: Command) -> Command {
    cmd.arg(arg!(--sort <KEY> "Sort column: name, quantity, avg_price, invested, value, pnl").required(false))
        .arg(arg!(--desc "Sort descending"))
        .arg(arg!(--history "Also list every transaction"))
}

fn transaction_args(cmd: Command, instrument: &'static str) -> Command {
    cmd.arg(arg!(<INSTRUMENT>).help(instrument))
        .arg(arg!(<QTY> "Quantity (units for funds)"))
        .arg(arg!(<PRICE> "Purchase price (NAV for funds)"))
        .arg(arg!(<DATE> "Purchase date, YYYY-MM-DD"))
}

fn cli() -> Command {
    Command::new("portfolio_buzz")
        .about("Track stocks, mutual funds and watchlists on a Portfolio Buzz server")
        .arg_required_else_help(true)
        .arg(arg!(--ephemeral "Keep the session in memory only").global(true))
        .subcommand(Command::new("config").about("Print the path to the config file"))
        .subcommand(
            Command::new("login")
                .about("Sign in with email and password")
                .arg(arg!(<EMAIL> "Account email"))
                .arg(arg!(--password <PASSWORD> "Password (prompted when omitted)").required(false)),
        )
        .subcommand(
            Command::new("signup")
                .about("Create an account and sign in")
                .arg(arg!(<NAME> "Display name"))
                .arg(arg!(<EMAIL> "Account email"))
                .arg(arg!(--password <PASSWORD> "Password (prompted when omitted)").required(false)),
        )
        .subcommand(
            Command::new("google")
                .about("Sign in with a Google ID token")
                .arg(arg!(<CREDENTIAL> "Google credential")),
        )
        .subcommand(Command::new("logout").about("Forget the saved session"))
        .subcommand(Command::new("whoami").about("Show the signed-in user and portfolio"))
        .subcommand(Command::new("portfolios").about("List your portfolios"))
        .subcommand(
            Command::new("portfolio")
                .about("Select, create or delete a portfolio")
                .subcommand_required(true)
                .subcommand(
                    Command::new("use")
                        .about("Make a portfolio the current one")
                        .arg(arg!(<ID> "Portfolio id or name")),
                )
                .subcommand(
                    Command::new("create")
                        .about("Create a portfolio")
                        .arg(arg!(<NAME> "Portfolio name")),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Delete a portfolio")
                        .arg(arg!(<ID> "Portfolio id")),
                ),
        )
        .subcommand(table_args(
            Command::new("positions")
                .about("Show aggregated stock positions")
                .arg(arg!(--symbol <SYMBOL> "Only this symbol").required(false)),
        ))
        .subcommand(
            Command::new("position")
                .about("Add, edit or delete a stock transaction")
                .subcommand_required(true)
                .subcommand(transaction_args(
                    Command::new("add").about("Record a purchase"),
                    "Ticker symbol",
                ))
                .subcommand(transaction_args(
                    Command::new("edit")
                        .about("Replace a recorded purchase")
                        .arg(arg!(<ID> "Transaction id")),
                    "Ticker symbol",
                ))
                .subcommand(
                    Command::new("delete")
                        .about("Delete a transaction")
                        .arg(arg!(<ID> "Transaction id")),
                ),
        )
        .subcommand(table_args(
            Command::new("funds").about("Show aggregated mutual fund holdings"),
        ))
        .subcommand(
            Command::new("fund")
                .about("Add or delete a mutual fund transaction")
                .subcommand_required(true)
                .subcommand(transaction_args(
                    Command::new("add").about("Record a fund purchase"),
                    "Scheme code",
                ))
                .subcommand(
                    Command::new("delete")
                        .about("Delete a fund transaction")
                        .arg(arg!(<ID> "Transaction id")),
                ),
        )
        .subcommand(
            Command::new("allocation")
                .about("Show invested amount per instrument as a pie chart")
                .arg(arg!(--funds "Use mutual funds instead of stocks")),
        )
        .subcommand(Command::new("watchlists").about("List watchlists of the current portfolio"))
        .subcommand(
            Command::new("watchlist")
                .about("Show a watchlist")
                .arg(arg!(--name <NAME> "Watchlist name or id").required(false))
                .subcommand(
                    Command::new("create")
                        .about("Create a watchlist")
                        .arg(arg!(<NAME> "Watchlist name")),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Add or remove a ticker on a watchlist")
                .subcommand_required(true)
                .subcommand(
                    Command::new("add")
                        .arg(arg!(<TICKER> "Ticker symbol"))
                        .arg(arg!(--watchlist <NAME> "Watchlist name or id").required(false)),
                )
                .subcommand(
                    Command::new("remove")
                        .arg(arg!(<TICKER> "Ticker symbol"))
                        .arg(arg!(--watchlist <NAME> "Watchlist name or id").required(false)),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Search stocks, or mutual funds with --funds")
                .arg(arg!(<QUERY> "Symbol or name"))
                .arg(arg!(--funds "Search mutual fund schemes")),
        )
        .subcommand(
            Command::new("insight")
                .about("AI insight for a stock")
                .arg(arg!(<SYMBOL> "Ticker symbol")),
        )
        .subcommand(
            Command::new("research")
                .about("AI research report for a stock")
                .arg(arg!(<SYMBOL> "Ticker symbol")),
        )
        .subcommand(
            Command::new("copilot")
                .about("Ask the portfolio copilot")
                .arg(arg!(<MESSAGE> "Question")),
        )
        .subcommand(
            Command::new("theme")
                .about("Show or set the UI theme")
                .arg(arg!([THEME] "dark or light")),
        )
        .subcommand(
            Command::new("tui")
                .about("Open the interactive dashboard")
                .arg(arg!(--tab <TAB> "positions, funds or watchlist").required(false)),
        )
}

fn string_arg<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| eyre!("missing argument {id}"))
}

fn table_options(matches: &ArgMatches) -> Result<TableOptions> {
    let sort = match matches.get_one::<String>("sort") {
        Some(key) => key.parse::<SortKey>().map_err(|e| eyre!(e))?,
        None => SortKey::Name,
    };
    let direction = if matches.get_flag("desc") {
        SortDirection::Descending
    } else {
        SortDirection::Ascending
    };
    Ok(TableOptions {
        sort,
        direction,
        history: matches.get_flag("history"),
    })
}

fn transaction_form(matches: &ArgMatches) -> Result<TransactionForm> {
    Ok(TransactionForm::new(
        string_arg(matches, "INSTRUMENT")?,
        string_arg(matches, "QTY")?,
        string_arg(matches, "PRICE")?,
        string_arg(matches, "DATE")?,
    ))
}

fn open_store(ephemeral: bool) -> Result<Arc<dyn ClientStore>> {
    if ephemeral {
        return Ok(Arc::new(MemoryStore::default()));
    }
    let dir = Config::data_dir().wrap_err("Failed to locate the config directory")?;
    let store = SledStore::open(&dir.join("state")).wrap_err("Failed to open the session store")?;
    Ok(Arc::new(store))
}

async fn run(matches: ArgMatches) -> Result<()> {
    if let Some(("config", _)) = matches.subcommand() {
        let path = Config::path().wrap_err("Failed to locate the config file")?;
        println!("Your config file is located here: \n{}", path.display());
        return Ok(());
    }

    let cfg = Config::load().wrap_err("Failed to load config")?;
    let store = open_store(matches.get_flag("ephemeral"))?;
    let mut ctx = Ctx::new(cfg, store)?;

    match matches.subcommand() {
        Some(("login", m)) => {
            let password = match m.get_one::<String>("password") {
                Some(p) => p.clone(),
                None => commands::prompt_password()?,
            };
            commands::login(&mut ctx, string_arg(m, "EMAIL")?, &password).await?
        }
        Some(("signup", m)) => {
            let password = match m.get_one::<String>("password") {
                Some(p) => p.clone(),
                None => commands::prompt_password()?,
            };
            commands::signup(&mut ctx, string_arg(m, "NAME")?, string_arg(m, "EMAIL")?, &password).await?
        }
        Some(("google", m)) => commands::google_login(&mut ctx, string_arg(m, "CREDENTIAL")?).await?,
        Some(("logout", _)) => commands::logout(&mut ctx)?,
        Some(("whoami", _)) => commands::whoami(&ctx),
        Some(("portfolios", _)) => commands::list_portfolios(&mut ctx).await?,
        Some(("portfolio", m)) => match m.subcommand() {
            Some(("use", m)) => commands::use_portfolio(&mut ctx, string_arg(m, "ID")?).await?,
            Some(("create", m)) => commands::create_portfolio(&mut ctx, string_arg(m, "NAME")?).await?,
            Some(("delete", m)) => commands::delete_portfolio(&mut ctx, string_arg(m, "ID")?).await?,
            _ => unreachable!("subcommand_required"),
        },
        Some(("positions", m)) => {
            let symbol = m.get_one::<String>("symbol").map(|s| s.trim().to_uppercase());
            commands::show_positions(&mut ctx, symbol, &table_options(m)?).await?
        }
        Some(("position", m)) => match m.subcommand() {
            Some(("add", m)) => commands::add_position(&mut ctx, &transaction_form(m)?).await?,
            Some(("edit", m)) => {
                commands::edit_position(&mut ctx, string_arg(m, "ID")?, &transaction_form(m)?).await?
            }
            Some(("delete", m)) => commands::delete_position(&mut ctx, string_arg(m, "ID")?).await?,
            _ => unreachable!("subcommand_required"),
        },
        Some(("funds", m)) => commands::show_funds(&mut ctx, &table_options(m)?).await?,
        Some(("fund", m)) => match m.subcommand() {
            Some(("add", m)) => commands::add_fund(&mut ctx, &transaction_form(m)?).await?,
            Some(("delete", m)) => commands::delete_fund(&mut ctx, string_arg(m, "ID")?).await?,
            _ => unreachable!("subcommand_required"),
        },
        Some(("allocation", m)) => commands::show_allocation(&mut ctx, m.get_flag("funds")).await?,
        Some(("watchlists", _)) => commands::list_watchlists(&mut ctx).await?,
        Some(("watchlist", m)) => match m.subcommand() {
            Some(("create", c)) => commands::create_watchlist(&mut ctx, string_arg(c, "NAME")?).await?,
            _ => {
                let name = m.get_one::<String>("name").map(String::as_str);
                commands::show_watchlist(&mut ctx, name).await?
            }
        },
        Some(("watch", m)) => {
            let (add, m) = match m.subcommand() {
                Some(("add", m)) => (true, m),
                Some(("remove", m)) => (false, m),
                _ => unreachable!("subcommand_required"),
            };
            let watchlist = m.get_one::<String>("watchlist").map(String::as_str);
            commands::watch(&mut ctx, string_arg(m, "TICKER")?, watchlist, add).await?
        }
        Some(("search", m)) => commands::search(&ctx, string_arg(m, "QUERY")?, m.get_flag("funds")).await?,
        Some(("insight", m)) => commands::ai(&mut ctx, AiRequest::Insight(string_arg(m, "SYMBOL")?)).await?,
        Some(("research", m)) => commands::ai(&mut ctx, AiRequest::Research(string_arg(m, "SYMBOL")?)).await?,
        Some(("copilot", m)) => commands::ai(&mut ctx, AiRequest::Copilot(string_arg(m, "MESSAGE")?)).await?,
        Some(("theme", m)) => commands::theme(&mut ctx, m.get_one::<String>("THEME").map(String::as_str))?,
        Some(("tui", m)) => {
            let tab = match m.get_one::<String>("tab") {
                Some(t) => Some(t.parse::<Tab>().map_err(|e| eyre!(e))?),
                None => None,
            };
            let portfolio = ctx.current_portfolio().await?;
            let email = ctx.session.auth.user().map(|u| u.email.clone());
            let dir = Config::data_dir()?;
            logging::init_file(&dir).wrap_err("Failed to open the log file")?;
            tui::run_tui(ctx.api.clone(), portfolio, email, &ctx.cfg, ctx.session.theme, tab).await?
        }
        _ => {
            cli().print_help()?;
        }
    }
    Ok(())
}

fn is_unauthorized(report: &eyre::Report) -> bool {
    report
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)))
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    if !matches!(matches.subcommand_name(), Some("tui")) {
        logging::init_stderr();
    }

    if let Err(report) = run(matches).await {
        eprintln!("{} {report:#}", "error:".red().bold());
        if is_unauthorized(&report) {
            eprintln!("Your session has expired. Run `portfolio_buzz login <EMAIL>` again.");
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli() {
        let matches = cli().get_matches_from(vec!["portfolio_buzz", "positions", "--sort", "pnl", "--desc"]);
        assert_eq!(matches.subcommand_name(), Some("positions"));
        let (_, m) = matches.subcommand().unwrap();
        let opts = table_options(m).unwrap();
        assert_eq!(opts.sort, SortKey::PnlPercent);
        assert_eq!(opts.direction, SortDirection::Descending);
        assert!(!opts.history);
    }

    #[test]
    fn test_cli_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_position_add_args() {
        let matches = cli().get_matches_from(vec![
            "portfolio_buzz",
            "position",
            "add",
            "infy",
            "10",
            "1450.5",
            "2024-03-01",
        ]);
        let (_, m) = matches.subcommand().unwrap();
        let (_, add) = m.subcommand().unwrap();
        let tx = transaction_form(add).unwrap().validate().unwrap();
        assert_eq!(tx.symbol, "INFY");
        assert_eq!(tx.quantity, 10.0);
    }

    #[test]
    fn test_unknown_sort_key_is_an_error() {
        let matches = cli().get_matches_from(vec!["portfolio_buzz", "funds", "--sort", "color"]);
        let (_, m) = matches.subcommand().unwrap();
        assert!(table_options(m).is_err());
    }

    #[test]
    fn test_unauthorized_detected_through_context() {
        let report = eyre::Report::new(ApiError::Unauthorized).wrap_err("Failed to load portfolios");
        assert!(is_unauthorized(&report));
        assert!(!is_unauthorized(&eyre!("other")));
    }
}

//! Session-wide selection state.
//!
//! One `Session` is built at startup from the client store and handed by
//! reference to whatever needs the current user, portfolio or watchlist.

use crate::error::StoreError;
use crate::models::{AuthPayload, Portfolio, User, Watchlist};
use crate::store::{
    get_json, set_json, ClientStore, CURRENT_PORTFOLIO_KEY, THEME_KEY, TOKEN_KEY, USER_KEY,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    token: Option<String>,
    user: Option<User>,
}

impl AuthState {
    pub fn restore(store: &dyn ClientStore) -> Result<Self, StoreError> {
        let token = store.get(TOKEN_KEY)?.filter(|t| !t.is_empty());
        let user = match get_json::<User>(store, USER_KEY) {
            Ok(user) => user,
            Err(StoreError::Json { .. }) => {
                warn!("discarding unreadable stored user");
                store.remove(USER_KEY)?;
                None
            }
            Err(e) => return Err(e),
        };
        Ok(AuthState { token, user })
    }

    pub fn login(&mut self, store: &dyn ClientStore, payload: AuthPayload) -> Result<(), StoreError> {
        store.set(TOKEN_KEY, &payload.token)?;
        set_json(store, USER_KEY, &payload.user)?;
        self.token = Some(payload.token);
        self.user = Some(payload.user);
        Ok(())
    }

    pub fn logout(&mut self, store: &dyn ClientStore) -> Result<(), StoreError> {
        store.remove(TOKEN_KEY)?;
        store.remove(USER_KEY)?;
        self.token = None;
        self.user = None;
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioSelection {
    current: Option<Portfolio>,
}

impl PortfolioSelection {
    pub fn restore(store: &dyn ClientStore) -> Result<Self, StoreError> {
        match get_json::<Portfolio>(store, CURRENT_PORTFOLIO_KEY) {
            Ok(current) => Ok(PortfolioSelection { current }),
            Err(StoreError::Json { .. }) => {
                warn!("discarding unreadable stored portfolio");
                store.remove(CURRENT_PORTFOLIO_KEY)?;
                Ok(PortfolioSelection::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn set_current_portfolio(
        &mut self,
        store: &dyn ClientStore,
        portfolio: Portfolio,
    ) -> Result<(), StoreError> {
        set_json(store, CURRENT_PORTFOLIO_KEY, &portfolio)?;
        self.current = Some(portfolio);
        Ok(())
    }

    /// Reconcile the selection with a freshly fetched portfolio list.
    ///
    /// Keeps the current pick when it still exists, otherwise falls back to the
    /// server default, then to the first entry. Returns true when the selected
    /// portfolio id changed.
    pub fn resolve(
        &mut self,
        store: &dyn ClientStore,
        portfolios: &[Portfolio],
    ) -> Result<bool, StoreError> {
        let previous = self.current_id().map(str::to_string);

        let next = previous
            .as_deref()
            .and_then(|id| portfolios.iter().find(|p| p.portfolio_id == id))
            .or_else(|| portfolios.iter().find(|p| p.is_default))
            .or_else(|| portfolios.first())
            .cloned();

        match next {
            Some(portfolio) => {
                if let Some(stale) = previous.as_deref() {
                    if stale != portfolio.portfolio_id {
                        warn!(stale, fallback = %portfolio.portfolio_id, "selected portfolio no longer exists");
                    }
                }
                if self.current.as_ref() != Some(&portfolio) {
                    self.set_current_portfolio(store, portfolio)?;
                }
            }
            None => {
                store.remove(CURRENT_PORTFOLIO_KEY)?;
                self.current = None;
            }
        }

        Ok(previous.as_deref() != self.current_id())
    }

    pub fn clear(&mut self, store: &dyn ClientStore) -> Result<(), StoreError> {
        store.remove(CURRENT_PORTFOLIO_KEY)?;
        self.current = None;
        Ok(())
    }

    pub fn current(&self) -> Option<&Portfolio> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|p| p.portfolio_id.as_str())
    }
}

/// In-memory only; a fresh run starts from the default watchlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchlistSelection {
    current: Option<String>,
}

impl WatchlistSelection {
    pub fn resolve(&mut self, watchlists: &[Watchlist]) -> Option<&str> {
        let keep = self
            .current
            .as_deref()
            .is_some_and(|id| watchlists.iter().any(|w| w.watchlist_id == id));
        if !keep {
            self.current = watchlists
                .iter()
                .find(|w| w.is_default)
                .or_else(|| watchlists.first())
                .map(|w| w.watchlist_id.clone());
        }
        self.current.as_deref()
    }

    pub fn select(&mut self, watchlist_id: &str) {
        self.current = Some(watchlist_id.to_string());
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            _ => Err(format!("Unknown theme: '{s}'")),
        }
    }
}

pub struct Session {
    store: Arc<dyn ClientStore>,
    pub auth: AuthState,
    pub portfolio: PortfolioSelection,
    pub watchlist: WatchlistSelection,
    pub theme: Theme,
}

impl Session {
    pub fn restore(store: Arc<dyn ClientStore>) -> Result<Self, StoreError> {
        let auth = AuthState::restore(store.as_ref())?;
        let portfolio = PortfolioSelection::restore(store.as_ref())?;
        let theme = store
            .get(THEME_KEY)?
            .and_then(|t| Theme::from_str(&t).ok())
            .unwrap_or_default();
        debug!(
            authenticated = auth.is_authenticated(),
            portfolio = ?portfolio.current_id(),
            "session restored"
        );
        Ok(Session {
            store,
            auth,
            portfolio,
            watchlist: WatchlistSelection::default(),
            theme,
        })
    }

    pub fn login(&mut self, payload: AuthPayload) -> Result<(), StoreError> {
        self.auth.login(self.store.as_ref(), payload)
    }

    /// Forget the user and everything scoped to them.
    pub fn logout(&mut self) -> Result<(), StoreError> {
        self.auth.logout(self.store.as_ref())?;
        self.portfolio.clear(self.store.as_ref())?;
        self.watchlist.reset();
        Ok(())
    }

    pub fn set_current_portfolio(&mut self, portfolio: Portfolio) -> Result<(), StoreError> {
        let changed = self.portfolio.current_id() != Some(portfolio.portfolio_id.as_str());
        self.portfolio
            .set_current_portfolio(self.store.as_ref(), portfolio)?;
        if changed {
            self.watchlist.reset();
        }
        Ok(())
    }

    pub fn resolve_portfolios(&mut self, portfolios: &[Portfolio]) -> Result<(), StoreError> {
        if self.portfolio.resolve(self.store.as_ref(), portfolios)? {
            self.watchlist.reset();
        }
        Ok(())
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<(), StoreError> {
        self.store.set(THEME_KEY, theme.as_str())?;
        self.theme = theme;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn portfolio(id: &str, is_default: bool) -> Portfolio {
        Portfolio {
            portfolio_id: id.to_string(),
            name: format!("Portfolio {id}"),
            is_default,
        }
    }

    fn watchlist(id: &str, is_default: bool) -> Watchlist {
        Watchlist {
            watchlist_id: id.to_string(),
            name: id.to_string(),
            is_default,
            portfolio_id: "p1".to_string(),
        }
    }

    #[test]
    fn test_selected_portfolio_survives_reload() {
        let store: Arc<dyn ClientStore> = Arc::new(MemoryStore::default());
        let chosen = portfolio("p2", false);
        {
            let mut session = Session::restore(store.clone()).unwrap();
            assert!(session.portfolio.current().is_none());
            session.set_current_portfolio(chosen.clone()).unwrap();
        }
        let reloaded = Session::restore(store).unwrap();
        assert_eq!(reloaded.portfolio.current(), Some(&chosen));
    }

    #[test]
    fn test_resolve_defaults_when_unset() {
        let store = MemoryStore::default();
        let mut selection = PortfolioSelection::default();
        let list = [portfolio("a", false), portfolio("b", true)];
        assert!(selection.resolve(&store, &list).unwrap());
        assert_eq!(selection.current_id(), Some("b"));
        // persisted as well
        let stored: Option<Portfolio> = get_json(&store, CURRENT_PORTFOLIO_KEY).unwrap();
        assert_eq!(stored.unwrap().portfolio_id, "b");

        let mut selection = PortfolioSelection::default();
        selection
            .resolve(&store, &[portfolio("x", false), portfolio("y", false)])
            .unwrap();
        assert_eq!(selection.current_id(), Some("x"));
    }

    #[test]
    fn test_resolve_keeps_existing_choice() {
        let store = MemoryStore::default();
        let mut selection = PortfolioSelection::default();
        selection
            .set_current_portfolio(&store, portfolio("a", false))
            .unwrap();
        let changed = selection
            .resolve(&store, &[portfolio("a", false), portfolio("b", true)])
            .unwrap();
        assert!(!changed);
        assert_eq!(selection.current_id(), Some("a"));
    }

    #[test]
    fn test_resolve_replaces_stale_choice() {
        let store = MemoryStore::default();
        let mut selection = PortfolioSelection::default();
        selection
            .set_current_portfolio(&store, portfolio("gone", false))
            .unwrap();
        let changed = selection
            .resolve(&store, &[portfolio("a", false), portfolio("b", true)])
            .unwrap();
        assert!(changed);
        assert_eq!(selection.current_id(), Some("b"));
        let stored: Option<Portfolio> = get_json(&store, CURRENT_PORTFOLIO_KEY).unwrap();
        assert_eq!(stored.unwrap().portfolio_id, "b");

        assert!(selection.resolve(&store, &[]).unwrap());
        assert_eq!(selection.current(), None);
        assert_eq!(store.get(CURRENT_PORTFOLIO_KEY).unwrap(), None);
    }

    #[test]
    fn test_resolve_refreshes_renamed_portfolio() {
        let store = MemoryStore::default();
        let mut selection = PortfolioSelection::default();
        selection
            .set_current_portfolio(&store, portfolio("a", false))
            .unwrap();
        let renamed = Portfolio {
            name: "Renamed".to_string(),
            ..portfolio("a", false)
        };
        selection.resolve(&store, &[renamed.clone()]).unwrap();
        assert_eq!(selection.current(), Some(&renamed));
    }

    #[test]
    fn test_corrupt_portfolio_is_dropped() {
        let store = MemoryStore::default();
        store.set(CURRENT_PORTFOLIO_KEY, "not json").unwrap();
        let selection = PortfolioSelection::restore(&store).unwrap();
        assert!(selection.current().is_none());
        assert_eq!(store.get(CURRENT_PORTFOLIO_KEY).unwrap(), None);
    }

    #[test]
    fn test_watchlist_selection() {
        let mut selection = WatchlistSelection::default();
        let lists = [watchlist("Default", true), watchlist("Growth", false)];
        assert_eq!(selection.resolve(&lists), Some("Default"));
        selection.select("Growth");
        assert_eq!(selection.resolve(&lists), Some("Growth"));
        // deleted watchlist falls back to the default
        assert_eq!(selection.resolve(&lists[..1]), Some("Default"));
        assert_eq!(selection.resolve(&[]), None);
    }

    #[test]
    fn test_login_logout() {
        let store: Arc<dyn ClientStore> = Arc::new(MemoryStore::default());
        let mut session = Session::restore(store.clone()).unwrap();
        session
            .login(AuthPayload {
                token: "jwt".to_string(),
                user: User {
                    id: "u1".to_string(),
                    email: "a@b.c".to_string(),
                    name: "A".to_string(),
                },
            })
            .unwrap();
        session.set_current_portfolio(portfolio("p1", true)).unwrap();
        session.watchlist.select("w1");

        let restored = Session::restore(store.clone()).unwrap();
        assert!(restored.auth.is_authenticated());
        assert_eq!(restored.auth.user().map(|u| u.email.as_str()), Some("a@b.c"));
        // watchlist choice is not persisted
        assert_eq!(restored.watchlist.current_id(), None);

        session.logout().unwrap();
        let restored = Session::restore(store).unwrap();
        assert!(!restored.auth.is_authenticated());
        assert!(restored.portfolio.current().is_none());
    }

    #[test]
    fn test_switching_portfolio_resets_watchlist() {
        let store: Arc<dyn ClientStore> = Arc::new(MemoryStore::default());
        let mut session = Session::restore(store).unwrap();
        session.set_current_portfolio(portfolio("p1", true)).unwrap();
        session.watchlist.select("w1");
        session.set_current_portfolio(portfolio("p1", true)).unwrap();
        assert_eq!(session.watchlist.current_id(), Some("w1"));
        session.set_current_portfolio(portfolio("p2", false)).unwrap();
        assert_eq!(session.watchlist.current_id(), None);
    }

    #[test]
    fn test_theme_persisted() {
        let store: Arc<dyn ClientStore> = Arc::new(MemoryStore::default());
        let mut session = Session::restore(store.clone()).unwrap();
        assert_eq!(session.theme, Theme::Dark);
        session.set_theme(Theme::Light).unwrap();
        assert_eq!(Session::restore(store).unwrap().theme, Theme::Light);
    }
}

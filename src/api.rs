//! Portfolio Buzz REST client.
//!
//! Every endpoint answers with the same envelope:
//! `{ "success": bool, "data": ..., "error": "..." }`.
//! The client never changes local state after a mutation; callers re-fetch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::holdings::MarketSnapshot;
use crate::models::{AuthPayload, FundHit, Portfolio, Stock, Watchlist, WatchlistItem};
use crate::transaction::{NewFundTransaction, NewTransaction, Transaction};

#[async_trait]
pub trait PortfolioApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, ApiError>;
    async fn signup(&self, name: &str, email: &str, password: &str) -> Result<AuthPayload, ApiError>;
    async fn google_login(&self, credential: &str) -> Result<AuthPayload, ApiError>;

    async fn autocomplete(&self, query: &str, limit: usize) -> Result<Vec<Stock>, ApiError>;
    async fn search_funds(&self, query: &str, limit: usize) -> Result<Vec<FundHit>, ApiError>;

    async fn portfolios(&self) -> Result<Vec<Portfolio>, ApiError>;
    async fn create_portfolio(&self, name: &str) -> Result<Portfolio, ApiError>;
    async fn delete_portfolio(&self, portfolio_id: &str) -> Result<(), ApiError>;

    async fn watchlists(&self, portfolio_id: &str) -> Result<Vec<Watchlist>, ApiError>;
    async fn create_watchlist(&self, portfolio_id: &str, name: &str) -> Result<Watchlist, ApiError>;
    async fn watchlist_items(&self, watchlist_id: &str) -> Result<Vec<WatchlistItem>, ApiError>;
    async fn add_to_watchlist(&self, watchlist_id: &str, ticker: &str) -> Result<(), ApiError>;
    async fn remove_from_watchlist(&self, watchlist_id: &str, ticker: &str) -> Result<(), ApiError>;

    async fn positions(
        &self,
        portfolio_id: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<Transaction>, ApiError>;
    async fn market_prices(
        &self,
        portfolio_id: &str,
    ) -> Result<HashMap<String, MarketSnapshot>, ApiError>;
    async fn add_position(&self, portfolio_id: &str, tx: &NewTransaction) -> Result<(), ApiError>;
    async fn update_position(
        &self,
        portfolio_id: &str,
        position_id: &str,
        tx: &NewTransaction,
    ) -> Result<(), ApiError>;
    async fn delete_position(&self, portfolio_id: &str, position_id: &str) -> Result<(), ApiError>;

    async fn fund_positions(&self, email: &str, portfolio_id: &str) -> Result<Vec<Transaction>, ApiError>;
    async fn fund_prices(
        &self,
        email: &str,
        portfolio_id: &str,
    ) -> Result<HashMap<String, MarketSnapshot>, ApiError>;
    async fn add_fund_position(
        &self,
        email: &str,
        portfolio_id: &str,
        tx: &NewFundTransaction,
    ) -> Result<(), ApiError>;
    async fn delete_fund_position(
        &self,
        email: &str,
        portfolio_id: &str,
        position_id: &str,
    ) -> Result<(), ApiError>;

    async fn ai_insight(&self, symbol: &str) -> Result<String, ApiError>;
    async fn stock_research(&self, symbol: &str) -> Result<String, ApiError>;
    async fn copilot(&self, message: &str, portfolio_id: Option<&str>) -> Result<String, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Turn a status code and body into the payload or a typed error.
pub fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ApiError> {
    if status == 401 {
        return Err(ApiError::Unauthorized);
    }

    let envelope: Envelope<Value> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if (200..300).contains(&status) => return Err(ApiError::Decode(e.to_string())),
        Err(_) => {
            return Err(ApiError::Http {
                status,
                body: body.chars().take(200).collect(),
            })
        }
    };

    if !envelope.success {
        let message = envelope
            .error
            .or(envelope.message)
            .unwrap_or_else(|| format!("Request failed with HTTP {status}"));
        return Err(ApiError::Backend(message));
    }

    let data = envelope.data.unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|e| ApiError::Decode(e.to_string()))
}

/// AI endpoints return either a bare string or an object wrapping one.
pub fn content_text(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["html", "content", "insight", "research", "response", "answer"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| serde_json::to_string_pretty(data).unwrap_or_default()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

fn build_client(timeout: Duration, user_agent: &str) -> Result<Client, ApiError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {e}")))
}

pub struct HttpApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Network(format!("Invalid API base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Network(format!("Invalid API base URL '{base_url}'")));
        }

        let client = build_client(timeout, USER_AGENT)?;

        Ok(HttpApi {
            client,
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<&str>) -> Self {
        self.token = token.map(str::to_string);
        self
    }

    /// Build `{base}/seg/seg/...`, percent-encoding each segment.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let request = self.authorized(request);
        let response = request.send().await.map_err(|e| {
            warn!("request failed: {e}");
            if e.is_timeout() {
                ApiError::Network("Request timed out".to_string())
            } else {
                ApiError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let url = response.url().path().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("Failed to read response: {e}")))?;
        debug!(%url, status, bytes = body.len(), "api response");

        decode_envelope(status, &body).inspect_err(|e| warn!(%url, "api error: {e}"))
    }

    async fn send_unit(&self, request: RequestBuilder) -> Result<(), ApiError> {
        self.send::<Value>(request).await.map(|_| ())
    }

    async fn send_content(&self, request: RequestBuilder) -> Result<String, ApiError> {
        self.send::<Value>(request).await.map(|data| content_text(&data))
    }

    fn fund_url(&self, email: &str, portfolio_id: &str, rest: &[&str]) -> Url {
        let mut segments = vec!["api", email, "mf-portfolio", portfolio_id];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }
}

#[async_trait]
impl PortfolioApi for HttpApi {
    async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, ApiError> {
        let url = self.url(&["api", "auth", "login"]);
        self.send(self.client.post(url).json(&json!({ "email": email, "password": password })))
            .await
    }

    async fn signup(&self, name: &str, email: &str, password: &str) -> Result<AuthPayload, ApiError> {
        let url = self.url(&["api", "auth", "signup"]);
        let body = json!({ "name": name, "email": email, "password": password });
        self.send(self.client.post(url).json(&body)).await
    }

    async fn google_login(&self, credential: &str) -> Result<AuthPayload, ApiError> {
        let url = self.url(&["api", "auth", "google"]);
        self.send(self.client.post(url).json(&json!({ "credential": credential })))
            .await
    }

    async fn autocomplete(&self, query: &str, limit: usize) -> Result<Vec<Stock>, ApiError> {
        let url = self.url(&["api", "search", "autocomplete"]);
        let limit = limit.to_string();
        self.send(self.client.get(url).query(&[("q", query), ("limit", limit.as_str())]))
            .await
    }

    async fn search_funds(&self, query: &str, limit: usize) -> Result<Vec<FundHit>, ApiError> {
        let url = self.url(&["api", "mf", "search"]);
        let limit = limit.to_string();
        self.send(self.client.get(url).query(&[("q", query), ("limit", limit.as_str())]))
            .await
    }

    async fn portfolios(&self) -> Result<Vec<Portfolio>, ApiError> {
        let url = self.url(&["api", "portfolios"]);
        self.send(self.client.get(url)).await
    }

    async fn create_portfolio(&self, name: &str) -> Result<Portfolio, ApiError> {
        let url = self.url(&["api", "portfolios"]);
        self.send(self.client.post(url).json(&json!({ "name": name })))
            .await
    }

    async fn delete_portfolio(&self, portfolio_id: &str) -> Result<(), ApiError> {
        let url = self.url(&["api", "portfolios", portfolio_id]);
        self.send_unit(self.client.delete(url)).await
    }

    async fn watchlists(&self, portfolio_id: &str) -> Result<Vec<Watchlist>, ApiError> {
        let url = self.url(&["api", "watchlists"]);
        self.send(self.client.get(url).query(&[("portfolio_id", portfolio_id)]))
            .await
    }

    async fn create_watchlist(&self, portfolio_id: &str, name: &str) -> Result<Watchlist, ApiError> {
        let url = self.url(&["api", "watchlists"]);
        let body = json!({ "name": name, "portfolio_id": portfolio_id });
        self.send(self.client.post(url).json(&body)).await
    }

    async fn watchlist_items(&self, watchlist_id: &str) -> Result<Vec<WatchlistItem>, ApiError> {
        let url = self.url(&["api", "watchlist"]);
        self.send(self.client.get(url).query(&[("watchlist_id", watchlist_id)]))
            .await
    }

    async fn add_to_watchlist(&self, watchlist_id: &str, ticker: &str) -> Result<(), ApiError> {
        let url = self.url(&["api", "watchlist"]);
        let body = json!({ "ticker": ticker, "watchlist_id": watchlist_id });
        self.send_unit(self.client.post(url).json(&body)).await
    }

    async fn remove_from_watchlist(&self, watchlist_id: &str, ticker: &str) -> Result<(), ApiError> {
        let url = self.url(&["api", "watchlist", ticker]);
        self.send_unit(self.client.delete(url).query(&[("watchlist_id", watchlist_id)]))
            .await
    }

    async fn positions(
        &self,
        portfolio_id: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<Transaction>, ApiError> {
        let url = self.url(&["api", "portfolio", "positions"]);
        let mut request = self.client.get(url).query(&[("portfolio_id", portfolio_id)]);
        if let Some(symbol) = symbol {
            request = request.query(&[("symbol", symbol)]);
        }
        self.send(request).await
    }

    async fn market_prices(
        &self,
        portfolio_id: &str,
    ) -> Result<HashMap<String, MarketSnapshot>, ApiError> {
        let url = self.url(&["api", "portfolio", "prices"]);
        self.send(self.client.get(url).query(&[("portfolio_id", portfolio_id)]))
            .await
    }

    async fn add_position(&self, portfolio_id: &str, tx: &NewTransaction) -> Result<(), ApiError> {
        let url = self.url(&["api", "portfolio", "positions"]);
        let mut body = serde_json::to_value(tx).map_err(|e| ApiError::Decode(e.to_string()))?;
        body["portfolio_id"] = json!(portfolio_id);
        self.send_unit(self.client.post(url).json(&body)).await
    }

    async fn update_position(
        &self,
        portfolio_id: &str,
        position_id: &str,
        tx: &NewTransaction,
    ) -> Result<(), ApiError> {
        let url = self.url(&["api", "portfolio", "positions", position_id]);
        let mut body = serde_json::to_value(tx).map_err(|e| ApiError::Decode(e.to_string()))?;
        body["portfolio_id"] = json!(portfolio_id);
        self.send_unit(self.client.put(url).json(&body)).await
    }

    async fn delete_position(&self, portfolio_id: &str, position_id: &str) -> Result<(), ApiError> {
        let url = self.url(&["api", "portfolio", "positions", position_id]);
        self.send_unit(self.client.delete(url).query(&[("portfolio_id", portfolio_id)]))
            .await
    }

    async fn fund_positions(&self, email: &str, portfolio_id: &str) -> Result<Vec<Transaction>, ApiError> {
        let url = self.fund_url(email, portfolio_id, &["positions"]);
        self.send(self.client.get(url)).await
    }

    async fn fund_prices(
        &self,
        email: &str,
        portfolio_id: &str,
    ) -> Result<HashMap<String, MarketSnapshot>, ApiError> {
        let url = self.fund_url(email, portfolio_id, &["prices"]);
        self.send(self.client.get(url)).await
    }

    async fn add_fund_position(
        &self,
        email: &str,
        portfolio_id: &str,
        tx: &NewFundTransaction,
    ) -> Result<(), ApiError> {
        let url = self.fund_url(email, portfolio_id, &["positions"]);
        self.send_unit(self.client.post(url).json(tx)).await
    }

    async fn delete_fund_position(
        &self,
        email: &str,
        portfolio_id: &str,
        position_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.fund_url(email, portfolio_id, &["positions", position_id]);
        self.send_unit(self.client.delete(url)).await
    }

    async fn ai_insight(&self, symbol: &str) -> Result<String, ApiError> {
        let url = self.url(&["api", "ai-insight"]);
        self.send_content(self.client.post(url).json(&json!({ "symbol": symbol })))
            .await
    }

    async fn stock_research(&self, symbol: &str) -> Result<String, ApiError> {
        let url = self.url(&["api", "stock-research"]);
        self.send_content(self.client.post(url).json(&json!({ "symbol": symbol })))
            .await
    }

    async fn copilot(&self, message: &str, portfolio_id: Option<&str>) -> Result<String, ApiError> {
        let url = self.url(&["api", "copilot"]);
        let body = json!({ "message": message, "portfolio_id": portfolio_id });
        self.send_content(self.client.post(url).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction_errors_surface() {
        assert!(build_client(Duration::from_secs(5), USER_AGENT).is_ok());
        let err = build_client(Duration::from_secs(5), "bad\nagent").unwrap_err();
        assert!(err.to_string().contains("Failed to build HTTP client"));

        assert!(HttpApi::new("http://localhost:5000", Duration::from_secs(5)).is_ok());
        assert!(matches!(
            HttpApi::new("not a url", Duration::from_secs(5)),
            Err(ApiError::Network(_))
        ));
    }

    #[test]
    fn test_envelope_success() {
        let body = r#"{"success": true, "data": [{"portfolio_id": 1, "name": "Main", "is_default": true}]}"#;
        let portfolios: Vec<Portfolio> = decode_envelope(200, body).unwrap();
        assert_eq!(portfolios.len(), 1);
        assert_eq!(portfolios[0].portfolio_id, "1");
    }

    #[test]
    fn test_envelope_backend_error() {
        let body = r#"{"success": false, "error": "Ticker already in watchlist"}"#;
        let err = decode_envelope::<Value>(400, body).unwrap_err();
        assert!(matches!(err, ApiError::Backend(ref m) if m == "Ticker already in watchlist"));

        let body = r#"{"success": false, "message": "Invalid credentials"}"#;
        let err = decode_envelope::<Value>(200, body).unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[test]
    fn test_envelope_transport_shapes() {
        assert!(matches!(
            decode_envelope::<Value>(401, "{}"),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            decode_envelope::<Value>(502, "<html>Bad gateway</html>"),
            Err(ApiError::Http { status: 502, .. })
        ));
        assert!(matches!(
            decode_envelope::<Value>(200, "not json"),
            Err(ApiError::Decode(_))
        ));
        assert!(matches!(
            decode_envelope::<Vec<Portfolio>>(200, r#"{"success": true, "data": {"oops": 1}}"#),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn test_envelope_without_data() {
        let unit: Value = decode_envelope(200, r#"{"success": true}"#).unwrap();
        assert_eq!(unit, Value::Null);
    }

    #[test]
    fn test_content_text() {
        assert_eq!(content_text(&json!("plain")), "plain");
        assert_eq!(content_text(&json!({"html": "<p>hi</p>"})), "<p>hi</p>");
        assert_eq!(content_text(&json!({"answer": "42"})), "42");
        assert_eq!(content_text(&Value::Null), "");
    }

    #[test]
    fn test_url_encodes_path_segments() {
        let api = HttpApi::new("http://localhost:5000/", Duration::from_secs(5)).unwrap();
        let url = api.fund_url("a b@example.com", "p1", &["positions"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/a%20b@example.com/mf-portfolio/p1/positions"
        );
        let url = api.url(&["api", "watchlist", "M&M"]);
        assert_eq!(url.path(), "/api/watchlist/M&M");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpApi::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpApi::new("mailto:x@y.z", Duration::from_secs(1)).is_err());
    }
}

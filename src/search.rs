//! Typeahead search shared by every "find an instrument" prompt.
//!
//! The UI side (`Typeahead`) owns the query, the result list and the cursor.
//! Each edit of the query gets a new sequence number. The async side
//! (`search_worker`) debounces those requests and issues one backend call per
//! burst of typing. A response is only applied if it carries the latest
//! sequence number, so a slow answer to an old query cannot overwrite a newer one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::PortfolioApi;
use crate::error::ApiError;
use crate::models::{FundHit, SearchItem, Stock};

#[async_trait]
pub trait SearchSource: Send + Sync + 'static {
    type Item: SearchItem;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Self::Item>, ApiError>;
}

/// Stock tickers via `/api/search/autocomplete`.
pub struct StockSearch {
    api: Arc<dyn PortfolioApi>,
}

impl StockSearch {
    pub fn new(api: Arc<dyn PortfolioApi>) -> Self {
        StockSearch { api }
    }
}

#[async_trait]
impl SearchSource for StockSearch {
    type Item = Stock;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Stock>, ApiError> {
        self.api.autocomplete(query, limit).await
    }
}

/// Mutual-fund schemes via `/api/mf/search`.
pub struct FundSearch {
    api: Arc<dyn PortfolioApi>,
}

impl FundSearch {
    pub fn new(api: Arc<dyn PortfolioApi>) -> Self {
        FundSearch { api }
    }
}

#[async_trait]
impl SearchSource for FundSearch {
    type Item = FundHit;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<FundHit>, ApiError> {
        self.api.search_funds(query, limit).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub debounce: Duration,
    pub min_query_len: usize,
    pub limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            debounce: Duration::from_millis(300),
            min_query_len: 1,
            limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub seq: u64,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct SearchResponse<T> {
    pub seq: u64,
    pub query: String,
    pub outcome: Result<Vec<T>, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchStatus {
    /// Query too short; nothing requested.
    Idle,
    Loading,
    Ready,
    Empty,
    Failed(String),
}

fn query_len(query: &str) -> usize {
    query.trim().chars().count()
}

#[derive(Debug, Clone)]
pub struct Typeahead<T> {
    query: String,
    results: Vec<T>,
    cursor: usize,
    status: SearchStatus,
    latest_seq: u64,
    min_query_len: usize,
    open: bool,
}

impl<T: SearchItem> Typeahead<T> {
    pub fn new(min_query_len: usize) -> Self {
        Typeahead {
            query: String::new(),
            results: Vec::new(),
            cursor: 0,
            status: SearchStatus::Idle,
            latest_seq: 0,
            min_query_len,
            open: false,
        }
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    /// Escape: hide the prompt and forget the query. Late responses are dropped.
    pub fn close(&mut self) {
        self.open = false;
        self.query.clear();
        self.results.clear();
        self.cursor = 0;
        self.status = SearchStatus::Idle;
        self.latest_seq += 1;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn results(&self) -> &[T] {
        &self.results
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn status(&self) -> &SearchStatus {
        &self.status
    }

    /// Replace the query. Returns the request to hand to the worker.
    pub fn set_query(&mut self, query: &str) -> SearchRequest {
        self.query = query.to_string();
        self.latest_seq += 1;
        self.cursor = 0;
        if query_len(&self.query) < self.min_query_len {
            self.results.clear();
            self.status = SearchStatus::Idle;
        } else {
            self.status = SearchStatus::Loading;
        }
        SearchRequest {
            seq: self.latest_seq,
            query: self.query.clone(),
        }
    }

    pub fn push_char(&mut self, c: char) -> SearchRequest {
        let mut query = self.query.clone();
        query.push(c);
        self.set_query(&query)
    }

    /// `None` when the query was already empty.
    pub fn pop_char(&mut self) -> Option<SearchRequest> {
        let mut query = self.query.clone();
        query.pop()?;
        Some(self.set_query(&query))
    }

    /// Apply a worker response. Returns false when it was stale and dropped.
    pub fn apply(&mut self, response: SearchResponse<T>) -> bool {
        if response.seq != self.latest_seq {
            debug!(
                seq = response.seq,
                latest = self.latest_seq,
                "dropping stale search response"
            );
            return false;
        }
        match response.outcome {
            Ok(results) => {
                self.status = if results.is_empty() {
                    SearchStatus::Empty
                } else {
                    SearchStatus::Ready
                };
                self.results = results;
            }
            Err(message) => {
                self.results.clear();
                self.status = SearchStatus::Failed(message);
            }
        }
        self.cursor = 0;
        true
    }

    pub fn move_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        if self.cursor + 1 < self.results.len() {
            self.cursor += 1;
        }
    }

    pub fn selected(&self) -> Option<&T> {
        self.results.get(self.cursor)
    }

    /// Enter: take the highlighted result and close the prompt.
    pub fn commit(&mut self) -> Option<T> {
        let chosen = self.selected().cloned()?;
        self.close();
        Some(chosen)
    }
}

/// Debounce incoming requests and run one search per quiet period.
///
/// Exits when either channel closes.
pub async fn search_worker<S: SearchSource>(
    source: Arc<S>,
    settings: SearchSettings,
    mut requests: mpsc::UnboundedReceiver<SearchRequest>,
    responses: mpsc::UnboundedSender<SearchResponse<S::Item>>,
) {
    while let Some(mut pending) = requests.recv().await {
        // keep only the newest request until the input goes quiet
        loop {
            tokio::select! {
                next = requests.recv() => match next {
                    Some(request) => pending = request,
                    None => return,
                },
                _ = tokio::time::sleep(settings.debounce) => break,
            }
        }

        if query_len(&pending.query) < settings.min_query_len {
            continue;
        }

        debug!(seq = pending.seq, query = %pending.query, "searching");
        let outcome = source
            .search(pending.query.trim(), settings.limit)
            .await
            .map_err(|e| {
                warn!(query = %pending.query, "search failed: {e}");
                e.to_string()
            });

        let response = SearchResponse {
            seq: pending.seq,
            query: pending.query,
            outcome,
        };
        if responses.send(response).is_err() {
            return;
        }
    }
}

pub struct SearchHandle<T> {
    pub requests: mpsc::UnboundedSender<SearchRequest>,
    pub responses: mpsc::UnboundedReceiver<SearchResponse<T>>,
}

pub fn spawn_search_worker<S: SearchSource>(
    source: Arc<S>,
    settings: SearchSettings,
) -> SearchHandle<S::Item> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    tokio::spawn(search_worker(source, settings, request_rx, response_tx));
    SearchHandle {
        requests: request_tx,
        responses: response_rx,
    }
}

/// Run a single query through the worker and wait for its answer.
pub async fn search_once<S: SearchSource>(
    source: Arc<S>,
    settings: SearchSettings,
    query: &str,
) -> Result<Vec<S::Item>, ApiError> {
    let mut typeahead = Typeahead::new(settings.min_query_len);
    let request = typeahead.set_query(query);
    if typeahead.status() == &SearchStatus::Idle {
        return Ok(Vec::new());
    }

    let mut handle = spawn_search_worker(source, settings);
    handle
        .requests
        .send(request)
        .map_err(|_| ApiError::Network("search worker stopped".to_string()))?;

    while let Some(response) = handle.responses.recv().await {
        if typeahead.apply(response) {
            return match typeahead.status() {
                SearchStatus::Failed(message) => Err(ApiError::Backend(message.clone())),
                _ => Ok(typeahead.results().to_vec()),
            };
        }
    }
    Err(ApiError::Network("search worker stopped".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSource {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingSource {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchSource for RecordingSource {
        type Item = Stock;

        async fn search(&self, query: &str, _limit: usize) -> Result<Vec<Stock>, ApiError> {
            self.calls.lock().unwrap().push(query.to_string());
            if query == "fail" {
                return Err(ApiError::Backend("search unavailable".to_string()));
            }
            Ok(vec![stock(&query.to_uppercase())])
        }
    }

    fn stock(symbol: &str) -> Stock {
        Stock {
            symbol: symbol.to_string(),
            name: format!("{symbol} Corp"),
            exchange: None,
            current_price: None,
            change_percent: None,
        }
    }

    fn settings(min_query_len: usize) -> SearchSettings {
        SearchSettings {
            debounce: Duration::from_millis(300),
            min_query_len,
            limit: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_keystrokes_issues_one_call() {
        let source = Arc::new(RecordingSource::default());
        let mut handle = spawn_search_worker(source.clone(), settings(1));
        let mut typeahead = Typeahead::<Stock>::new(1);

        for c in "app".chars() {
            handle.requests.send(typeahead.push_char(c)).unwrap();
        }

        let response = handle.responses.recv().await.unwrap();
        assert_eq!(response.seq, 3);
        assert!(typeahead.apply(response));
        assert_eq!(source.calls(), vec!["app".to_string()]);
        assert_eq!(typeahead.results()[0].symbol, "APP");
        assert_eq!(typeahead.status(), &SearchStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_issue_separate_calls() {
        let source = Arc::new(RecordingSource::default());
        let mut handle = spawn_search_worker(source.clone(), settings(1));

        handle
            .requests
            .send(SearchRequest { seq: 1, query: "ab".to_string() })
            .unwrap();
        let first = handle.responses.recv().await.unwrap();
        assert_eq!(first.seq, 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle
            .requests
            .send(SearchRequest { seq: 2, query: "abc".to_string() })
            .unwrap();
        let second = handle.responses.recv().await.unwrap();
        assert_eq!(second.seq, 2);

        assert_eq!(source.calls(), vec!["ab".to_string(), "abc".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_query_is_never_sent() {
        let source = Arc::new(RecordingSource::default());
        let mut handle = spawn_search_worker(source.clone(), settings(2));

        handle
            .requests
            .send(SearchRequest { seq: 1, query: "x".to_string() })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        drop(handle.requests);

        assert!(handle.responses.recv().await.is_none());
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_stale_response_is_dropped() {
        let mut typeahead = Typeahead::<Stock>::new(1);
        let first = typeahead.push_char('t');
        let second = typeahead.push_char('c');
        assert_eq!(second.seq, first.seq + 1);

        let late = SearchResponse {
            seq: first.seq,
            query: first.query,
            outcome: Ok(vec![stock("T")]),
        };
        assert!(!typeahead.apply(late));
        assert!(typeahead.results().is_empty());
        assert_eq!(typeahead.status(), &SearchStatus::Loading);

        let fresh = SearchResponse {
            seq: second.seq,
            query: second.query,
            outcome: Ok(vec![stock("TCS")]),
        };
        assert!(typeahead.apply(fresh));
        assert_eq!(typeahead.results()[0].symbol, "TCS");
    }

    #[test]
    fn test_cursor_is_clamped() {
        let mut typeahead = Typeahead::<Stock>::new(1);
        let request = typeahead.push_char('a');
        typeahead.apply(SearchResponse {
            seq: request.seq,
            query: request.query,
            outcome: Ok(vec![stock("A"), stock("B"), stock("C")]),
        });

        typeahead.move_up();
        assert_eq!(typeahead.cursor(), 0);
        for _ in 0..5 {
            typeahead.move_down();
        }
        assert_eq!(typeahead.cursor(), 2);
        typeahead.move_up();
        assert_eq!(typeahead.selected().unwrap().symbol, "B");

        typeahead.open();
        let chosen = typeahead.commit().unwrap();
        assert_eq!(chosen.symbol, "B");
        assert!(!typeahead.is_open());
        assert!(typeahead.query().is_empty());
        assert!(typeahead.commit().is_none());
    }

    #[test]
    fn test_short_query_clears_results() {
        let mut typeahead = Typeahead::<Stock>::new(2);
        assert_eq!(typeahead.pop_char(), None);
        typeahead.push_char('a');
        assert_eq!(typeahead.status(), &SearchStatus::Idle);
        let request = typeahead.push_char('b');
        assert_eq!(typeahead.status(), &SearchStatus::Loading);
        typeahead.apply(SearchResponse {
            seq: request.seq,
            query: request.query,
            outcome: Ok(vec![stock("AB")]),
        });
        typeahead.pop_char();
        assert!(typeahead.results().is_empty());
        assert_eq!(typeahead.status(), &SearchStatus::Idle);
    }

    #[test]
    fn test_failure_and_empty_states() {
        let mut typeahead = Typeahead::<Stock>::new(1);
        let request = typeahead.set_query("zzz");
        typeahead.apply(SearchResponse {
            seq: request.seq,
            query: request.query,
            outcome: Ok(vec![]),
        });
        assert_eq!(typeahead.status(), &SearchStatus::Empty);

        let request = typeahead.set_query("fail");
        typeahead.apply(SearchResponse {
            seq: request.seq,
            query: request.query,
            outcome: Err("boom".to_string()),
        });
        assert_eq!(typeahead.status(), &SearchStatus::Failed("boom".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_once() {
        let source = Arc::new(RecordingSource::default());
        let hits = search_once(source.clone(), settings(1), "infy").await.unwrap();
        assert_eq!(hits[0].symbol, "INFY");

        let err = search_once(source.clone(), settings(1), "fail").await.unwrap_err();
        assert_eq!(err.to_string(), "search unavailable");

        let none = search_once(source.clone(), settings(3), "ab").await.unwrap();
        assert!(none.is_empty());
        assert_eq!(source.calls(), vec!["infy".to_string(), "fail".to_string()]);
    }
}

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, alias = "_id", alias = "user_id", deserialize_with = "id_string")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    #[serde(alias = "id", deserialize_with = "id_string")]
    pub portfolio_id: String,
    #[serde(alias = "portfolio_name")]
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    #[serde(alias = "id", deserialize_with = "id_string")]
    pub watchlist_id: String,
    #[serde(alias = "watchlist_name")]
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, deserialize_with = "id_string")]
    pub portfolio_id: String,
}

/// Stock autocomplete hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    #[serde(alias = "ticker")]
    pub symbol: String,
    #[serde(default, alias = "company_name")]
    pub name: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default, alias = "price")]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub change_percent: Option<f64>,
}

/// Mutual-fund search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundHit {
    #[serde(deserialize_with = "id_string")]
    pub scheme_code: String,
    pub scheme_name: String,
    #[serde(default)]
    pub fund_house: Option<String>,
}

/// A row of a watchlist, stock or fund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistItem {
    #[serde(alias = "ticker", alias = "symbol", alias = "scheme_code", deserialize_with = "id_string")]
    pub instrument_id: String,
    #[serde(default, alias = "company_name", alias = "scheme_name")]
    pub name: String,
    #[serde(default, alias = "price", alias = "current_nav")]
    pub current_price: Option<f64>,
    #[serde(default, alias = "change_pct")]
    pub change_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub user: User,
}

/// Anything shown as a line in a search dropdown.
pub trait SearchItem: Clone + Send + 'static {
    fn key(&self) -> &str;
    fn label(&self) -> String;
}

impl SearchItem for Stock {
    fn key(&self) -> &str {
        &self.symbol
    }

    fn label(&self) -> String {
        match &self.exchange {
            Some(exchange) => format!("{} - {} ({exchange})", self.symbol, self.name),
            None => format!("{} - {}", self.symbol, self.name),
        }
    }
}

impl SearchItem for FundHit {
    fn key(&self) -> &str {
        &self.scheme_code
    }

    fn label(&self) -> String {
        format!("{} - {}", self.scheme_code, self.scheme_name)
    }
}

// Ids come back as numbers from some endpoints and strings from others.
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Int(i64),
        Str(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Int(i) => i.to_string(),
        Id::Str(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids() {
        let p: Portfolio =
            serde_json::from_str(r#"{"portfolio_id": 3, "name": "Main", "is_default": true}"#)
                .unwrap();
        assert_eq!(p.portfolio_id, "3");
        assert!(p.is_default);

        let w: Watchlist =
            serde_json::from_str(r#"{"id": "w1", "name": "Growth", "portfolio_id": 3}"#).unwrap();
        assert_eq!(w.watchlist_id, "w1");
        assert_eq!(w.portfolio_id, "3");
        assert!(!w.is_default);
    }

    #[test]
    fn test_portfolio_json_round_trip() {
        let p = Portfolio {
            portfolio_id: "p1".to_string(),
            name: "Retirement".to_string(),
            is_default: false,
        };
        let raw = serde_json::to_string(&p).unwrap();
        assert_eq!(serde_json::from_str::<Portfolio>(&raw).unwrap(), p);
    }

    #[test]
    fn test_search_labels() {
        let s: Stock = serde_json::from_str(
            r#"{"symbol": "RELIANCE", "name": "Reliance Industries", "exchange": "NSE"}"#,
        )
        .unwrap();
        assert_eq!(s.key(), "RELIANCE");
        assert_eq!(s.label(), "RELIANCE - Reliance Industries (NSE)");

        let f: FundHit =
            serde_json::from_str(r#"{"scheme_code": 120503, "scheme_name": "Axis Bluechip"}"#)
                .unwrap();
        assert_eq!(f.label(), "120503 - Axis Bluechip");
    }
}

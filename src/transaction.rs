use crate::error::ValidationError;
use crate::models::id_string;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One purchase record, stock or mutual fund.
///
/// The backend names fields differently for the two asset kinds
/// (`symbol`/`quantity`/`purchase_price` vs `scheme_code`/`units`/`nav`);
/// both shapes deserialize into this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTransaction")]
pub struct Transaction {
    pub position_id: String,
    pub instrument_id: String,
    pub instrument_name: String,
    pub quantity: f64,
    pub purchase_date: NaiveDate,
    pub invested_amount: f64,
    pub purchase_price: f64,
}

#[derive(Deserialize)]
struct RawTransaction {
    #[serde(alias = "id", alias = "_id", deserialize_with = "id_string")]
    position_id: String,
    #[serde(
        alias = "symbol",
        alias = "ticker",
        alias = "scheme_code",
        deserialize_with = "id_string"
    )]
    instrument_id: String,
    #[serde(
        default,
        alias = "name",
        alias = "company_name",
        alias = "scheme_name"
    )]
    instrument_name: Option<String>,
    #[serde(default, alias = "units")]
    quantity: f64,
    #[serde(deserialize_with = "purchase_date")]
    purchase_date: NaiveDate,
    #[serde(default)]
    invested_amount: Option<f64>,
    #[serde(default, alias = "nav", alias = "purchase_nav")]
    purchase_price: f64,
}

/// Parse a plain date, or keep only the date part of a timestamp.
pub fn parse_purchase_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|d| d.date_naive()))
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
                .map(|d| d.date())
        })
}

fn purchase_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_purchase_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid purchase_date '{raw}'")))
}

impl From<RawTransaction> for Transaction {
    fn from(raw: RawTransaction) -> Self {
        let invested_amount = raw
            .invested_amount
            .unwrap_or(raw.quantity * raw.purchase_price);
        Transaction {
            instrument_name: raw
                .instrument_name
                .unwrap_or_else(|| raw.instrument_id.clone()),
            position_id: raw.position_id,
            instrument_id: raw.instrument_id,
            quantity: raw.quantity,
            purchase_date: raw.purchase_date,
            invested_amount,
            purchase_price: raw.purchase_price,
        }
    }
}

/// Body for creating or updating a stock transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransaction {
    pub symbol: String,
    pub quantity: f64,
    pub purchase_price: f64,
    pub purchase_date: String,
    pub invested_amount: f64,
}

/// Body for creating a mutual-fund transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFundTransaction {
    pub scheme_code: String,
    pub units: f64,
    pub nav: f64,
    pub purchase_date: String,
    pub invested_amount: f64,
}

impl From<NewTransaction> for NewFundTransaction {
    fn from(tx: NewTransaction) -> Self {
        NewFundTransaction {
            scheme_code: tx.symbol,
            units: tx.quantity,
            nav: tx.purchase_price,
            purchase_date: tx.purchase_date,
            invested_amount: tx.invested_amount,
        }
    }
}

/// Raw, user-typed form fields before validation.
#[derive(Debug, Clone, Default)]
pub struct TransactionForm {
    pub symbol: String,
    pub quantity: String,
    pub price: String,
    pub date: String,
}

impl TransactionForm {
    pub fn new(symbol: &str, quantity: &str, price: &str, date: &str) -> Self {
        TransactionForm {
            symbol: symbol.to_string(),
            quantity: quantity.to_string(),
            price: price.to_string(),
            date: date.to_string(),
        }
    }

    pub fn validate(&self) -> Result<NewTransaction, ValidationError> {
        let symbol = self.symbol.trim();
        if symbol.is_empty() {
            return Err(ValidationError::SymbolRequired);
        }

        let date = self.date.trim();
        if date.is_empty() {
            return Err(ValidationError::DateRequired);
        }
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|_| ValidationError::InvalidDate(date.to_string()))?;

        let quantity = self.quantity.trim();
        if quantity.is_empty() {
            return Err(ValidationError::QuantityRequired);
        }
        let quantity_text = quantity;
        let quantity: f64 = quantity
            .parse()
            .map_err(|_| ValidationError::InvalidQuantity(quantity_text.to_string()))?;
        if !quantity.is_finite() {
            return Err(ValidationError::InvalidQuantity(quantity_text.to_string()));
        }
        if quantity <= 0.0 {
            return Err(ValidationError::NonPositiveQuantity(quantity));
        }

        let price_text = self.price.trim();
        let price: f64 = price_text
            .parse()
            .map_err(|_| ValidationError::InvalidPrice(price_text.to_string()))?;
        if !price.is_finite() {
            return Err(ValidationError::InvalidPrice(price_text.to_string()));
        }
        if price < 0.0 {
            return Err(ValidationError::NegativePrice(price));
        }

        Ok(NewTransaction {
            symbol: symbol.to_uppercase(),
            quantity,
            purchase_price: price,
            purchase_date: date.format(DATE_FORMAT).to_string(),
            invested_amount: quantity * price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_shape() {
        let json = r#"{"position_id": 7, "symbol": "AAPL", "company_name": "Apple Inc",
            "quantity": 10, "purchase_date": "2024-03-01", "invested_amount": 1500.5,
            "purchase_price": 150.05}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.position_id, "7");
        assert_eq!(tx.instrument_id, "AAPL");
        assert_eq!(tx.instrument_name, "Apple Inc");
        assert_eq!(tx.quantity, 10.0);
        assert_eq!(tx.invested_amount, 1500.5);
        assert_eq!(tx.purchase_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn test_fund_shape() {
        let json = r#"{"id": "abc", "scheme_code": "120503", "scheme_name": "Axis Bluechip",
            "units": 12.5, "nav": 40.0, "purchase_date": "2023-11-15"}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.position_id, "abc");
        assert_eq!(tx.instrument_id, "120503");
        assert_eq!(tx.instrument_name, "Axis Bluechip");
        assert_eq!(tx.quantity, 12.5);
        assert_eq!(tx.purchase_price, 40.0);
        // missing invested amount falls back to units * nav
        assert_eq!(tx.invested_amount, 500.0);
    }

    #[test]
    fn test_missing_name_uses_instrument_id() {
        let json = r#"{"position_id": "1", "symbol": "TCS", "quantity": 1,
            "purchase_date": "2024-01-01", "purchase_price": 3500}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.instrument_name, "TCS");
    }

    #[test]
    fn test_form_validation() {
        let ok = TransactionForm::new("infy", "4", "1500", "2024-02-10")
            .validate()
            .unwrap();
        assert_eq!(ok.symbol, "INFY");
        assert_eq!(ok.invested_amount, 6000.0);
        assert_eq!(ok.purchase_date, "2024-02-10");

        assert_eq!(
            TransactionForm::new("", "1", "1", "2024-01-01").validate(),
            Err(ValidationError::SymbolRequired)
        );
        assert_eq!(
            TransactionForm::new("A", "1", "1", "").validate(),
            Err(ValidationError::DateRequired)
        );
        assert_eq!(
            TransactionForm::new("A", "1", "1", "10/02/2024").validate(),
            Err(ValidationError::InvalidDate("10/02/2024".to_string()))
        );
        assert_eq!(
            TransactionForm::new("A", "", "1", "2024-01-01").validate(),
            Err(ValidationError::QuantityRequired)
        );
        assert_eq!(
            TransactionForm::new("A", "x", "1", "2024-01-01").validate(),
            Err(ValidationError::InvalidQuantity("x".to_string()))
        );
        assert_eq!(
            TransactionForm::new("A", "0", "1", "2024-01-01").validate(),
            Err(ValidationError::NonPositiveQuantity(0.0))
        );
        assert_eq!(
            TransactionForm::new("A", "1", "-2", "2024-01-01").validate(),
            Err(ValidationError::NegativePrice(-2.0))
        );
        assert_eq!(
            TransactionForm::new("A", "1", "NaN", "2024-01-01").validate(),
            Err(ValidationError::InvalidPrice("NaN".to_string()))
        );
        assert_eq!(
            TransactionForm::new("A", "1", "inf", "2024-01-01").validate(),
            Err(ValidationError::InvalidPrice("inf".to_string()))
        );
        assert_eq!(
            TransactionForm::new("A", "NaN", "1", "2024-01-01").validate(),
            Err(ValidationError::InvalidQuantity("NaN".to_string()))
        );
        assert!(TransactionForm::new("A", "1", "0", "2024-01-01").validate().is_ok());
    }

    #[test]
    fn test_timestamp_dates_keep_the_list_readable() {
        let json = r#"[
            {"position_id": "1", "symbol": "INFY", "quantity": 1, "purchase_price": 10, "purchase_date": "2024-03-01"},
            {"position_id": "2", "symbol": "INFY", "quantity": 2, "purchase_price": 10, "purchase_date": "2024-03-02T00:00:00.000Z"},
            {"position_id": "3", "symbol": "TCS", "quantity": 1, "purchase_price": 10, "purchase_date": "2024-03-03 09:15:00"}
        ]"#;
        let txs: Vec<Transaction> = serde_json::from_str(json).unwrap();
        let dates: Vec<_> = txs.iter().map(|t| t.purchase_date.to_string()).collect();
        assert_eq!(dates, vec!["2024-03-01", "2024-03-02", "2024-03-03"]);

        assert_eq!(parse_purchase_date("2024-03-02T23:30:00+05:30"), NaiveDate::from_ymd_opt(2024, 3, 2));
        assert_eq!(parse_purchase_date("03/02/2024"), None);
    }

    #[test]
    fn test_fund_body_conversion() {
        let tx = TransactionForm::new("120503", "2", "50", "2024-01-01")
            .validate()
            .unwrap();
        let body = serde_json::to_value(NewFundTransaction::from(tx)).unwrap();
        assert_eq!(body["scheme_code"], "120503");
        assert_eq!(body["units"], 2.0);
        assert_eq!(body["nav"], 50.0);
    }
}

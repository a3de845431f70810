use crate::transaction::Transaction;
use piechart::{Chart, Color};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Price and return figures the backend supplies for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MarketSnapshot {
    #[serde(default, alias = "current_nav", alias = "price", alias = "nav")]
    pub current_price: Option<f64>,
    #[serde(default, alias = "change_percent", alias = "day_change_pct")]
    pub day_change_percent: Option<f64>,
    #[serde(default, alias = "return_1m")]
    pub one_month: Option<f64>,
    #[serde(default, alias = "return_1y")]
    pub one_year: Option<f64>,
    #[serde(default, alias = "return_3y")]
    pub three_year: Option<f64>,
    #[serde(default, alias = "return_5y")]
    pub five_year: Option<f64>,
}

/// All transactions for one instrument folded into a single row.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPosition {
    pub instrument_id: String,
    pub instrument_name: String,
    pub total_quantity: f64,
    pub total_invested: f64,
    /// Newest purchase first.
    pub transactions: Vec<Transaction>,
    pub market: Option<MarketSnapshot>,
}

impl AggregatedPosition {
    /// `None` when the group holds no quantity, rendered as "N/A".
    pub fn avg_price(&self) -> Option<f64> {
        if self.total_quantity > 0.0 {
            Some(self.total_invested / self.total_quantity)
        } else {
            None
        }
    }

    pub fn current_price(&self) -> Option<f64> {
        self.market.as_ref().and_then(|m| m.current_price)
    }

    pub fn current_value(&self) -> Option<f64> {
        self.current_price().map(|p| p * self.total_quantity)
    }

    pub fn pnl(&self) -> Option<f64> {
        self.current_value().map(|v| v - self.total_invested)
    }

    pub fn pnl_percent(&self) -> Option<f64> {
        if self.total_invested == 0.0 {
            return None;
        }
        self.pnl().map(|p| p / self.total_invested * 100.0)
    }

    pub fn day_change_percent(&self) -> Option<f64> {
        self.market.as_ref().and_then(|m| m.day_change_percent)
    }

    fn sort_value(&self, key: SortKey) -> Option<f64> {
        match key {
            SortKey::Name => None,
            SortKey::Quantity => Some(self.total_quantity),
            SortKey::AvgPrice => self.avg_price(),
            SortKey::Invested => Some(self.total_invested),
            SortKey::Value => self.current_value(),
            SortKey::PnlPercent => self.pnl_percent(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Quantity,
    AvgPrice,
    Invested,
    Value,
    PnlPercent,
}

impl SortKey {
    pub fn all() -> &'static [SortKey] {
        &[
            SortKey::Name,
            SortKey::Quantity,
            SortKey::AvgPrice,
            SortKey::Invested,
            SortKey::Value,
            SortKey::PnlPercent,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Quantity => "quantity",
            SortKey::AvgPrice => "avg_price",
            SortKey::Invested => "invested",
            SortKey::Value => "value",
            SortKey::PnlPercent => "pnl",
        }
    }

    /// Next column in display order, wrapping around.
    pub fn next(self) -> SortKey {
        let keys = SortKey::all();
        let i = keys.iter().position(|&k| k == self).unwrap_or(0);
        keys[(i + 1) % keys.len()]
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "name" => Ok(SortKey::Name),
            "quantity" | "qty" | "units" => Ok(SortKey::Quantity),
            "avg_price" | "avg" => Ok(SortKey::AvgPrice),
            "invested" => Ok(SortKey::Invested),
            "value" => Ok(SortKey::Value),
            "pnl" | "pnl_percent" => Ok(SortKey::PnlPercent),
            _ => Err(format!("Unknown sort column: '{s}'")),
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn toggle(self) -> SortDirection {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub invested: f64,
    /// Sum over rows that have a price.
    pub current_value: f64,
    pub pnl: f64,
    /// Invested amount of the rows included in `current_value`.
    pub priced_invested: f64,
}

impl Totals {
    pub fn pnl_percent(&self) -> Option<f64> {
        if self.priced_invested > 0.0 {
            Some(self.pnl / self.priced_invested * 100.0)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Holdings {
    pub positions: BTreeMap<String, AggregatedPosition>,
}

/// Group transactions by instrument and sum them up.
///
/// Pure and order-independent: the input is only read, and every group is
/// rebuilt from scratch on each call.
pub fn aggregate(transactions: &[Transaction]) -> Holdings {
    let mut positions: BTreeMap<String, AggregatedPosition> = BTreeMap::new();

    for tx in transactions {
        let entry = positions
            .entry(tx.instrument_id.clone())
            .or_insert_with(|| AggregatedPosition {
                instrument_id: tx.instrument_id.clone(),
                instrument_name: tx.instrument_name.clone(),
                total_quantity: 0.0,
                total_invested: 0.0,
                transactions: Vec::new(),
                market: None,
            });
        entry.transactions.push(tx.clone());
    }

    for position in positions.values_mut() {
        // total order: rows that still compare equal are identical, so
        // the float sums below cannot depend on input order
        position.transactions.sort_by(|a, b| {
            b.purchase_date
                .cmp(&a.purchase_date)
                .then_with(|| a.position_id.cmp(&b.position_id))
                .then_with(|| a.invested_amount.total_cmp(&b.invested_amount))
                .then_with(|| a.quantity.total_cmp(&b.quantity))
                .then_with(|| a.purchase_price.total_cmp(&b.purchase_price))
                .then_with(|| a.instrument_name.cmp(&b.instrument_name))
        });
        position.total_quantity = position.transactions.iter().map(|t| t.quantity).sum();
        position.total_invested = position
            .transactions
            .iter()
            .map(|t| t.invested_amount)
            .sum();
        // the name from the most recent purchase wins
        if let Some(latest) = position.transactions.first() {
            position.instrument_name.clone_from(&latest.instrument_name);
        }
    }

    Holdings { positions }
}

impl Holdings {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, instrument_id: &str) -> Option<&AggregatedPosition> {
        self.positions.get(instrument_id)
    }

    /// Merge backend prices onto the aggregated rows. Unknown ids are ignored.
    pub fn enrich(&mut self, market: &HashMap<String, MarketSnapshot>) {
        for (id, snapshot) in market {
            if let Some(position) = self.positions.get_mut(id) {
                position.market = Some(snapshot.clone());
            }
        }
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for position in self.positions.values() {
            totals.invested += position.total_invested;
            if let Some(value) = position.current_value() {
                totals.current_value += value;
                totals.priced_invested += position.total_invested;
            }
        }
        totals.pnl = totals.current_value - totals.priced_invested;
        totals
    }

    /// Share of invested amount per instrument, in percent.
    pub fn allocation(&self) -> Vec<(String, f64)> {
        let total = self.totals().invested;
        if total <= 0.0 {
            return Vec::new();
        }
        let mut allocation: Vec<(String, f64)> = self
            .positions
            .values()
            .map(|p| (p.instrument_name.clone(), p.total_invested / total * 100.0))
            .collect();
        allocation.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        allocation
    }

    /// Rows ordered for display. Missing values always sort last.
    pub fn sorted(&self, key: SortKey, direction: SortDirection) -> Vec<&AggregatedPosition> {
        let mut rows: Vec<&AggregatedPosition> = self.positions.values().collect();
        rows.sort_by(|a, b| {
            let ordering = if key == SortKey::Name {
                let ord = a
                    .instrument_name
                    .to_lowercase()
                    .cmp(&b.instrument_name.to_lowercase());
                match direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            } else {
                match (a.sort_value(key), b.sort_value(key)) {
                    (Some(x), Some(y)) => {
                        let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                        match direction {
                            SortDirection::Ascending => ord,
                            SortDirection::Descending => ord.reverse(),
                        }
                    }
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            };
            ordering.then_with(|| a.instrument_id.cmp(&b.instrument_id))
        });
        rows
    }

    // Print the holdings as a table
    pub fn print(&self, key: SortKey, direction: SortDirection, quantity_label: &str) {
        use comfy_table::{presets::UTF8_FULL, Attribute, Cell, CellAlignment, Color as TColor, ContentArrangement, Table};

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_width(120);

        table.set_header(vec![
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Id").add_attribute(Attribute::Bold),
            Cell::new(quantity_label).add_attribute(Attribute::Bold),
            Cell::new("Avg Cost").add_attribute(Attribute::Bold),
            Cell::new("Invested").add_attribute(Attribute::Bold),
            Cell::new("Price").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
            Cell::new("PnL").add_attribute(Attribute::Bold),
            Cell::new("%PnL").add_attribute(Attribute::Bold),
            Cell::new("%Day").add_attribute(Attribute::Bold),
        ]);

        let dash = || Cell::new("-").set_alignment(CellAlignment::Right);
        let signed = |v: f64, suffix: &str| {
            let c = if v >= 0.0 { TColor::Green } else { TColor::Red };
            Cell::new(format!("{v:.2}{suffix}")).set_alignment(CellAlignment::Right).fg(c)
        };
        let money = |v: Option<f64>| match v {
            Some(v) => Cell::new(format!("{v:.2}")).set_alignment(CellAlignment::Right),
            None => dash(),
        };

        for position in self.sorted(key, direction) {
            let avg_cell = match position.avg_price() {
                Some(v) => Cell::new(format!("{v:.2}")).set_alignment(CellAlignment::Right),
                None => Cell::new("N/A").set_alignment(CellAlignment::Right),
            };

            table.add_row(vec![
                Cell::new(&position.instrument_name),
                Cell::new(&position.instrument_id).fg(TColor::DarkBlue),
                Cell::new(format!("{:.4}", position.total_quantity)).set_alignment(CellAlignment::Right),
                avg_cell,
                money(Some(position.total_invested)),
                money(position.current_price()),
                money(position.current_value()),
                position.pnl().map(|v| signed(v, "")).unwrap_or_else(dash),
                position.pnl_percent().map(|v| signed(v, "%")).unwrap_or_else(dash),
                position.day_change_percent().map(|v| signed(v, "%")).unwrap_or_else(dash),
            ]);
        }

        let totals = self.totals();
        table.add_row(vec![
            Cell::new("TOTAL").add_attribute(Attribute::Bold),
            Cell::new(""),
            Cell::new(""),
            Cell::new(""),
            Cell::new(format!("{:.2}", totals.invested)).set_alignment(CellAlignment::Right).add_attribute(Attribute::Bold),
            Cell::new(""),
            Cell::new(format!("{:.2}", totals.current_value)).set_alignment(CellAlignment::Right).add_attribute(Attribute::Bold),
            signed(totals.pnl, "").add_attribute(Attribute::Bold),
            totals.pnl_percent().map(|v| signed(v, "%").add_attribute(Attribute::Bold)).unwrap_or_else(dash),
            Cell::new(""),
        ]);

        println!("{table}");
    }

    // Print every transaction grouped under its instrument, newest first
    pub fn print_history(&self) {
        use comfy_table::{presets::UTF8_FULL, Attribute, Cell, CellAlignment, ContentArrangement, Table};

        for position in self.positions.values() {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_width(80)
                .set_header(vec![
                    Cell::new("Id").add_attribute(Attribute::Bold),
                    Cell::new("Date").add_attribute(Attribute::Bold),
                    Cell::new("Quantity").add_attribute(Attribute::Bold),
                    Cell::new("Price").add_attribute(Attribute::Bold),
                    Cell::new("Invested").add_attribute(Attribute::Bold),
                ]);
            for tx in &position.transactions {
                table.add_row(vec![
                    Cell::new(&tx.position_id),
                    Cell::new(tx.purchase_date.to_string()),
                    Cell::new(format!("{:.4}", tx.quantity)).set_alignment(CellAlignment::Right),
                    Cell::new(format!("{:.2}", tx.purchase_price)).set_alignment(CellAlignment::Right),
                    Cell::new(format!("{:.2}", tx.invested_amount)).set_alignment(CellAlignment::Right),
                ]);
            }
            println!("{} ({})", position.instrument_name, position.instrument_id);
            println!("{table}");
        }
    }

    // Print the allocation in descending order %-wise
    pub fn print_allocation(&self) {
        println!("====================================");
        for (name, percentage) in self.allocation() {
            println!("{name: >24} | {percentage: >10.2}");
        }
    }

    pub fn draw_pie_chart(&self) {
        let colors = [
            Color::Red,
            Color::Green,
            Color::Blue,
            Color::Yellow,
            Color::Cyan,
            Color::White,
            Color::Purple,
            Color::Black,
        ];

        let data: Vec<piechart::Data> = self
            .allocation()
            .into_iter()
            .enumerate()
            .map(|(i, (label, percentage))| piechart::Data {
                label,
                value: percentage as f32,
                color: Some(colors[i % colors.len()].into()),
                fill: '•',
            })
            .collect();

        Chart::new()
            .legend(true)
            .radius(9)
            .aspect_ratio(3)
            .draw(&data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn tx(id: &str, instrument: &str, qty: f64, invested: f64, date: &str) -> Transaction {
        Transaction {
            position_id: id.to_string(),
            instrument_id: instrument.to_string(),
            instrument_name: format!("{instrument} Ltd"),
            quantity: qty,
            purchase_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            invested_amount: invested,
            purchase_price: if qty > 0.0 { invested / qty } else { 0.0 },
        }
    }

    #[test]
    fn test_two_purchases_of_one_instrument() {
        let holdings = aggregate(&[
            tx("T1", "INFY", 10.0, 1000.0, "2024-01-10"),
            tx("T2", "INFY", 5.0, 600.0, "2024-03-02"),
        ]);
        let p = holdings.get("INFY").unwrap();
        assert_eq!(p.total_quantity, 15.0);
        assert_eq!(p.total_invested, 1600.0);
        let avg = p.avg_price().unwrap();
        assert!((avg - 106.67).abs() < 0.005);
        // newest first
        assert_eq!(p.transactions[0].position_id, "T2");
        assert_eq!(p.transactions[1].position_id, "T1");
    }

    #[test]
    fn test_reordering_input_does_not_change_result() {
        let mut input = vec![
            tx("a", "X", 1.5, 100.1, "2024-01-01"),
            tx("b", "Y", 2.0, 50.0, "2024-01-02"),
            tx("c", "X", 3.25, 300.7, "2024-02-01"),
            tx("d", "X", 0.1, 10.3, "2023-12-31"),
            tx("e", "Y", 4.0, 80.0, "2024-01-02"),
        ];
        let forward = aggregate(&input);
        input.reverse();
        let backward = aggregate(&input);
        assert_eq!(forward, backward);
        assert!((forward.get("X").unwrap().total_invested - 411.1).abs() < 1e-9);
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn test_aggregate_is_idempotent_and_leaves_input_alone() {
        let input = vec![
            tx("1", "A", 1.0, 10.0, "2024-05-01"),
            tx("2", "A", 2.0, 30.0, "2024-04-01"),
        ];
        let snapshot = input.clone();
        let first = aggregate(&input);
        let second = aggregate(&input);
        assert_eq!(first, second);
        assert_eq!(input, snapshot);
    }

    #[test]
    fn test_duplicate_rows_do_not_depend_on_input_order() {
        let row = |invested: f64, name: &str| Transaction {
            instrument_name: name.to_string(),
            ..tx("1", "X", 1.0, invested, "2024-01-01")
        };
        let mut input = vec![row(0.1, "A"), row(0.2, "B"), row(0.3, "C")];
        let forward = aggregate(&input);
        input.reverse();
        let backward = aggregate(&input);
        assert_eq!(forward, backward);
        assert_eq!(
            forward.get("X").unwrap().total_invested.to_bits(),
            backward.get("X").unwrap().total_invested.to_bits()
        );
    }

    fn arb_transaction() -> impl Strategy<Value = Transaction> {
        (
            prop::sample::select(vec!["1", "2", "3"]),
            prop::sample::select(vec!["INFY", "TCS"]),
            prop::sample::select(vec!["A", "B"]),
            prop::sample::select(vec![0.0, 0.5, 1.0, 3.0]),
            prop::sample::select(vec![0.1, 0.2, 0.3, 100.7]),
            0u32..3,
        )
            .prop_map(|(id, instrument, name, qty, invested, day)| Transaction {
                position_id: id.to_string(),
                instrument_id: instrument.to_string(),
                instrument_name: name.to_string(),
                quantity: qty,
                purchase_date: NaiveDate::from_ymd_opt(2024, 1, 1 + day).unwrap(),
                invested_amount: invested,
                purchase_price: invested,
            })
    }

    fn arb_permuted() -> impl Strategy<Value = (Vec<Transaction>, Vec<Transaction>)> {
        prop::collection::vec(arb_transaction(), 0..24)
            .prop_flat_map(|rows| (Just(rows.clone()), Just(rows).prop_shuffle()))
    }

    proptest! {
        #[test]
        fn prop_aggregate_ignores_input_order((original, shuffled) in arb_permuted()) {
            prop_assert_eq!(aggregate(&original), aggregate(&shuffled));
        }

        #[test]
        fn prop_aggregate_is_idempotent((original, _) in arb_permuted()) {
            let snapshot = original.clone();
            prop_assert_eq!(aggregate(&original), aggregate(&original));
            prop_assert_eq!(original, snapshot);
        }

        #[test]
        fn prop_totals_cover_every_row((original, _) in arb_permuted()) {
            let holdings = aggregate(&original);
            let rows: usize = holdings.positions.values().map(|p| p.transactions.len()).sum();
            prop_assert_eq!(rows, original.len());
        }
    }

    #[test]
    fn test_zero_quantity_has_no_average() {
        let holdings = aggregate(&[tx("1", "Z", 0.0, 0.0, "2024-01-01")]);
        assert_eq!(holdings.get("Z").unwrap().avg_price(), None);
    }

    #[test]
    fn test_empty_input() {
        let holdings = aggregate(&[]);
        assert!(holdings.is_empty());
        assert_eq!(holdings.totals(), Totals::default());
        assert!(holdings.allocation().is_empty());
    }

    #[test]
    fn test_duplicates_are_summed() {
        let t = tx("1", "D", 2.0, 20.0, "2024-01-01");
        let holdings = aggregate(&[t.clone(), t]);
        assert_eq!(holdings.get("D").unwrap().total_quantity, 4.0);
        assert_eq!(holdings.get("D").unwrap().transactions.len(), 2);
    }

    #[test]
    fn test_enrich_and_totals() {
        let mut holdings = aggregate(&[
            tx("1", "A", 10.0, 100.0, "2024-01-01"),
            tx("2", "B", 5.0, 50.0, "2024-01-01"),
        ]);
        let mut market = HashMap::new();
        market.insert(
            "A".to_string(),
            MarketSnapshot {
                current_price: Some(12.0),
                ..Default::default()
            },
        );
        market.insert("UNKNOWN".to_string(), MarketSnapshot::default());
        holdings.enrich(&market);

        let a = holdings.get("A").unwrap();
        assert_eq!(a.current_value(), Some(120.0));
        assert_eq!(a.pnl(), Some(20.0));
        assert_eq!(a.pnl_percent(), Some(20.0));
        assert_eq!(holdings.get("B").unwrap().current_value(), None);

        let totals = holdings.totals();
        assert_eq!(totals.invested, 150.0);
        assert_eq!(totals.current_value, 120.0);
        assert_eq!(totals.pnl, 20.0);
        assert_eq!(totals.pnl_percent(), Some(20.0));
    }

    #[test]
    fn test_sorting_puts_missing_values_last() {
        let mut holdings = aggregate(&[
            tx("1", "A", 1.0, 100.0, "2024-01-01"),
            tx("2", "B", 1.0, 300.0, "2024-01-01"),
            tx("3", "C", 1.0, 200.0, "2024-01-01"),
        ]);
        let mut market = HashMap::new();
        market.insert("A".to_string(), MarketSnapshot { current_price: Some(150.0), ..Default::default() });
        market.insert("C".to_string(), MarketSnapshot { current_price: Some(100.0), ..Default::default() });
        holdings.enrich(&market);

        let ids = |rows: Vec<&AggregatedPosition>| {
            rows.iter().map(|p| p.instrument_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(holdings.sorted(SortKey::Invested, SortDirection::Descending)), ["B", "C", "A"]);
        assert_eq!(ids(holdings.sorted(SortKey::Invested, SortDirection::Ascending)), ["A", "C", "B"]);
        assert_eq!(ids(holdings.sorted(SortKey::PnlPercent, SortDirection::Descending)), ["A", "C", "B"]);
        assert_eq!(ids(holdings.sorted(SortKey::PnlPercent, SortDirection::Ascending)), ["C", "A", "B"]);
    }

    #[test]
    fn test_allocation_sums_to_hundred() {
        let holdings = aggregate(&[
            tx("1", "A", 1.0, 25.0, "2024-01-01"),
            tx("2", "B", 1.0, 75.0, "2024-01-01"),
        ]);
        let allocation = holdings.allocation();
        assert_eq!(allocation[0], ("B Ltd".to_string(), 75.0));
        let sum: f64 = allocation.iter().map(|(_, p)| p).sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_sort_key_parsing_and_cycle() {
        assert_eq!("Invested".parse::<SortKey>(), Ok(SortKey::Invested));
        assert!("bogus".parse::<SortKey>().is_err());
        assert_eq!(SortKey::PnlPercent.next(), SortKey::Name);
    }

    #[test]
    fn test_snapshot_aliases() {
        let snap: MarketSnapshot =
            serde_json::from_str(r#"{"current_nav": 41.5, "return_1y": 12.0}"#).unwrap();
        assert_eq!(snap.current_price, Some(41.5));
        assert_eq!(snap.one_year, Some(12.0));
    }
}

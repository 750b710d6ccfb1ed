//! End-to-end conflation scenarios and concurrency tests.


/// OHLC bar built up from individual trade ticks: the classic merge-mode
/// payload. Each enqueued tick starts as a one-trade bar; folding an older
/// bar in extends the range backwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceBar {
    pub last: i64,
    pub open: i64,
    pub low: i64,
    pub high: i64,
    pub close: i64,
}

impl PriceBar {
    pub fn tick(price: i64) -> Self {
        Self {
            last: price,
            open: price,
            low: price,
            high: price,
            close: price,
        }
    }
}

pub fn fold_bars(_key: &&str, older: &PriceBar, newer: &mut PriceBar) {
    newer.open = older.open;
    newer.low = older.low.min(newer.low);
    newer.high = older.high.max(newer.high);
}

/// Counting payload for no-loss assertions: merging adds the counts, so the
/// sum over polled values equals the number of enqueues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tally {
    pub count: u64,
}

impl Tally {
    pub fn one() -> Self {
        Self { count: 1 }
    }
}

pub fn fold_tallies<K>(_key: &K, older: &Tally, newer: &mut Tally) {
    newer.count += older.count;
}

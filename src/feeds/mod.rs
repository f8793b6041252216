pub mod venue_ws;

/// The market set the WS task should hold subscriptions for. Bumping the
/// generation forces a reconnect (and thus fresh snapshots) even when the
/// ticker list is unchanged -- the book-desync recovery path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionSet {
    pub generation: u64,
    pub tickers: Vec<String>,
}

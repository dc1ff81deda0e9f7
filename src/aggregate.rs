//! Live aggregate feed over the RTDB last-N query.
//!
//! Every delivery from the store is a complete snapshot of the query window
//! (see `rtdb`); this module folds those snapshots into the derived view the
//! routes serve: current value, status label, newest-first history, plus the
//! oldest-first temperature trend and its average. An empty snapshot leaves
//! the previous derived values untouched so a transient empty read never
//! flickers the dashboard back to zero.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::models::{AggregateRecord, Settings};

// ---

/// Derived state of the aggregate feed.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateView {
    // ---
    /// Temperature of the most recent record seen, if any.
    pub current_value: Option<f64>,

    /// Alarm status reported alongside the most recent record.
    pub status_label: String,

    /// All records of the last snapshot, newest first.
    pub history: Vec<AggregateRecord>,

    /// Temperatures of the last snapshot in feed order (oldest first).
    pub trend: Vec<f64>,

    /// Mean of `trend`, if any records were seen.
    pub average: Option<f64>,
}

impl Default for AggregateView {
    fn default() -> Self {
        AggregateView {
            current_value: None,
            status_label: "Loading...".into(),
            history: Vec::new(),
            trend: Vec::new(),
            average: None,
        }
    }
}

impl AggregateView {
    /// Recompute the derived values from one full snapshot.
    ///
    /// The snapshot arrives oldest-first (store key order); the last record
    /// is therefore the most recent one. Empty snapshots are ignored.
    pub fn apply_snapshot(&mut self, records: Vec<AggregateRecord>) {
        // ---
        let Some(latest) = records.last() else {
            return;
        };

        self.current_value = Some(latest.temperature);
        self.status_label = latest.alarm_status.clone();
        self.trend = records.iter().map(|r| r.temperature).collect();
        self.average = Some(self.trend.iter().sum::<f64>() / self.trend.len() as f64);

        let mut history = records;
        history.reverse();
        self.history = history;
    }
}

// ---

/// Decode a snapshot tree into records, oldest first.
///
/// The tree is an object keyed by push id; push ids sort chronologically,
/// so key order is arrival order. Records that fail to decode are skipped.
pub fn records_from_tree(tree: &Value) -> Vec<AggregateRecord> {
    // ---
    let Some(map) = tree.as_object() else {
        return Vec::new();
    };

    map.iter()
        .filter_map(|(key, value)| match serde_json::from_value(value.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping undecodable record {}: {}", key, e);
                None
            }
        })
        .collect()
}

/// Fold snapshot deliveries into the shared aggregate view.
///
/// Ends when the snapshot channel closes, which releases the subscription
/// exactly once.
pub fn spawn_feed(
    mut snapshots: mpsc::Receiver<Value>,
    view: watch::Sender<AggregateView>,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        while let Some(tree) = snapshots.recv().await {
            let records = records_from_tree(&tree);
            debug!("Aggregate snapshot with {} records", records.len());
            view.send_modify(|v| v.apply_snapshot(records));
        }
        info!("Aggregate feed released");
    })
}

/// Fold settings document deliveries into the shared settings value.
///
/// A `null` tree (document absent) retains the current settings.
pub fn spawn_settings_feed(
    mut snapshots: mpsc::Receiver<Value>,
    settings: watch::Sender<Settings>,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        while let Some(tree) = snapshots.recv().await {
            if tree.is_null() {
                continue;
            }
            match serde_json::from_value::<Settings>(tree) {
                Ok(parsed) => {
                    debug!(
                        "Settings updated: min={} max={} interval={}",
                        parsed.min_temp, parsed.max_temp, parsed.read_interval
                    );
                    let _ = settings.send(parsed);
                }
                Err(e) => debug!("Skipping undecodable settings document: {}", e),
            }
        }
        info!("Settings feed released");
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn record(temp: f64, status: &str) -> AggregateRecord {
        // ---
        AggregateRecord {
            temperature: temp,
            alarm_status: status.into(),
            message_id: None,
            timestamp: None,
            read_interval: None,
        }
    }

    #[test]
    fn test_snapshot_derivation() {
        // ---
        let mut view = AggregateView::default();
        view.apply_snapshot(vec![
            record(20.0, "ACTIVE"),
            record(22.0, "ACTIVE"),
            record(24.0, "INACTIVE"),
        ]);

        // Last record in feed order is the most recent
        assert_eq!(view.current_value, Some(24.0));
        assert_eq!(view.status_label, "INACTIVE");

        // History is exposed newest first
        let temps: Vec<f64> = view.history.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![24.0, 22.0, 20.0]);

        // Trend stays in feed order, average over all records
        assert_eq!(view.trend, vec![20.0, 22.0, 24.0]);
        assert_eq!(view.average, Some(22.0));
    }

    #[test]
    fn test_empty_snapshot_retains_previous_values() {
        // ---
        let mut view = AggregateView::default();
        view.apply_snapshot(vec![record(23.0, "ACTIVE")]);

        view.apply_snapshot(Vec::new());

        assert_eq!(view.current_value, Some(23.0));
        assert_eq!(view.status_label, "ACTIVE");
        assert_eq!(view.history.len(), 1);
    }

    #[test]
    fn test_records_from_tree_key_order_and_bad_entries() {
        // ---
        let tree = json!({
            "-Nb2": {"temperature": 22.0, "alarm_status": "ACTIVE"},
            "-Na1": {"temperature": 21.0, "alarm_status": "ACTIVE"},
            "-Nc3": {"temperature": "broken"},
        });

        let records = records_from_tree(&tree);

        // Sorted by key (push-id order), undecodable entry skipped
        let temps: Vec<f64> = records.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![21.0, 22.0]);
    }

    #[test]
    fn test_records_from_tree_non_object() {
        // ---
        assert!(records_from_tree(&Value::Null).is_empty());
        assert!(records_from_tree(&json!(42)).is_empty());
    }

    #[tokio::test]
    async fn test_feed_task_folds_snapshots() {
        // ---
        let (tx, rx) = mpsc::channel(4);
        let (view_tx, view_rx) = watch::channel(AggregateView::default());
        let task = spawn_feed(rx, view_tx);

        tx.send(json!({
            "-Na1": {"temperature": 21.0, "alarm_status": "ACTIVE"},
        }))
        .await
        .unwrap();

        drop(tx);
        task.await.unwrap();

        let view = view_rx.borrow();
        assert_eq!(view.current_value, Some(21.0));
        assert_eq!(view.status_label, "ACTIVE");
    }
}

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use thermoflow::aggregate::{self, AggregateView};
use thermoflow::buffer::PacketBuffer;
use thermoflow::controller::{
    average_latency, inter_arrival_latencies, MeasurementWindow, SessionTracker, WindowPhase,
};
use thermoflow::models::{Packet, Settings};

// ---

fn packet(msg_id: u64, timestamp: i64, interval: f64) -> Packet {
    // ---
    Packet {
        temperature: 22.5,
        msg_id,
        timestamp,
        interval: Some(interval),
    }
}

#[test]
fn evaluation_scenario_end_to_end() -> Result<()> {
    // ---
    // A device streaming at a 2s interval, then switching to 5s after the
    // operator applies a new configuration. The buffer, session tracker and
    // measurement window see exactly the events the controller task would
    // feed them: one head observation per arrival, one check per tick.
    let now = Utc::now();
    let t0: i64 = 1_700_000_000_000;

    let mut buffer = PacketBuffer::new(100);
    let mut session = SessionTracker::new(now);
    let mut window = MeasurementWindow::new();

    // Three packets at the 2s rate
    for i in 0..3u64 {
        buffer.push(packet(i + 1, t0 + 2_000 * i as i64, 2.0));
        session.observe(buffer.head().unwrap(), now);
    }
    assert_eq!(session.session_count(), 3);
    assert_eq!(session.current_interval(), 2.0);

    // Arm a 60s window; the packet already buffered must not be counted
    let deadline = window.start(t0 + 4_000, 60_000, buffer.head().map(|p| p.msg_id))?;
    assert_eq!(deadline, t0 + 64_000);

    // Device acknowledges the 5s interval: session restarts at 1, the
    // window keeps counting across the reset
    buffer.push(packet(4, t0 + 9_000, 5.0));
    session.observe(buffer.head().unwrap(), now);
    window.observe(buffer.head().unwrap().msg_id);
    assert_eq!(session.session_count(), 1);
    assert_eq!(session.current_interval(), 5.0);

    buffer.push(packet(5, t0 + 14_000, 5.0));
    session.observe(buffer.head().unwrap(), now);
    window.observe(buffer.head().unwrap().msg_id);
    assert_eq!(session.session_count(), 2);

    // Ticks before the deadline never complete the window
    assert_eq!(window.check(t0 + 63_999), None);
    assert_eq!(window.phase(), WindowPhase::Running);
    assert_eq!(window.remaining_secs(t0 + 63_999), 1);

    // First tick past the deadline freezes the exact count
    assert_eq!(window.check(t0 + 64_080), Some(2));
    assert_eq!(window.result(), Some(2));

    // Latency series over the full buffer, oldest interval first
    let latencies = inter_arrival_latencies(&buffer.snapshot());
    assert_eq!(latencies, vec![2_000, 2_000, 5_000, 5_000]);
    assert_eq!(average_latency(&latencies), 3_500);

    // Re-arming succeeds after completion and clears the old result
    window.start(t0 + 70_000, 60_000, buffer.head().map(|p| p.msg_id))?;
    assert_eq!(window.result(), None);

    Ok(())
}

#[tokio::test]
async fn aggregate_feed_tracks_snapshots_and_survives_empty_reads() -> Result<()> {
    // ---
    let (tx, rx) = mpsc::channel(8);
    let (view_tx, view_rx) = watch::channel(AggregateView::default());
    let feed = aggregate::spawn_feed(rx, view_tx);

    // First snapshot: two records in key order (oldest first)
    tx.send(json!({
        "-Na1": {"temperature": 21.0, "alarm_status": "ACTIVE"},
        "-Nb2": {"temperature": 26.5, "alarm_status": "INACTIVE"},
    }))
    .await?;

    // Transient empty delivery must not reset the derived values
    tx.send(json!({})).await?;

    drop(tx);
    feed.await?;

    let view = view_rx.borrow().clone();
    assert_eq!(view.current_value, Some(26.5));
    assert_eq!(view.status_label, "INACTIVE");
    assert_eq!(view.average, Some(23.75));

    // History is newest first and evaluates against the thresholds
    let settings = Settings::default();
    let evaluations: Vec<_> = view
        .history
        .iter()
        .map(|r| settings.classify(r.temperature))
        .collect();
    assert_eq!(view.history[0].temperature, 26.5);
    assert_eq!(evaluations.len(), 2);

    Ok(())
}

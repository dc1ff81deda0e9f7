//! REST client for the RTDB store.
//!
//! Two concerns live here, both external collaborators of the streaming
//! core:
//! - The live query: an SSE (`text/event-stream`) subscription whose
//!   `put`/`patch` events are merged into a local value tree. After every
//!   event the *entire* tree is emitted downstream, so consumers only ever
//!   see full-snapshot replacements, never incremental diffs.
//! - The settings write path: partial-field `PATCH` and full `PUT` of the
//!   single settings document. Write failures are reported to the caller;
//!   there is no automatic retry.

use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{StreamError, StreamResult};
use crate::models::{Settings, SettingsUpdate};

// ---

/// Delay before re-opening a dropped live-query stream.
const STREAM_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Handle to the RTDB REST API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RtdbClient {
    // ---
    http: reqwest::Client,
    base_url: String,
    settings_path: String,
}

impl RtdbClient {
    pub fn new(cfg: &Config) -> RtdbClient {
        RtdbClient {
            http: reqwest::Client::new(),
            base_url: cfg.rtdb_base_url.clone(),
            settings_path: cfg.rtdb_settings_path.clone(),
        }
    }

    fn node_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    // ---

    /// Open a long-lived live query on `path` and stream full snapshots.
    ///
    /// With `last_n` set, the query is ordered by key and limited to the
    /// last N children (push keys are chronologically ordered, so this is
    /// the newest N records). The spawned task reconnects with a fixed
    /// delay until the receiver is dropped; dropping the receiver is the
    /// one-shot teardown.
    pub fn stream(&self, path: &str, last_n: Option<u32>) -> mpsc::Receiver<Value> {
        // ---
        let (tx, rx) = mpsc::channel(8);
        let url = self.node_url(path);
        let query: Vec<(String, String)> = match last_n {
            Some(n) => vec![
                ("orderBy".into(), "\"$key\"".into()),
                ("limitToLast".into(), n.to_string()),
            ],
            None => Vec::new(),
        };
        let http = self.http.clone();

        tokio::spawn(async move {
            loop {
                if let Err(e) = run_stream(&http, &url, &query, &tx).await {
                    warn!("Live query on {} dropped: {}", url, e);
                }
                if tx.is_closed() {
                    debug!("Live query on {} released", url);
                    return;
                }
                tokio::time::sleep(STREAM_RETRY_DELAY).await;
            }
        });

        rx
    }

    // ---

    /// Merge the present fields of `patch` into the settings document.
    ///
    /// `updated_at` is stamped with the current wall clock, matching what
    /// the device expects to see on every settings write.
    pub async fn update_settings(&self, patch: &SettingsUpdate) -> StreamResult<()> {
        // ---
        let mut patch = patch.clone();
        patch.updated_at = Some(Utc::now().timestamp_millis());

        let resp = self
            .http
            .patch(self.node_url(&self.settings_path))
            .json(&patch)
            .send()
            .await?;
        expect_success(resp.status())
    }

    /// Replace the settings document wholesale.
    pub async fn put_settings(&self, settings: &Settings) -> StreamResult<()> {
        // ---
        let mut settings = settings.clone();
        settings.updated_at = Some(Utc::now().timestamp_millis());

        let resp = self
            .http
            .put(self.node_url(&self.settings_path))
            .json(&settings)
            .send()
            .await?;
        expect_success(resp.status())
    }

    /// One-shot read of the settings document; defaults when absent.
    pub async fn fetch_settings(&self) -> StreamResult<Settings> {
        // ---
        let resp = self
            .http
            .get(self.node_url(&self.settings_path))
            .send()
            .await?;
        expect_success(resp.status())?;

        let value: Value = resp.json().await?;
        if value.is_null() {
            return Ok(Settings::default());
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn expect_success(status: reqwest::StatusCode) -> StreamResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StreamError::StoreStatus(status.as_u16()))
    }
}

// ---

/// One parsed event from the SSE feed.
#[derive(Debug, PartialEq)]
enum FeedEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel,
}

#[derive(Deserialize)]
struct EventBody {
    path: String,
    data: Value,
}

/// Consume one SSE connection until the server or receiver ends it.
async fn run_stream(
    http: &reqwest::Client,
    url: &str,
    query: &[(String, String)],
    tx: &mpsc::Sender<Value>,
) -> StreamResult<()> {
    // ---
    let resp = http
        .get(url)
        .query(query)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;
    expect_success(resp.status())?;

    let mut body = resp.bytes_stream();
    let mut tree = Value::Null;
    let mut pending = String::new();
    let mut event_name = String::new();
    let mut data_line = String::new();

    while let Some(chunk) = body.next().await {
        pending.push_str(&String::from_utf8_lossy(&chunk?));

        while let Some(pos) = pending.find('\n') {
            let line = pending[..pos].trim_end_matches('\r').to_string();
            pending.drain(..=pos);

            if let Some(rest) = line.strip_prefix("event:") {
                event_name = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_line = rest.trim().to_string();
            } else if line.is_empty() && !event_name.is_empty() {
                // Blank line terminates one event
                let event = parse_feed_event(&event_name, &data_line)?;
                event_name.clear();
                data_line.clear();

                match event {
                    FeedEvent::KeepAlive => {}
                    FeedEvent::Cancel => {
                        return Err(StreamError::Connection("live query cancelled".into()));
                    }
                    FeedEvent::Put { path, data } => {
                        apply_put(&mut tree, &path, data);
                        if tx.send(tree.clone()).await.is_err() {
                            return Ok(());
                        }
                    }
                    FeedEvent::Patch { path, data } => {
                        apply_patch(&mut tree, &path, data);
                        if tx.send(tree.clone()).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn parse_feed_event(name: &str, data: &str) -> StreamResult<FeedEvent> {
    // ---
    match name {
        "keep-alive" => Ok(FeedEvent::KeepAlive),
        "cancel" | "auth_revoked" => Ok(FeedEvent::Cancel),
        "put" => {
            let body: EventBody = serde_json::from_str(data)?;
            Ok(FeedEvent::Put {
                path: body.path,
                data: body.data,
            })
        }
        "patch" => {
            let body: EventBody = serde_json::from_str(data)?;
            Ok(FeedEvent::Patch {
                path: body.path,
                data: body.data,
            })
        }
        other => {
            debug!("Ignoring unknown feed event {}", other);
            Ok(FeedEvent::KeepAlive)
        }
    }
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Replace the subtree at `path` with `data` (`null` removes it).
fn apply_put(tree: &mut Value, path: &str, data: Value) {
    // ---
    let segments: Vec<&str> = path_segments(path).collect();
    let Some((leaf, parents)) = segments.split_last() else {
        *tree = data;
        return;
    };

    let mut node = tree;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        let Value::Object(map) = node else { return };
        node = map.entry(seg.to_string()).or_insert(Value::Null);
    }

    if !node.is_object() {
        *node = Value::Object(Default::default());
    }
    let Value::Object(map) = node else { return };
    if data.is_null() {
        map.remove(*leaf);
    } else {
        map.insert(leaf.to_string(), data);
    }
}

/// Merge the keys of `data` into the object at `path`.
fn apply_patch(tree: &mut Value, path: &str, data: Value) {
    // ---
    let Value::Object(fields) = data else {
        return;
    };
    for (key, value) in fields {
        let child = if path_segments(path).next().is_none() {
            key
        } else {
            format!("{}/{}", path.trim_matches('/'), key)
        };
        apply_put(tree, &child, value);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_put_event() {
        // ---
        let ev = parse_feed_event("put", r#"{"path": "/", "data": {"a": 1}}"#).unwrap();
        assert_eq!(
            ev,
            FeedEvent::Put {
                path: "/".into(),
                data: json!({"a": 1}),
            }
        );
    }

    #[test]
    fn test_parse_keepalive_and_cancel() {
        // ---
        assert_eq!(
            parse_feed_event("keep-alive", "null").unwrap(),
            FeedEvent::KeepAlive
        );
        assert_eq!(
            parse_feed_event("cancel", "null").unwrap(),
            FeedEvent::Cancel
        );
        assert_eq!(
            parse_feed_event("auth_revoked", "credential expired").unwrap(),
            FeedEvent::Cancel
        );
    }

    #[test]
    fn test_parse_malformed_event_body_is_error() {
        // ---
        assert!(parse_feed_event("put", "not json").is_err());
    }

    #[test]
    fn test_root_put_replaces_tree() {
        // ---
        let mut tree = json!({"old": true});
        apply_put(&mut tree, "/", json!({"k1": {"temperature": 21.0}}));
        assert_eq!(tree, json!({"k1": {"temperature": 21.0}}));
    }

    #[test]
    fn test_child_put_appends_and_null_removes() {
        // ---
        let mut tree = json!({"k1": {"temperature": 21.0}});

        apply_put(&mut tree, "/k2", json!({"temperature": 22.0}));
        assert_eq!(
            tree,
            json!({"k1": {"temperature": 21.0}, "k2": {"temperature": 22.0}})
        );

        apply_put(&mut tree, "/k1", Value::Null);
        assert_eq!(tree, json!({"k2": {"temperature": 22.0}}));
    }

    #[test]
    fn test_deep_put_creates_parents() {
        // ---
        let mut tree = Value::Null;
        apply_put(&mut tree, "/a/b/c", json!(5));
        assert_eq!(tree, json!({"a": {"b": {"c": 5}}}));
    }

    fn test_config(base_url: &str) -> Config {
        // ---
        Config {
            mqtt_host: "127.0.0.1".into(),
            mqtt_port: 1,
            mqtt_tls: false,
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_topic: "sensor_data/temp".into(),
            rtdb_base_url: base_url.trim_end_matches('/').into(),
            rtdb_data_path: "thermistor_sensor_data".into(),
            rtdb_settings_path: "settings".into(),
            stream_buffer_limit: 4,
            aggregate_limit: 30,
            window_duration_ms: 60_000,
            tick_interval_ms: 100,
        }
    }

    /// Bind a stub settings endpoint on an ephemeral port.
    async fn stub_settings_store(route: axum::routing::MethodRouter) -> RtdbClient {
        // ---
        let app = axum::Router::new().route("/settings.json", route);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        RtdbClient::new(&test_config(&format!("http://{addr}")))
    }

    /// A handler that forwards the request body to the test.
    fn capture_body(
        tx: tokio::sync::mpsc::Sender<Value>,
    ) -> impl Fn(
        axum::Json<Value>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = axum::Json<Value>> + Send>>
           + Clone
           + Send
           + 'static {
        // ---
        move |axum::Json(body): axum::Json<Value>| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(body).await.ok();
                axum::Json(Value::Null)
            })
        }
    }

    #[tokio::test]
    async fn test_put_settings_writes_full_document() {
        // ---
        let (tx, mut seen) = tokio::sync::mpsc::channel::<Value>(1);
        let client = stub_settings_store(axum::routing::put(capture_body(tx))).await;

        let settings = Settings {
            min_temp: 20.0,
            max_temp: 25.0,
            read_interval: 3.0,
            updated_at: None,
        };
        client.put_settings(&settings).await.unwrap();

        let body = seen.recv().await.unwrap();
        assert_eq!(body["min_temp"], 20.0);
        assert_eq!(body["max_temp"], 25.0);
        assert_eq!(body["read_interval"], 3.0);
        // The writer stamps the document on every save
        assert!(body["updated_at"].is_i64());
    }

    #[tokio::test]
    async fn test_update_settings_sends_only_present_fields() {
        // ---
        let (tx, mut seen) = tokio::sync::mpsc::channel::<Value>(1);
        let client = stub_settings_store(axum::routing::patch(capture_body(tx))).await;

        let patch = SettingsUpdate {
            read_interval: Some(5.0),
            ..Default::default()
        };
        client.update_settings(&patch).await.unwrap();

        let body = seen.recv().await.unwrap();
        assert_eq!(body["read_interval"], 5.0);
        assert!(body.get("min_temp").is_none());
        assert!(body.get("max_temp").is_none());
        assert!(body["updated_at"].is_i64());
    }

    #[tokio::test]
    async fn test_rejected_write_is_reported() {
        // ---
        let client = stub_settings_store(axum::routing::put(|| async {
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        }))
        .await;

        let err = client.put_settings(&Settings::default()).await.unwrap_err();
        assert!(matches!(err, StreamError::StoreStatus(500)));
    }

    #[test]
    fn test_patch_merges_fields() {
        // ---
        let mut tree = json!({"min_temp": 21.0, "max_temp": 27.0});
        apply_patch(&mut tree, "/", json!({"max_temp": 30.0, "read_interval": 5.0}));
        assert_eq!(
            tree,
            json!({"min_temp": 21.0, "max_temp": 30.0, "read_interval": 5.0})
        );
    }
}

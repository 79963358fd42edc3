//! MQTT ingestion listener for raw count events
//!
//! Sensors publish one count per reading to `<prefix>/{location}/count`. The
//! listener owns parsing and validation of the inbound event: the location
//! comes from the topic, the payload is a bare non-negative integer (the
//! common case) or a JSON object with an explicit timestamp, and events
//! without a timestamp are stamped with the arrival instant. The listener
//! only appends - it never reads or computes.

use crate::domain::{CountPayload, RawReading};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::journal::Journal;
use crate::services::store::ReadingStore;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Start the MQTT listener and append incoming readings until shutdown.
///
/// Malformed events are counted and logged, never fatal. Journal write
/// failures are counted but do not drop the in-memory reading - the journal
/// heals on the next successful append.
pub async fn start_count_listener(
    config: &Config,
    store: Arc<ReadingStore>,
    journal: Arc<Journal>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-ingest", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.mqtt_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "count_listener_subscribed"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("count_listener_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(reading) = parse_count_event(&publish.topic, &publish.payload) else {
                            metrics.record_reading_rejected();
                            warn!(topic = %publish.topic, "count_event_invalid");
                            continue;
                        };

                        metrics.record_reading_received();
                        if !journal.append(&reading) {
                            metrics.record_journal_write_error();
                        }
                        if store.append(&reading) {
                            debug!(
                                location = %reading.location,
                                count = %reading.count,
                                "reading_stored"
                            );
                        } else {
                            metrics.record_reading_rejected();
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse one count event into a reading.
///
/// Topic format is `<prefix>/{location}/count`. Events that carry no
/// timestamp are stamped with the arrival instant; local-time interpretation
/// happens downstream at query time.
pub fn parse_count_event(topic: &str, payload: &[u8]) -> Option<RawReading> {
    let location = topic.split('/').nth(1)?;
    if location.is_empty() {
        return None;
    }

    let text = std::str::from_utf8(payload).ok()?;
    let trimmed = text.trim();

    let (count, timestamp) = if let Ok(count) = trimmed.parse::<u32>() {
        (count, None)
    } else {
        let payload: CountPayload = serde_json::from_str(trimmed).ok()?;
        (payload.count, payload.timestamp)
    };

    Some(RawReading {
        location: location.to_string(),
        count,
        timestamp: timestamp.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_bare_integer_payload() {
        let reading = parse_count_event("occupancy/Hall A/count", b"42").unwrap();
        assert_eq!(reading.location, "Hall A");
        assert_eq!(reading.count, 42);
    }

    #[test]
    fn test_parse_payload_with_whitespace() {
        let reading = parse_count_event("occupancy/Hall A/count", b" 17\n").unwrap();
        assert_eq!(reading.count, 17);
    }

    #[test]
    fn test_parse_json_payload_with_timestamp() {
        let reading = parse_count_event(
            "occupancy/Hall B/count",
            br#"{"count": 9, "timestamp": "2025-11-20T12:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(reading.location, "Hall B");
        assert_eq!(reading.count, 9);
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2025, 11, 20, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_json_payload_without_timestamp_gets_now() {
        let before = Utc::now();
        let reading = parse_count_event("occupancy/Hall B/count", br#"{"count": 9}"#).unwrap();
        assert!(reading.timestamp >= before);
        assert!(reading.timestamp <= Utc::now());
    }

    #[test]
    fn test_parse_rejects_negative_count() {
        assert!(parse_count_event("occupancy/Hall A/count", b"-3").is_none());
        assert!(parse_count_event("occupancy/Hall A/count", br#"{"count": -3}"#).is_none());
    }

    #[test]
    fn test_parse_rejects_garbage_payload() {
        assert!(parse_count_event("occupancy/Hall A/count", b"not a number").is_none());
        assert!(parse_count_event("occupancy/Hall A/count", &[0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_parse_rejects_empty_location() {
        assert!(parse_count_event("occupancy//count", b"5").is_none());
        assert!(parse_count_event("count", b"5").is_none());
    }
}

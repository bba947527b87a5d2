use std::time::{SystemTime, UNIX_EPOCH};

use relay_producer::{Producer, ProducerError};
use relay_protocol::Hand;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

/// Marshals telemetry into newline-delimited JSON records written to a
/// producer's stdin (§4.9). Bound to one session's producer — the source
/// this was distilled from kept a single process-global stdin handle,
/// which breaks under concurrent sessions; §9 Design Note calls that out
/// explicitly and this type is the fix: every `ReverseChannel` borrows
/// exactly the producer its own session owns.
pub struct ReverseChannel;

#[derive(Serialize)]
struct GyroPayload {
    alpha: f64,
    beta: f64,
    gamma: f64,
    timestamp: u64,
}

impl ReverseChannel {
    /// Writes one `{"type":"Gyro","payload":{...}}` line. The timestamp
    /// is stamped here rather than trusted from the client, since the
    /// `gyro` wire record carries only `alpha`/`beta`/`gamma` (§6).
    pub async fn send_gyro(
        producer: &mut Producer,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<(), ProducerError> {
        let payload = GyroPayload {
            alpha,
            beta,
            gamma,
            timestamp: now_ms(),
        };
        let line = json!({ "type": "Gyro", "payload": payload }).to_string();
        if let Err(err) = producer.write_telemetry_line(&line).await {
            // Telemetry is best-effort (§4.9, §7): log and swallow rather
            // than tearing the session down over a stalled producer.
            warn!(error = %err, "failed to forward gyro telemetry to producer");
            return Err(err);
        }
        Ok(())
    }

    /// Writes one `{"type":"Hand","payload":[...]}` line.
    pub async fn send_hand(producer: &mut Producer, hands: &[Hand]) -> Result<(), ProducerError> {
        let line = json!({ "type": "Hand", "payload": hands }).to_string();
        if let Err(err) = producer.write_telemetry_line(&line).await {
            warn!(error = %err, "failed to forward hand telemetry to producer");
            return Err(err);
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gyro_payload_serializes_with_stamped_timestamp() {
        let payload = GyroPayload {
            alpha: 1.0,
            beta: 2.0,
            gamma: 3.0,
            timestamp: 42,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["alpha"], 1.0);
        assert_eq!(value["timestamp"], 42);
    }
}

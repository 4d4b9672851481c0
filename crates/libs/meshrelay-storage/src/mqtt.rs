//! Local MQTT publisher.
//!
//! Fire-and-forget JSON publishes under `<base_topic>/<node_name>/<kind>`,
//! null fields stripped. The network loop runs as its own task and absorbs
//! connection errors without disturbing packet processing.

use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_topic: String,
}

pub struct MqttPublisher {
    client: AsyncClient,
    base_topic: String,
    node_name: String,
}

impl MqttPublisher {
    pub fn start(settings: &MqttSettings, node_name: &str, cancel: CancellationToken) -> Self {
        let client_id = format!("meshrelay-{node_name}");
        let mut options = MqttOptions::new(client_id, settings.broker.clone(), settings.port);
        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let Some(username) = &settings.username {
            options.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let broker = settings.broker.clone();
        let port = settings.port;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = event_loop.poll() => match event {
                        Ok(Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                            log::info!("mqtt connected to {broker}:{port}");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            log::warn!("mqtt connection error: {err}");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    },
                }
            }
        });

        Self {
            client,
            base_topic: settings.base_topic.clone(),
            node_name: node_name.to_string(),
        }
    }

    /// Publish a record, dropping null fields from the JSON object.
    pub fn publish(&self, kind: &str, record: &serde_json::Value) {
        let topic = format!("{}/{}/{kind}", self.base_topic, self.node_name);
        let payload = match record {
            serde_json::Value::Object(map) => {
                let stripped: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                serde_json::Value::Object(stripped)
            }
            other => other.clone(),
        };
        let body = payload.to_string();
        if let Err(err) = self.client.try_publish(&topic, QoS::AtMostOnce, false, body) {
            log::warn!("mqtt publish to {topic} failed: {err}");
        }
    }
}

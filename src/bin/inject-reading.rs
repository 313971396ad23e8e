//! Sensor reading injection utility
//!
//! Publishes synthetic device frames to a broker so a running `agrolink watch`
//! can be exercised without field hardware.
//!
//! ## Usage
//!
//! ```bash
//! # Bare scalar on the per-kind stream topic
//! inject-reading --device field-7 --kind moisture --value 41.5
//!
//! # Pump state
//! inject-reading --device field-7 --state --value ON
//!
//! # Flat JSON object with several readings, repeated every second
//! inject-reading --device field-7 --kind telemetry --format json \
//!   --value '{"moisture": 22, "temp": 19.5, "humidity": 70}' --repeat 10 --interval-ms 1000
//!
//! # key=value text
//! inject-reading --device field-7 --kind moisture --format kv --value "moisture=33,battery=91"
//! ```

use chrono::Utc;
use clap::{Parser, ValueEnum};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PayloadFormat {
    /// The value as-is
    Scalar,
    /// A JSON object; `ts` is added when missing
    Json,
    /// `key=value` pairs
    Kv,
}

#[derive(Parser)]
#[command(
    name = "inject-reading",
    about = "Publish synthetic sensor readings for a device"
)]
struct Args {
    /// Target device ID
    #[arg(long, required = true)]
    device: String,

    /// Reading kind, the last topic segment
    #[arg(long, default_value = "moisture")]
    kind: String,

    /// Payload value
    #[arg(long, required = true)]
    value: String,

    /// Publish on the device's state topic instead of its stream
    #[arg(long)]
    state: bool,

    /// State topic kind used with --state
    #[arg(long, default_value = "motor")]
    state_kind: String,

    /// Payload encoding
    #[arg(long, value_enum, default_value_t = PayloadFormat::Scalar)]
    format: PayloadFormat,

    /// Topic namespace
    #[arg(long, default_value = "farm")]
    namespace: String,

    /// Number of frames to publish
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Delay between frames
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,
}

impl Args {
    fn topic(&self) -> String {
        if self.state {
            format!("{}/{}/state/{}", self.namespace, self.device, self.state_kind)
        } else {
            format!("{}/{}/stream/{}", self.namespace, self.device, self.kind)
        }
    }

    fn payload(&self) -> Result<String, Box<dyn std::error::Error>> {
        Ok(match self.format {
            PayloadFormat::Scalar | PayloadFormat::Kv => self.value.clone(),
            PayloadFormat::Json => {
                let mut value: Value = serde_json::from_str(&self.value)?;
                let object = value
                    .as_object_mut()
                    .ok_or("--format json expects a JSON object")?;
                object
                    .entry("ts")
                    .or_insert_with(|| json!(Utc::now().timestamp_millis()));
                value.to_string()
            }
        })
    }
}

fn validate_segment(name: &str, segment: &str) -> Result<(), Box<dyn std::error::Error>> {
    if segment.is_empty() || segment.contains(['/', '+', '#']) {
        return Err(format!("invalid {name} '{segment}'").into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    validate_segment("device", &args.device)?;
    validate_segment("kind", &args.kind)?;
    validate_segment("namespace", &args.namespace)?;

    let client_id = format!("inject-reading-{}", Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, &args.broker_host, args.broker_port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 10);

    println!(
        "Connecting to MQTT broker {}:{}...",
        args.broker_host, args.broker_port
    );
    let connected = timeout(Duration::from_secs(10), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;
    match connected {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("connection failed: {e}").into()),
        Err(_) => return Err("timed out waiting for CONNACK".into()),
    }

    let poller = tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("MQTT eventloop error: {e}");
                break;
            }
        }
    });

    let topic = args.topic();
    for i in 0..args.repeat {
        let payload = args.payload()?;
        client
            .publish(&topic, QoS::AtLeastOnce, false, payload.clone())
            .await?;
        println!("📤 {topic} {payload}");
        if i + 1 < args.repeat {
            sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    // Let the event loop flush the last publish
    sleep(Duration::from_millis(500)).await;
    client.disconnect().await?;
    poller.abort();
    println!("✅ Published {} frame(s)", args.repeat);
    Ok(())
}

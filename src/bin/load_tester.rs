use clap::Parser;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::time;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Number of simulated devices
    #[arg(long, default_value_t = 10)]
    devices: u32,

    /// Channels per device
    #[arg(long, default_value_t = 3)]
    channels: u32,

    /// Reading batches per second (total throughput target)
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    rate: u64,

    /// Readings per batch
    #[arg(long, default_value_t = 5)]
    batch: u32,

    /// Duration of test in seconds (0 for infinite)
    #[arg(long, default_value_t = 60)]
    duration: u64,
}

#[derive(Serialize)]
struct ReadingPayload {
    channel_id: String,
    value: f64,
    unit: String,
    #[serde(rename = "type")]
    data_type: String,
    collected_at: String, // RFC 3339
}

#[derive(Serialize)]
struct BatchPayload {
    readings: Vec<ReadingPayload>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    println!("Starting load tester with config: {:?}", args);

    // 1. Setup MQTT client
    let client_id = format!("load_tester_{}", uuid::Uuid::new_v4());
    let mut mqttoptions = MqttOptions::new(client_id, &args.host, args.port);
    mqttoptions.set_keep_alive(Duration::from_secs(5));
    mqttoptions.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

    // Spawn event loop in background to handle network traffic
    tokio::spawn(async move {
        while eventloop.poll().await.is_ok() {
            // Just drain the event loop
        }
    });

    // 2. Load generation loop
    let start_time = std::time::Instant::now();
    let interval_duration = Duration::from_micros(1_000_000 / args.rate);
    let mut interval = time::interval(interval_duration);

    let mut total_sent: u64 = 0;

    loop {
        interval.tick().await;

        if args.duration > 0 && start_time.elapsed().as_secs() >= args.duration {
            println!("Configured duration {}s elapsed. Stopping.", args.duration);
            break;
        }

        // Round-robin device selection
        let device_id = (total_sent % args.devices as u64) + 1;

        let now = ::time::OffsetDateTime::now_utc()
            .format(&::time::format_description::well_known::Rfc3339)?;

        let mut rng = rand::thread_rng();
        let readings = (0..args.batch)
            .map(|i| ReadingPayload {
                channel_id: format!("ch{}", (i % args.channels) + 1),
                value: rng.gen_range(-50.0..50.0),
                unit: "mV".to_string(),
                data_type: "amplitude".to_string(),
                collected_at: now.clone(),
            })
            .collect();

        let topic = format!("devices/{}/readings", device_id);
        let payload = serde_json::to_vec(&BatchPayload { readings })?;

        if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
            eprintln!("Failed to publish: {:?}", e);
        }

        total_sent += 1;

        if total_sent % args.rate == 0 {
            println!("Sent {} batches...", total_sent);
        }
    }

    println!("Load test complete. Total batches sent: {}", total_sent);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_is_rejected() {
        // rate feeds an interval divisor, so it must be at least 1.
        assert!(Args::try_parse_from(["load_tester", "--rate", "0"]).is_err());
        let args = Args::try_parse_from(["load_tester", "--rate", "1"]).unwrap();
        assert_eq!(args.rate, 1);
    }
}

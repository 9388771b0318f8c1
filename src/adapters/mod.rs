pub mod kafka;
pub mod mqtt;
pub mod timescale;

pub use kafka::KafkaAdapter;
pub use mqtt::MqttAdapter;
pub use timescale::TimescaleRepository;

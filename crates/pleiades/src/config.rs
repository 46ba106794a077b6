//! Configuration file handling for pleiades

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pleiades_ingest::{IngestOptions, DEFAULT_CHANNEL_CAPACITY, DEFAULT_URI};
use pleiades_sink::config::{DEFAULT_BATCH_SIZE, DEFAULT_LINGER};
use pleiades_sink::{FileSinkConfig, LogSinkConfig, SinkConfig};
use pleiades_sse::StreamConfig;
use serde::{Deserialize, Serialize};

use crate::IngestArgs;

pub const DEFAULT_PUBLISH_DIR: &str = "./events";
pub const DEFAULT_BROKER: &str = "localhost:9092";
pub const DEFAULT_TOPIC: &str = "pleiades-events";
pub const DEFAULT_METRICS_PORT: u16 = 9000;

/// Contents of `config.toml`; every value is optional
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Upstream event stream
    pub uri: Option<String>,
    pub resume: Option<bool>,
    pub reconnect_delay_ms: Option<u64>,
    pub channel_capacity: Option<usize>,
    /// Port of the `/metrics` endpoint, 0 disables it
    pub metrics_port: Option<u16>,
    pub progress: Option<bool>,
    pub file: FileSection,
    pub kafka: KafkaSection,
    pub stream: StreamSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileSection {
    pub enable: Option<bool>,
    pub publish_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaSection {
    pub enable: Option<bool>,
    pub brokers: Option<Vec<String>>,
    pub topic: Option<String>,
    pub batch_size: Option<usize>,
    pub linger_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct StreamSection {
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("pleiades");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: &IngestArgs) -> Result<MergedConfig> {
        let file_enabled = args.file_enable || self.file.enable.unwrap_or(false);
        let kafka_enabled = args.kafka_enable || self.kafka.enable.unwrap_or(false);

        let file = file_enabled.then(|| FileSinkConfig {
            destination: args
                .file_publish_dir
                .clone()
                .or_else(|| self.file.publish_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLISH_DIR)),
        });

        let kafka = kafka_enabled.then(|| {
            let brokers = if args.kafka_broker.is_empty() {
                self.kafka
                    .brokers
                    .clone()
                    .unwrap_or_else(|| vec![DEFAULT_BROKER.to_string()])
            } else {
                args.kafka_broker.clone()
            };
            LogSinkConfig {
                brokers,
                topic: args
                    .kafka_topic
                    .clone()
                    .or_else(|| self.kafka.topic.clone())
                    .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
                batch_size: self.kafka.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                linger: self
                    .kafka
                    .linger_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_LINGER),
            }
        });

        let sink = SinkConfig::from_selection(file, kafka)
            .context("Exactly one of --file-enable and --kafka-enable must be set")?;

        let defaults = StreamConfig::default();
        let stream = StreamConfig {
            connect_timeout: self
                .stream
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            read_timeout: self
                .stream
                .read_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_timeout),
        };

        let uri = args
            .uri
            .clone()
            .or_else(|| self.uri.clone())
            .unwrap_or_else(|| DEFAULT_URI.to_string());

        let options = IngestOptions {
            uri,
            resume: !args.no_resume && self.resume.unwrap_or(true),
            sink,
            channel_capacity: args
                .channel_capacity
                .or(self.channel_capacity)
                .unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            reconnect_delay: Duration::from_millis(
                args.reconnect_delay_ms
                    .or(self.reconnect_delay_ms)
                    .unwrap_or(0),
            ),
            stream,
            progress: !args.no_progress && self.progress.unwrap_or(true),
        };
        options.validate()?;

        Ok(MergedConfig {
            options,
            metrics_port: args
                .metrics_port
                .or(self.metrics_port)
                .unwrap_or(DEFAULT_METRICS_PORT),
        })
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub options: IngestOptions,
    /// 0 disables the metrics endpoint
    pub metrics_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args() -> IngestArgs {
        IngestArgs {
            uri: None,
            no_resume: false,
            file_enable: false,
            file_publish_dir: None,
            kafka_enable: false,
            kafka_broker: Vec::new(),
            kafka_topic: None,
            metrics_port: None,
            reconnect_delay_ms: None,
            channel_capacity: None,
            no_progress: false,
        }
    }

    #[test]
    fn test_file_sink_defaults() {
        let merged = Config::default()
            .merge_with_args(&IngestArgs {
                file_enable: true,
                ..args()
            })
            .unwrap();

        assert_eq!(merged.options.uri, DEFAULT_URI);
        assert!(merged.options.resume);
        assert_eq!(merged.options.channel_capacity, 32);
        assert_eq!(merged.metrics_port, 9000);
        assert_eq!(
            merged.options.sink,
            SinkConfig::File(FileSinkConfig {
                destination: PathBuf::from("./events")
            })
        );
    }

    #[test]
    fn test_kafka_sink_defaults() {
        let merged = Config::default()
            .merge_with_args(&IngestArgs {
                kafka_enable: true,
                ..args()
            })
            .unwrap();

        let SinkConfig::Log(log) = merged.options.sink else {
            panic!("expected kafka sink");
        };
        assert_eq!(log.brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(log.topic, "pleiades-events");
        assert_eq!(log.batch_size, 100);
    }

    #[test]
    fn test_sink_selection_is_exclusive() {
        let both = IngestArgs {
            file_enable: true,
            kafka_enable: true,
            ..args()
        };
        assert!(Config::default().merge_with_args(&both).is_err());
        assert!(Config::default().merge_with_args(&args()).is_err());
    }

    #[test]
    fn test_args_override_file() {
        let config: Config = toml::from_str(
            r#"
            uri = "http://from-file/stream"
            resume = false
            metrics_port = 9100

            [file]
            enable = true
            publish_dir = "/var/lib/pleiades"

            [stream]
            read_timeout_secs = 5
            "#,
        )
        .unwrap();

        let from_file = config.merge_with_args(&args()).unwrap();
        assert_eq!(from_file.options.uri, "http://from-file/stream");
        assert!(!from_file.options.resume);
        assert_eq!(from_file.metrics_port, 9100);
        assert_eq!(
            from_file.options.stream.read_timeout,
            Duration::from_secs(5)
        );

        let overridden = config
            .merge_with_args(&IngestArgs {
                uri: Some("http://from-cli/stream".into()),
                file_publish_dir: Some(PathBuf::from("/tmp/events")),
                metrics_port: Some(0),
                ..args()
            })
            .unwrap();
        assert_eq!(overridden.options.uri, "http://from-cli/stream");
        assert_eq!(overridden.metrics_port, 0);
        assert_eq!(
            overridden.options.sink,
            SinkConfig::File(FileSinkConfig {
                destination: PathBuf::from("/tmp/events")
            })
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("colour = true").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "channel_capacity = 64\n[kafka]\ntopic = \"t\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.channel_capacity, Some(64));
        assert_eq!(config.kafka.topic.as_deref(), Some("t"));

        assert!(Config::load_from(&dir.path().join("missing.toml")).is_err());
    }
}

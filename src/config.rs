//! Configuration management
//!
//! [`AppConfig`] is the on-disk TOML configuration. [`RunConfig`] is the
//! immutable per-run subset handed to [`crate::session::StreamSession::start`].

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Result, SessionError};
use crate::protocol::{ChannelSelection, PacketLength, SampleFormat};

/// Transit-time factor relating sample rate and flow speed (uL/min) to
/// the expected pulse width in samples.
const PULSE_TRANSIT_FACTOR: f64 = 1.5e-3;

/// Refractory window expressed in expected pulse widths
const REFRACTORY_PULSE_MULTIPLE: u32 = 10;

/// Immutable parameters of a single streaming run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub channels: ChannelSelection,
    pub packet_length: PacketLength,
    pub format: SampleFormat,
    /// Requested sample rate in S/s; the actual rate will be at or below it
    pub sample_rate: f64,
    /// Detection threshold, in raw sample units
    pub threshold: f64,
    /// Refractory width in samples
    pub refractory_width: u32,
    /// Index of the channel under test within `channels`
    pub detect_channel: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            channels: ChannelSelection::X,
            packet_length: PacketLength::Bytes1024,
            format: SampleFormat::Int16,
            sample_rate: DEFAULT_SAMPLE_RATE,
            threshold: 1.0,
            refractory_width: 300,
            detect_channel: 0,
        }
    }
}

impl RunConfig {
    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> std::result::Result<(), SessionError> {
        let invalid = |msg: String| Err(SessionError::InvalidConfig(msg));

        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return invalid(format!("sample rate must be positive, got {}", self.sample_rate));
        }
        if !self.threshold.is_finite() {
            return invalid(format!("threshold must be finite, got {}", self.threshold));
        }
        if self.refractory_width == 0 {
            return invalid("refractory width must be at least one sample".into());
        }
        if self.detect_channel >= self.channels.count() {
            return invalid(format!(
                "detect channel {} out of range for {} ({} channels)",
                self.detect_channel,
                self.channels,
                self.channels.count()
            ));
        }
        let stride = self.channels.count() * self.format.element_size();
        if self.packet_length.payload_bytes() % stride != 0 {
            return invalid(format!(
                "{} byte packets do not hold whole {} samples",
                self.packet_length.payload_bytes(),
                self.channels
            ));
        }
        Ok(())
    }

    /// Values carried by one datagram, across all channels
    pub fn values_per_packet(&self) -> usize {
        self.packet_length.payload_bytes() / self.format.element_size()
    }

    /// Sample points per channel carried by one datagram
    pub fn samples_per_packet(&self) -> usize {
        self.values_per_packet() / self.channels.count()
    }

    /// Set the refractory width from the fluidic flow speed
    pub fn with_flow_speed(mut self, flow_ul_per_min: f64) -> Self {
        self.refractory_width = refractory_from_flow_speed(self.sample_rate, flow_ul_per_min);
        self
    }
}

/// Derive a refractory width (samples) from sample rate and flow speed.
///
/// A particle crossing the detection region produces a pulse lasting about
/// `1.5e-3 * rate / flow` samples; the window spans ten such pulses.
pub fn refractory_from_flow_speed(sample_rate: f64, flow_ul_per_min: f64) -> u32 {
    if flow_ul_per_min.is_nan() || flow_ul_per_min <= 0.0 || !sample_rate.is_finite() {
        return 1;
    }
    let pulse = (PULSE_TRANSIT_FACTOR * sample_rate / flow_ul_per_min).round();
    let pulse = pulse.clamp(0.0, (u32::MAX / REFRACTORY_PULSE_MULTIPLE) as f64) as u32;
    (pulse * REFRACTORY_PULSE_MULTIPLE).max(1)
}

/// Control link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    pub address: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_INSTRUMENT_ADDRESS.to_string(),
            port: DEFAULT_CONTROL_PORT,
            timeout_ms: 2000,
        }
    }
}

impl InstrumentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Local UDP endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: IpAddr,
    /// Port the instrument streams to; 0 picks an ephemeral port
    pub udp_port: u16,
    pub recv_buffer_size: usize,
    /// Receive timeout, doubling as the receiver's cancellation poll interval
    pub read_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            udp_port: DEFAULT_UDP_PORT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            read_timeout_ms: 50,
        }
    }
}

impl NetworkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

/// Pipeline queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub raw_queue_capacity: usize,
    pub sample_queue_capacity: usize,
    pub event_queue_capacity: usize,
    /// Advance the sequence tracker on datagrams that fail to decode
    pub track_corrupt_sequence: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sample_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_queue_capacity: 64,
            track_corrupt_sequence: true,
        }
    }
}

/// Settings for the command-line capture tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Stop after this many seconds; 0 streams until interrupted
    pub duration_secs: f64,
    /// Flow speed in uL/min; overrides `run.refractory_width` when set
    pub flow_speed: Option<f64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            duration_secs: 3.0,
            flow_speed: None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub network: NetworkConfig,
    pub pipeline: PipelineConfig,
    pub run: RunConfig,
    pub capture: CaptureConfig,
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lockin-stream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Run configuration with capture overrides applied
    pub fn effective_run(&self) -> RunConfig {
        match self.capture.flow_speed {
            Some(flow) => self.run.clone().with_flow_speed(flow),
            None => self.run.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_rate = RunConfig { sample_rate: 0.0, ..Default::default() };
        assert!(matches!(bad_rate.validate(), Err(SessionError::InvalidConfig(_))));

        let bad_width = RunConfig { refractory_width: 0, ..Default::default() };
        assert!(bad_width.validate().is_err());

        let bad_threshold = RunConfig { threshold: f64::NAN, ..Default::default() };
        assert!(bad_threshold.validate().is_err());

        let bad_channel = RunConfig {
            channels: ChannelSelection::XY,
            detect_channel: 2,
            ..Default::default()
        };
        assert!(bad_channel.validate().is_err());
    }

    #[test]
    fn test_every_combination_fits_packets() {
        for channels in [
            ChannelSelection::X,
            ChannelSelection::XY,
            ChannelSelection::RT,
            ChannelSelection::XYRT,
        ] {
            for packet_length in PacketLength::ALL {
                for format in [SampleFormat::Int16, SampleFormat::Float32] {
                    let config = RunConfig { channels, packet_length, format, ..Default::default() };
                    assert!(config.validate().is_ok(), "{:?}", config);
                }
            }
        }
    }

    #[test]
    fn test_samples_per_packet() {
        let config = RunConfig {
            channels: ChannelSelection::XY,
            packet_length: PacketLength::Bytes512,
            format: SampleFormat::Float32,
            ..Default::default()
        };
        assert_eq!(config.values_per_packet(), 128);
        assert_eq!(config.samples_per_packet(), 64);
    }

    #[test]
    fn test_refractory_from_flow_speed() {
        // 1e4 S/s at 0.5 uL/min: 30-sample pulses, 300-sample window
        assert_eq!(refractory_from_flow_speed(1e4, 0.5), 300);
        assert_eq!(refractory_from_flow_speed(1e4, 0.0), 1);
        assert_eq!(refractory_from_flow_speed(1.0, 100.0), 1);
    }

    #[test]
    fn test_toml_roundtrip_and_partial() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);

        let partial: AppConfig = toml::from_str(
            "[run]\nchannels = \"RT\"\nformat = \"float32\"\npacket_length = 128\n",
        )
        .unwrap();
        assert_eq!(partial.run.channels, ChannelSelection::RT);
        assert_eq!(partial.run.format, SampleFormat::Float32);
        assert_eq!(partial.run.packet_length, PacketLength::Bytes128);
        assert_eq!(partial.network.udp_port, DEFAULT_UDP_PORT);
    }

    #[test]
    fn test_effective_run_applies_flow_speed() {
        let mut config = AppConfig::default();
        config.capture.flow_speed = Some(1.0);
        assert_eq!(config.effective_run().refractory_width, 150);
    }
}

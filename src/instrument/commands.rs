//! Stream configuration command sequence

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RunConfig;
use crate::constants::MAX_DECIMATION;
use crate::error::InstrumentError;
use crate::instrument::link::InstrumentLink;

/// Big-endian samples with data-integrity checking
const STREAM_OPTION: u8 = 2;

/// Sample rate the instrument will actually stream at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamRate {
    /// Highest rate the current filter settings allow (S/s)
    pub max_rate: f64,
    /// Decimation exponent: the stream runs at `max_rate / 2^exponent`
    pub exponent: u32,
    pub effective_rate: f64,
}

impl StreamRate {
    /// Datagrams per second at this rate
    pub fn packets_per_second(&self, config: &RunConfig) -> f64 {
        self.effective_rate / config.samples_per_packet() as f64
    }

    /// Datagrams expected over `duration`, rounded up
    pub fn expected_packets(&self, config: &RunConfig, duration: Duration) -> u64 {
        (self.packets_per_second(config) * duration.as_secs_f64()).ceil() as u64
    }

    /// Nominal spacing between datagrams
    pub fn packet_interval(&self, config: &RunConfig) -> Duration {
        let pps = self.packets_per_second(config);
        if pps > 0.0 && pps.is_finite() {
            Duration::from_secs_f64(1.0 / pps)
        } else {
            Duration::ZERO
        }
    }
}

/// Smallest power-of-two decimation keeping the rate at or below `requested`.
///
/// The exponent is `ceil(log2(max_rate / requested))` clamped to `0..=20`.
pub fn compute_decimation(max_rate: f64, requested: f64) -> StreamRate {
    let exponent = (max_rate / requested)
        .log2()
        .ceil()
        .clamp(0.0, MAX_DECIMATION as f64) as u32;
    let rate = StreamRate {
        max_rate,
        exponent,
        effective_rate: max_rate / f64::from(1u32 << exponent),
    };
    tracing::info!(
        "Max rate is {:.3} kS/s, decimating by 2^{} down to {:.3} kS/s",
        max_rate * 1e-3,
        exponent,
        rate.effective_rate * 1e-3
    );
    rate
}

/// Turn streaming on or off
pub fn set_streaming<L: InstrumentLink + ?Sized>(link: &mut L, on: bool) -> Result<(), InstrumentError> {
    link.write(if on { "STREAM ON" } else { "STREAM OFF" })
}

/// Query the maximum achievable stream rate
pub fn query_max_rate<L: InstrumentLink + ?Sized>(link: &mut L) -> Result<f64, InstrumentError> {
    const QUERY: &str = "STREAMRATEMAX?";
    let response = link.query(QUERY)?;
    match response.parse::<f64>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
        _ => Err(InstrumentError::InvalidResponse {
            command: QUERY.to_string(),
            response,
        }),
    }
}

/// Point the stream at a local UDP port
pub fn set_destination_port<L: InstrumentLink + ?Sized>(
    link: &mut L,
    port: u16,
) -> Result<(), InstrumentError> {
    link.write(&format!("STREAMPORT {}", port))
}

/// Configure and arm the stream for `config`, sending to `port`.
///
/// Streaming is disabled first so the layout never changes mid-stream.
pub fn configure_stream<L: InstrumentLink + ?Sized>(
    link: &mut L,
    config: &RunConfig,
    port: u16,
) -> Result<StreamRate, InstrumentError> {
    set_streaming(link, false)?;
    link.write(&format!("STREAMCH {}", config.channels))?;
    link.write(&format!("STREAMFMT {}", config.format.wire_code()))?;
    link.write(&format!("STREAMOPTION {}", STREAM_OPTION))?;
    link.write(&format!("STREAMPCKT {}", config.packet_length.wire_index()))?;

    let max_rate = query_max_rate(link)?;
    let rate = compute_decimation(max_rate, config.sample_rate);
    link.write(&format!("STREAMRATE {}", rate.exponent))?;

    set_destination_port(link, port)?;
    set_streaming(link, true)?;
    Ok(rate)
}

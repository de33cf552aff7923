//! Configuration document: JSON, with integer fields accepting decimal or
//! 0x-prefixed hex strings.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use tr_audio::TalkgroupPolicy;
use tr_trunking::receiver::Modulation;
use tr_trunking::{SystemParams, SystemType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Accept `42`, `"42"`, or `"0x2A"`.
fn flexible_u32<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Raw::deserialize(de)? {
        Raw::Num(n) => u32::try_from(n).map_err(serde::de::Error::custom),
        Raw::Str(s) => parse_int(&s).map_err(serde::de::Error::custom),
    }
}

fn flexible_opt_u32<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Option::<Raw>::deserialize(de)? {
        None => Ok(None),
        Some(Raw::Num(n)) => u32::try_from(n).map(Some).map_err(serde::de::Error::custom),
        Some(Raw::Str(s)) => parse_int(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

fn flexible_u32_vec<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    let raw = Vec::<Raw>::deserialize(de)?;
    raw.into_iter()
        .map(|r| match r {
            Raw::Num(n) => u32::try_from(n).map_err(|e| serde::de::Error::custom(e)),
            Raw::Str(s) => parse_int(&s).map_err(serde::de::Error::custom),
        })
        .collect()
}

fn parse_int(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| format!("malformed integer: {:?}", s))
}

/// Tuner gain: "auto" or a value in dB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Gain {
    Mode(String),
    Db(f64),
}

impl Default for Gain {
    fn default() -> Self {
        Gain::Mode("auto".into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdrConfig {
    #[serde(deserialize_with = "flexible_u32")]
    pub device_index: u32,
    #[serde(deserialize_with = "flexible_u32")]
    pub sample_rate: u32,
    pub gain: Gain,
    pub ppm_correction: i32,
}

impl Default for SdrConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            sample_rate: 2_048_000,
            gain: Gain::default(),
            ppm_correction: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    P25,
    P25Phase1,
    P25Phase2,
    Smartnet,
    Smartzone,
    Edacs,
    Dmr,
    Nxdn,
    Tetra,
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemKind::P25 | SystemKind::P25Phase1 => "p25",
            SystemKind::P25Phase2 => "p25_phase2",
            SystemKind::Smartnet => "smartnet",
            SystemKind::Smartzone => "smartzone",
            SystemKind::Edacs => "edacs",
            SystemKind::Dmr => "dmr",
            SystemKind::Nxdn => "nxdn",
            SystemKind::Tetra => "tetra",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(rename = "type")]
    pub kind: SystemKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub system_id: Option<u32>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub nac: Option<u32>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub wacn: Option<u32>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub mcc: Option<u32>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub mnc: Option<u32>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub color_code: Option<u32>,
    /// Control-channel frequencies in Hz, at least one.
    pub control_channels: Vec<f64>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub modulation: Option<String>,
    /// SmartNet/TETRA band plan.
    #[serde(default)]
    pub base_frequency: Option<f64>,
    #[serde(default)]
    pub channel_spacing: Option<f64>,
    /// TETRA downlink offset from the carrier raster.
    #[serde(default)]
    pub duplex_offset: Option<f64>,
    /// DMR Capacity Plus rest channel.
    #[serde(default)]
    pub rest_channel: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TalkgroupConfig {
    #[serde(deserialize_with = "flexible_u32_vec")]
    pub enabled: Vec<u32>,
    pub priority: HashMap<String, u8>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub output_device: String,
    pub codec: Option<String>,
    #[serde(deserialize_with = "flexible_u32")]
    pub sample_rate: u32,
    pub record_calls: bool,
    pub recording_path: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: "default".into(),
            codec: None,
            sample_rate: 8000,
            record_calls: false,
            recording_path: ".".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sdr: SdrConfig,
    pub system: SystemConfig,
    #[serde(default)]
    pub talkgroups: TalkgroupConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides, applied before validation.
    fn apply_env(&mut self) {
        if let Ok(idx) = std::env::var("SDR_DEVICE_INDEX") {
            match parse_int(&idx) {
                Ok(v) => self.sdr.device_index = v,
                Err(e) => log::warn!("ignoring SDR_DEVICE_INDEX: {}", e),
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.system.control_channels.is_empty() {
            return Err(ConfigError::Invalid(
                "system.control_channels must list at least one frequency".into(),
            ));
        }
        match self.system.kind {
            SystemKind::P25 | SystemKind::P25Phase1 | SystemKind::P25Phase2 => {
                match self.system.nac {
                    Some(nac) if nac <= 0xFFF => {}
                    Some(nac) => {
                        return Err(ConfigError::Invalid(format!(
                            "system.nac {:#x} does not fit in 12 bits",
                            nac
                        )))
                    }
                    None => {
                        return Err(ConfigError::Invalid(
                            "system.nac is required for P25 systems".into(),
                        ))
                    }
                }
            }
            SystemKind::Smartnet | SystemKind::Smartzone => {
                if let Some(baud) = self.system.baud_rate {
                    if baud != 3600 && baud != 9600 {
                        return Err(ConfigError::Invalid(format!(
                            "system.baud_rate {} not supported (3600 or 9600)",
                            baud
                        )));
                    }
                }
            }
            _ => {}
        }
        if let Some(m) = &self.system.modulation {
            if self.modulation().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "unknown modulation override {:?}",
                    m
                )));
            }
        }
        Ok(())
    }

    pub fn modulation(&self) -> Option<Modulation> {
        match self.system.modulation.as_deref() {
            Some("c4fm") => Some(Modulation::C4fm),
            Some("fsk") => Some(Modulation::Fsk),
            Some("gmsk") => Some(Modulation::Gmsk),
            Some("qpsk") => Some(Modulation::Qpsk),
            _ => None,
        }
    }

    pub fn system_type(&self) -> SystemType {
        match self.system.kind {
            SystemKind::P25 | SystemKind::P25Phase1 => SystemType::P25Phase1,
            SystemKind::P25Phase2 => SystemType::P25Phase2,
            SystemKind::Smartnet => SystemType::Smartnet,
            SystemKind::Smartzone => SystemType::Smartzone,
            SystemKind::Edacs => SystemType::Edacs,
            SystemKind::Dmr => SystemType::Dmr,
            SystemKind::Nxdn => SystemType::Nxdn,
            SystemKind::Tetra => SystemType::Tetra,
        }
    }

    /// Resolve the parameters the decode chain needs.
    pub fn system_params(&self) -> SystemParams {
        let mut params = SystemParams::new(self.system_type(), self.system.control_channels.clone());
        params.name = self.system.name.clone();
        params.nac = self.system.nac.unwrap_or(0) as u16;
        params.color_code = self.system.color_code.map(|c| c as u8);
        if let Some(baud) = self.system.baud_rate {
            params.baud_rate = baud;
        }
        if let Some(base) = self.system.base_frequency {
            params.base_frequency_hz = base;
        } else if self.system_type() == SystemType::Tetra {
            params.base_frequency_hz = 380_000_000.0;
        }
        if let Some(spacing) = self.system.channel_spacing {
            params.channel_spacing_hz = spacing;
        }
        if let Some(offset) = self.system.duplex_offset {
            params.duplex_offset_hz = offset;
        } else if self.system_type() != SystemType::Tetra {
            params.duplex_offset_hz = 0.0;
        }
        params.rest_channel_hz = self.system.rest_channel;
        params
    }

    /// Talkgroup policy for the call manager.
    pub fn talkgroup_policy(&self) -> TalkgroupPolicy {
        let mut policy = TalkgroupPolicy {
            enabled: self.talkgroups.enabled.iter().copied().collect(),
            ..TalkgroupPolicy::default()
        };
        for (key, &prio) in &self.talkgroups.priority {
            match parse_int(key) {
                Ok(tg) => {
                    policy.priorities.insert(tg, prio);
                }
                Err(e) => log::warn!("ignoring talkgroup priority key: {}", e),
            }
        }
        for (key, label) in &self.talkgroups.labels {
            match parse_int(key) {
                Ok(tg) => {
                    policy.labels.insert(tg, label.clone());
                }
                Err(e) => log::warn!("ignoring talkgroup label key: {}", e),
            }
        }
        policy
    }

    /// Voice codec, defaulted by system family.
    pub fn codec(&self) -> &str {
        match self.audio.codec.as_deref() {
            Some(c) => c,
            None => match self.system.kind {
                SystemKind::Smartnet | SystemKind::Smartzone | SystemKind::Edacs => "analog",
                SystemKind::Dmr | SystemKind::Nxdn => "ambe",
                SystemKind::Tetra => "acelp",
                _ => "imbe",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "system": {
            "type": "p25",
            "nac": "0x293",
            "control_channels": [851012500.0]
        }
    }"#;

    #[test]
    fn test_minimal_config() {
        let config = Config::from_json(MINIMAL).expect("valid config");
        assert_eq!(config.system.nac, Some(0x293));
        assert_eq!(config.sdr.sample_rate, 2_048_000);
        assert_eq!(config.sdr.device_index, 0);
        assert_eq!(config.audio.sample_rate, 8000);
        assert!(config.talkgroups.enabled.is_empty());
    }

    #[test]
    fn test_hex_and_decimal_integers() {
        let text = r#"{
            "sdr": { "device_index": "1", "sample_rate": "0x1F4000" },
            "system": {
                "type": "p25",
                "nac": 659,
                "control_channels": [851012500.0]
            },
            "talkgroups": { "enabled": ["0x64", 200] }
        }"#;
        let config = Config::from_json(text).expect("valid config");
        assert_eq!(config.sdr.device_index, 1);
        assert_eq!(config.sdr.sample_rate, 0x1F4000);
        assert_eq!(config.system.nac, Some(659));
        assert_eq!(config.talkgroups.enabled, vec![100, 200]);
    }

    #[test]
    fn test_missing_control_channels_fatal() {
        let text = r#"{ "system": { "type": "p25", "nac": 1, "control_channels": [] } }"#;
        assert!(Config::from_json(text).is_err());
    }

    #[test]
    fn test_p25_requires_nac() {
        let text = r#"{ "system": { "type": "p25", "control_channels": [851012500.0] } }"#;
        assert!(Config::from_json(text).is_err());
    }

    #[test]
    fn test_unknown_system_type_fatal() {
        let text = r#"{ "system": { "type": "ltr", "control_channels": [851012500.0] } }"#;
        assert!(Config::from_json(text).is_err());
    }

    #[test]
    fn test_malformed_integer_fatal() {
        let text = r#"{
            "system": { "type": "p25", "nac": "0xZZ", "control_channels": [851012500.0] }
        }"#;
        assert!(Config::from_json(text).is_err());
    }

    #[test]
    fn test_round_trip_is_stable() {
        let text = r#"{
            "sdr": { "device_index": 2, "sample_rate": 2048000, "gain": 28.0, "ppm_correction": -3 },
            "system": {
                "type": "tetra",
                "mcc": "0xEA",
                "mnc": 14,
                "color_code": 1,
                "control_channels": [382612500.0]
            },
            "talkgroups": {
                "enabled": [1001],
                "priority": { "1001": 7 },
                "labels": { "1001": "dispatch" }
            },
            "audio": { "record_calls": true, "recording_path": "/tmp" }
        }"#;
        let parsed = Config::from_json(text).expect("valid config");
        let serialized = serde_json::to_string(&parsed).expect("serialize");
        let reparsed = Config::from_json(&serialized).expect("reparse");
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn test_talkgroup_policy_conversion() {
        let text = r#"{
            "system": { "type": "smartnet", "control_channels": [851012500.0] },
            "talkgroups": {
                "enabled": [100],
                "priority": { "100": 9, "0x64": 9 },
                "labels": { "100": "fire dispatch" }
            }
        }"#;
        let config = Config::from_json(text).expect("valid config");
        let policy = config.talkgroup_policy();
        assert!(policy.is_enabled(100));
        assert!(!policy.is_enabled(101));
        assert_eq!(policy.priority(100), 9);
        assert_eq!(policy.label(100), Some("fire dispatch"));
    }

    #[test]
    fn test_codec_defaults_by_system() {
        let p25 = Config::from_json(MINIMAL).unwrap();
        assert_eq!(p25.codec(), "imbe");

        let text = r#"{ "system": { "type": "smartnet", "control_channels": [851012500.0] } }"#;
        assert_eq!(Config::from_json(text).unwrap().codec(), "analog");
    }

    #[test]
    fn test_tetra_band_defaults() {
        let text = r#"{
            "system": { "type": "tetra", "control_channels": [382612500.0] }
        }"#;
        let params = Config::from_json(text).unwrap().system_params();
        assert_eq!(params.base_frequency_hz, 380_000_000.0);
        assert_eq!(params.duplex_offset_hz, 12_500.0);
        assert_eq!(params.channel_spacing_hz, 25_000.0);
    }
}

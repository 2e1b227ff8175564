// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Top-level broker configuration: wire limits, timeouts, and the exec-host
/// companion socket settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Payload size and inflight-byte ceilings (spec §6.6).
    #[serde(default)]
    pub limits: Limits,
    /// Invoke and exec-host timer defaults.
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Exec-host local socket settings.
    pub exec_host: ExecHostConfig,
    /// Implementation-only runtime knobs with no wire representation.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Size ceilings from spec §6.6. Defaults match the spec's stated defaults.
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    /// Single-frame cap (`maxPayloadBytes`).
    pub max_payload_bytes: u64,
    /// Total payload cap across an assembled transfer (`maxInvokeResultBytes`).
    pub max_invoke_result_bytes: u64,
    /// Sum of `totalBytes` across all active transfers (`maxInflightBytes`).
    pub max_inflight_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 512 * 1024,
            max_invoke_result_bytes: 50 * 1024 * 1024,
            max_inflight_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Timer defaults for `invoke` (§4.D) and the exec-host client (§4.F).
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// Default `invoke` timeout when the caller does not specify one.
    #[serde(with = "serde_millis")]
    pub default_invoke_timeout_ms: Duration,
    /// Base (pre-approval) exec-host timer.
    #[serde(with = "serde_millis")]
    pub exec_base_timeout_ms: Duration,
    /// Extended timer installed once `exec-pending` arrives with no
    /// `payload.timeoutMs` override.
    #[serde(with = "serde_millis")]
    pub exec_default_pending_timeout_ms: Duration,
    /// Acceptable `|now - ts|` skew for exec-host HMAC requests (open
    /// question in spec §9, resolved here — see DESIGN.md).
    pub hmac_skew_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default_invoke_timeout_ms: Duration::from_millis(30_000),
            exec_base_timeout_ms: Duration::from_millis(20_000),
            exec_default_pending_timeout_ms: Duration::from_millis(300_000),
            hmac_skew_secs: 60,
        }
    }
}

/// Exec-host companion socket identity (spec §4.F/§6.5).
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecHostConfig {
    /// Unix-domain socket path of the local helper.
    pub socket_path: String,
    /// Shared HMAC token, never sent on the wire in cleartext.
    pub token: String,
}

/// Runtime-only settings that do not map to any wire key.
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// External hint for registry pre-sizing; not a hard cap.
    pub expected_nodes: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { expected_nodes: 64 }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.limits.max_payload_bytes > 0,
            "maxPayloadBytes must be > 0"
        );
        ensure!(
            self.limits.max_invoke_result_bytes >= self.limits.max_payload_bytes,
            "maxInvokeResultBytes must be >= maxPayloadBytes"
        );
        ensure!(
            self.limits.max_inflight_bytes >= self.limits.max_invoke_result_bytes,
            "maxInflightBytes must be >= maxInvokeResultBytes"
        );
        ensure!(!self.exec_host.socket_path.is_empty(), "socketPath is required");
        ensure!(!self.exec_host.token.is_empty(), "exec-host token is required");
        Ok(())
    }
}

/// Serde helper for representing `Duration` as a count of milliseconds,
/// matching the `*TimeoutMs` naming the wire protocol uses throughout.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            exec_host: ExecHostConfig {
                socket_path: "/tmp/exec.sock".into(),
                token: "shared-secret".into(),
            },
            runtime: RuntimeConfig::default(),
        }
    }

    #[test]
    fn defaults_match_spec() {
        let l = Limits::default();
        assert_eq!(l.max_payload_bytes, 512 * 1024);
        assert_eq!(l.max_invoke_result_bytes, 50 * 1024 * 1024);
        assert!(l.max_inflight_bytes >= l.max_invoke_result_bytes);
    }

    #[test]
    fn validate_accepts_sample() {
        let mut cfg = sample();
        cfg.validate_and_normalize().expect("sample config is valid");
    }

    #[test]
    fn validate_rejects_bad_limit_ordering() {
        let mut cfg = sample();
        cfg.limits.max_invoke_result_bytes = cfg.limits.max_payload_bytes - 1;
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn round_trips_through_yaml() {
        let cfg = sample();
        let yaml = serde_yaml::to_string(&cfg).expect("serialize");
        let back: Config = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back.exec_host.socket_path, cfg.exec_host.socket_path);
        assert_eq!(
            back.timeouts.default_invoke_timeout_ms,
            cfg.timeouts.default_invoke_timeout_ms
        );
    }
}

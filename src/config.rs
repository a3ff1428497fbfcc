/*
 * This file is part of fscd.
 *
 * Copyright (C) 2025 fscd contributors
 *
 * fscd is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fscd is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fscd. If not, see <https://www.gnu.org/licenses/>.
 */

//! Daemon configuration
//!
//! The configuration is one JSON document (default `/etc/fsc-config.json`).
//! Zone expressions are given inline (`expr`, either source text or the
//! syntax tree as a JSON object) or in a file under the zone directory
//! (`expr_file`, default directory `/etc/fsc`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use fsc_core::constants::{defaults, pwm};
use fsc_core::expr::ExpressionInfo;
use fsc_core::{
    build_eval_tree, build_from_ast, AstNode, EvalTree, FailSensorPolicy, ProfileSpec, Profiles,
    SourceSpec, SsdProgressiveAlgorithm,
};
use fsc_error::{FscError, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fsc-config.json";
pub const DEFAULT_ZONE_DIR: &str = "/etc/fsc";
pub const DEFAULT_SENSOR_UTIL: &str = "/usr/local/bin/sensor-util";

fn default_ramp_rate() -> f64 {
    defaults::RAMP_RATE_PERCENT
}

fn default_transitional() -> f64 {
    defaults::TRANSITIONAL_PERCENT
}

fn default_boost() -> f64 {
    defaults::BOOST_PERCENT
}

fn default_sensor_source() -> SourceSpec {
    SourceSpec::Util(DEFAULT_SENSOR_UTIL.to_string())
}

fn default_max_duty() -> u32 {
    pwm::DEFAULT_MAX_DUTY_REGISTER
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct BoostConfig {
    /// Boost every zone while any fan is below `min_rpm`
    #[serde(default)]
    pub fan_fail: bool,
    /// Enable `fail_sensor_type` and `ssd_progressive_algorithm`
    #[serde(default)]
    pub sensor_fail: bool,
}

/// Fan output target; exactly one of `sysfs`/`util` is expected
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteSourceConfig {
    #[serde(default)]
    pub sysfs: Option<String>,
    #[serde(default)]
    pub util: Option<String>,
    #[serde(default = "default_max_duty")]
    pub max_duty_register: u32,
}

impl WriteSourceConfig {
    pub fn target(&self) -> Option<SourceSpec> {
        match (&self.sysfs, &self.util) {
            (Some(path), None) => Some(SourceSpec::Sysfs(path.clone())),
            (None, Some(cmd)) => Some(SourceSpec::Util(cmd.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FanConfig {
    #[serde(default)]
    pub label: Option<String>,
    pub read_source: SourceSpec,
    #[serde(default)]
    pub write_source: Option<WriteSourceConfig>,
}

/// Fan reference in a zone: `0` and `"0"` name the same fan
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FanRef {
    Index(u64),
    Name(String),
}

impl FanRef {
    pub fn key(&self) -> String {
        match self {
            FanRef::Index(i) => i.to_string(),
            FanRef::Name(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PwmOutput {
    One(FanRef),
    Many(Vec<FanRef>),
}

impl PwmOutput {
    pub fn fan_names(&self) -> Vec<String> {
        match self {
            PwmOutput::One(fan) => vec![fan.key()],
            PwmOutput::Many(fans) => fans.iter().map(FanRef::key).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneConfig {
    pub pwm_output: PwmOutput,
    #[serde(default)]
    pub expr: Option<serde_json::Value>,
    #[serde(default)]
    pub expr_file: Option<String>,
}

impl ZoneConfig {
    /// Compile this zone's expression
    pub fn build_expression(
        &self,
        zone_dir: &Path,
        profiles: &Profiles,
    ) -> Result<(EvalTree, ExpressionInfo)> {
        match (&self.expr, &self.expr_file) {
            (Some(serde_json::Value::String(source)), _) => build_eval_tree(source, profiles),
            (Some(tree), _) => {
                let ast: AstNode = serde_json::from_value(tree.clone())
                    .map_err(|e| FscError::ExpressionSyntax(e.to_string()))?;
                build_from_ast(&ast, profiles)
            }
            (None, Some(file)) => {
                let path = zone_dir.join(file);
                let source = fs::read_to_string(&path)
                    .map_err(|source| FscError::FileRead { path, source })?;
                build_eval_tree(&source, profiles)
            }
            (None, None) => Err(FscError::MissingConfig("zone expr or expr_file".to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProfileSourceConfig {
    #[serde(default)]
    read_source: Option<SourceSpec>,
    #[serde(default)]
    fru: Option<String>,
    #[serde(default)]
    sensor: Option<String>,
}

/// A profile plus the optional path-based sensor it registers
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileConfig {
    pub spec: ProfileSpec,
    pub read_source: Option<SourceSpec>,
    pub fru: String,
    pub sensor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FscConfig {
    #[serde(default = "default_transitional")]
    pub pwm_transition_value: f64,
    #[serde(default = "default_boost")]
    pub pwm_boost_value: f64,
    pub sample_interval_ms: u64,
    #[serde(default = "default_ramp_rate")]
    pub ramp_rate: f64,
    #[serde(default)]
    pub fan_limit_upper_pwm: Option<f64>,
    #[serde(default)]
    pub fan_limit_lower_pwm: Option<f64>,
    #[serde(default)]
    pub min_rpm: u32,
    /// Consecutive cycles without a tachometer reading before a fan is dead
    #[serde(default)]
    pub fan_read_fail_threshold: Option<u32>,
    #[serde(default)]
    pub boost: BoostConfig,
    #[serde(default)]
    pub fail_sensor_type: Option<FailSensorPolicy>,
    #[serde(default)]
    pub ssd_progressive_algorithm: Option<SsdProgressiveAlgorithm>,
    #[serde(default)]
    pub sensor_filter_all: bool,
    #[serde(default = "default_sensor_source")]
    pub sensor_source: SourceSpec,
    #[serde(default)]
    pub profiles: BTreeMap<String, serde_json::Value>,
    pub fans: BTreeMap<String, FanConfig>,
    pub zones: BTreeMap<String, ZoneConfig>,
}

fn validate_percentage(field: &str, value: f64) -> Result<()> {
    if !(pwm::MIN_PERCENT..=pwm::MAX_PERCENT).contains(&value) {
        return Err(FscError::invalid_config(
            field,
            format!("{} is outside 0-100", value),
        ));
    }
    Ok(())
}

impl FscConfig {
    /// Parse and validate a configuration document
    pub fn from_json(data: &str) -> Result<Self> {
        let config: FscConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_percentage("pwm_transition_value", self.pwm_transition_value)?;
        validate_percentage("pwm_boost_value", self.pwm_boost_value)?;
        if let Some(upper) = self.fan_limit_upper_pwm {
            validate_percentage("fan_limit_upper_pwm", upper)?;
        }
        if let Some(lower) = self.fan_limit_lower_pwm {
            validate_percentage("fan_limit_lower_pwm", lower)?;
        }
        if let (Some(upper), Some(lower)) = (self.fan_limit_upper_pwm, self.fan_limit_lower_pwm) {
            if lower > upper {
                return Err(FscError::invalid_config(
                    "fan_limit_lower_pwm",
                    format!("{} is above fan_limit_upper_pwm {}", lower, upper),
                ));
            }
        }
        if self.sample_interval_ms == 0 {
            return Err(FscError::invalid_config("sample_interval_ms", "must be greater than 0"));
        }
        if self.fan_read_fail_threshold == Some(0) {
            return Err(FscError::invalid_config(
                "fan_read_fail_threshold",
                "must be greater than 0",
            ));
        }
        if self.ramp_rate <= 0.0 {
            return Err(FscError::invalid_config("ramp_rate", "must be greater than 0"));
        }
        if self.zones.is_empty() {
            return Err(FscError::MissingConfig("zones".to_string()));
        }

        for (name, fan) in &self.fans {
            if let Some(write) = &fan.write_source {
                if write.target().is_none() {
                    return Err(FscError::invalid_config(
                        format!("fans.{}.write_source", name),
                        "exactly one of sysfs or util is required",
                    ));
                }
            }
        }

        for (name, zone) in &self.zones {
            let fans = zone.pwm_output.fan_names();
            if fans.is_empty() {
                return Err(FscError::invalid_config(
                    format!("zones.{}.pwm_output", name),
                    "no fans listed",
                ));
            }
            if let Some(unknown) = fans.iter().find(|f| !self.fans.contains_key(*f)) {
                return Err(FscError::invalid_config(
                    format!("zones.{}.pwm_output", name),
                    format!("unknown fan '{}'", unknown),
                ));
            }
            if zone.expr.is_none() && zone.expr_file.is_none() {
                return Err(FscError::invalid_config(
                    format!("zones.{}", name),
                    "expr or expr_file is required",
                ));
            }
        }

        self.profile_configs().map(|_| ())
    }

    /// Decode the profile table
    pub fn profile_configs(&self) -> Result<BTreeMap<String, ProfileConfig>> {
        let mut out = BTreeMap::new();
        for (name, value) in &self.profiles {
            let spec: ProfileSpec = serde_json::from_value(value.clone()).map_err(|e| {
                FscError::invalid_config(format!("profiles.{}", name), e.to_string())
            })?;
            let source: ProfileSourceConfig = serde_json::from_value(value.clone()).map_err(|e| {
                FscError::invalid_config(format!("profiles.{}", name), e.to_string())
            })?;
            out.insert(
                name.clone(),
                ProfileConfig {
                    spec,
                    read_source: source.read_source,
                    fru: source
                        .fru
                        .unwrap_or_else(|| defaults::PATH_SENSOR_FRU.to_string()),
                    sensor: source.sensor.unwrap_or_else(|| name.clone()),
                },
            );
        }
        Ok(out)
    }

    /// Fail-sensor policy in effect (requires `boost.sensor_fail`)
    pub fn effective_fail_sensor_type(&self) -> Option<FailSensorPolicy> {
        self.fail_sensor_type.filter(|_| self.boost.sensor_fail)
    }

    /// Progressive offset table in effect (requires `boost.sensor_fail`)
    pub fn effective_ssd_algorithm(&self) -> Option<SsdProgressiveAlgorithm> {
        self.ssd_progressive_algorithm
            .clone()
            .filter(|_| self.boost.sensor_fail)
    }
}

/// Read, parse and validate the configuration file at `path`
pub fn load_config(path: &Path) -> Result<FscConfig> {
    let data = fs::read_to_string(path).map_err(|source| FscError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    FscConfig::from_json(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsc_core::expr::EvalContext;
    use fsc_core::Value;
    use tempfile::TempDir;

    const BASIC: &str = r#"{
        "pwm_transition_value": 70,
        "pwm_boost_value": 100,
        "sample_interval_ms": 3000,
        "boost": {"fan_fail": true, "sensor_fail": true},
        "fail_sensor_type": {"standby_sensor_fail": true, "SSD_sensor_fail": true},
        "ssd_progressive_algorithm": {"offset_algorithm": [[2, 5], [5, 10]]},
        "min_rpm": 800,
        "profiles": {
            "linear_inlet": {
                "type": "linear",
                "data": [[20, 28], [30, 40]],
                "negative_hysteresis": 2
            },
            "pid_cpu": {
                "type": "pid", "setpoint": 80, "kp": -1.25,
                "read_source": {"sysfs": "/sys/class/hwmon/hwmon*/temp1_input"}
            }
        },
        "fans": {
            "0": {
                "read_source": {"util": "fan-util --get 0"},
                "write_source": {"util": "fan-util --set %d 0", "max_duty_register": 100}
            },
            "1": {
                "label": "Fan 1 Rear",
                "read_source": {"sysfs": "/sys/devices/hwmon/hwmon*/fan2_input"},
                "write_source": {"sysfs": "/sys/devices/hwmon/hwmon*/pwm2", "max_duty_register": 255}
            }
        },
        "zones": {
            "zone_1": {
                "pwm_output": [0, "1"],
                "expr": {"type": "apply", "name": "linear_inlet",
                         "inner": {"type": "ident", "name": "mb:inlet_temp"}}
            }
        }
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config = FscConfig::from_json(BASIC).unwrap();
        assert_eq!(config.ramp_rate, 10.0);
        assert!(config.boost.fan_fail);
        assert_eq!(config.fans.len(), 2);
        assert_eq!(config.zones["zone_1"].pwm_output.fan_names(), vec!["0", "1"]);
        assert_eq!(
            config.fans["1"].write_source.as_ref().and_then(|w| w.target()),
            Some(SourceSpec::Sysfs("/sys/devices/hwmon/hwmon*/pwm2".to_string()))
        );
        assert_eq!(config.sensor_source, SourceSpec::Util(DEFAULT_SENSOR_UTIL.to_string()));
        assert!(config.effective_fail_sensor_type().is_some());
    }

    #[test]
    fn test_profile_configs() {
        let config = FscConfig::from_json(BASIC).unwrap();
        let profiles = config.profile_configs().unwrap();
        let pid = &profiles["pid_cpu"];
        assert!(matches!(pid.spec, ProfileSpec::Pid(_)));
        assert_eq!(pid.fru, "sys");
        assert_eq!(pid.sensor, "pid_cpu");
        assert!(profiles["linear_inlet"].read_source.is_none());
    }

    #[test]
    fn test_inline_tree_expression() {
        let config = FscConfig::from_json(BASIC).unwrap();
        let mut profiles = Profiles::new();
        for (name, p) in config.profile_configs().unwrap() {
            profiles.insert_spec(name, &p.spec);
        }
        let (mut tree, info) = config.zones["zone_1"]
            .build_expression(Path::new(DEFAULT_ZONE_DIR), &profiles)
            .unwrap();
        assert!(info.ext_vars.contains("mb:inlet_temp"));

        let mut ctx = EvalContext::new(3.0);
        ctx.set("mb:inlet_temp", Some(31.0));
        assert_eq!(tree.eval(&ctx), Value::Scalar(Some(40.0)));
    }

    #[test]
    fn test_expr_file_relative_to_zone_dir() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("zone1.fsc"),
            r#"{"type": "const", "value": 42}"#,
        )
        .unwrap();
        let zone = ZoneConfig {
            pwm_output: PwmOutput::One(FanRef::Index(0)),
            expr: None,
            expr_file: Some("zone1.fsc".to_string()),
        };
        let (mut tree, _) = zone.build_expression(tmp.path(), &Profiles::new()).unwrap();
        assert_eq!(tree.eval(&EvalContext::new(1.0)), Value::Scalar(Some(42.0)));

        let missing = ZoneConfig {
            expr_file: Some("absent.fsc".to_string()),
            ..zone
        };
        let err = missing.build_expression(tmp.path(), &Profiles::new()).unwrap_err();
        assert!(matches!(err, FscError::FileRead { .. }));
    }

    #[test]
    fn test_unknown_fan_rejected() {
        let data = BASIC.replace(r#""pwm_output": [0, "1"]"#, r#""pwm_output": [0, 7]"#);
        let err = FscConfig::from_json(&data).unwrap_err();
        assert!(err.to_string().contains("unknown fan '7'"));
    }

    #[test]
    fn test_out_of_range_boost_rejected() {
        let data = BASIC.replace(r#""pwm_boost_value": 100"#, r#""pwm_boost_value": 120"#);
        let err = FscConfig::from_json(&data).unwrap_err();
        assert!(matches!(err, FscError::InvalidConfig { .. }));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let data = BASIC.replace(r#""sample_interval_ms": 3000"#, r#""sample_interval_ms": 0"#);
        assert!(FscConfig::from_json(&data).is_err());
    }

    #[test]
    fn test_read_fail_threshold() {
        let zero = BASIC.replace(r#""min_rpm": 800,"#, r#""min_rpm": 800, "fan_read_fail_threshold": 0,"#);
        assert!(FscConfig::from_json(&zero).is_err());

        let three = BASIC.replace(r#""min_rpm": 800,"#, r#""min_rpm": 800, "fan_read_fail_threshold": 3,"#);
        assert_eq!(FscConfig::from_json(&three).unwrap().fan_read_fail_threshold, Some(3));
        assert_eq!(FscConfig::from_json(BASIC).unwrap().fan_read_fail_threshold, None);
    }

    #[test]
    fn test_bad_profile_type_rejected() {
        let data = BASIC.replace(r#""type": "pid""#, r#""type": "fuzzy""#);
        let err = FscConfig::from_json(&data).unwrap_err();
        assert!(err.to_string().contains("profiles.pid_cpu"));
    }

    #[test]
    fn test_sensor_policy_requires_boost_flag() {
        let data = BASIC.replace(
            r#""boost": {"fan_fail": true, "sensor_fail": true}"#,
            r#""boost": {"fan_fail": true}"#,
        );
        let config = FscConfig::from_json(&data).unwrap();
        assert!(config.effective_fail_sensor_type().is_none());
        assert!(config.effective_ssd_algorithm().is_none());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/fsc-config.json")).unwrap_err();
        assert!(matches!(err, FscError::FileRead { .. }));
    }
}

//! Sensor acquisition and snapshot assembly
//!
//! The machine knows which FRUs the zone expressions need, reads them
//! through the sensor utility source and parses the text into a
//! [`Snapshot`]. Path-based sensors (registered from profile sources) are
//! read directly and merged into the same snapshot.
//!
//! Utility output lines look like:
//!
//! ```text
//! MB_INLET_TEMP                (0x1) :   27.00 C     | (ok)
//! MB_SOC_TEMP                  (0x2) : NA | (na)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::{sensor, status};
use crate::expr::ExpressionInfo;
use crate::hw::{Fan, ReadScope, SensorSource, SourceKind};

/// One parsed sensor line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub id: u32,
    pub name: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub status: Option<String>,
}

impl SensorReading {
    pub fn status_is(&self, status: &str) -> bool {
        self.status.as_deref() == Some(status)
    }
}

/// Readings of one FRU keyed by symbolic sensor name
pub type FruReadings = HashMap<String, SensorReading>;

/// Readings of every FRU gathered in one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    frus: HashMap<String, FruReadings>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_fru(&mut self, fru: impl Into<String>, readings: FruReadings) {
        self.frus.entry(fru.into()).or_default().extend(readings);
    }

    pub fn insert(&mut self, fru: impl Into<String>, sensor: impl Into<String>, reading: SensorReading) {
        self.frus
            .entry(fru.into())
            .or_default()
            .insert(sensor.into(), reading);
    }

    pub fn get(&self, fru: &str, sensor: &str) -> Option<&SensorReading> {
        self.frus.get(fru)?.get(sensor)
    }

    pub fn fru(&self, fru: &str) -> Option<&FruReadings> {
        self.frus.get(fru)
    }

    pub fn len(&self) -> usize {
        self.frus.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sensor_line_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>.+?)\s*\((?P<id>0x[0-9a-fA-F]+)\)\s*:\s*(?P<value>[-+]?\d+(?:\.\d+)?)\s*(?P<unit>[^|\s]*)\s*\|\s*\((?P<status>[^)]*)\)",
        )
        .ok()
    })
    .as_ref()
}

fn sensor_na_line_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>.+?)\s*\((?P<id>0x[0-9a-fA-F]+)\)\s*:\s*(?:0/)?NA\s*\|\s*\((?P<status>[^)]*)\)",
        )
        .ok()
    })
    .as_ref()
}

fn fan_line_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Fan\s+(?P<num>\d+)\b.*?Speed:\s*(?P<rpm>\d+)").ok())
        .as_ref()
}

/// Key used for a sensor in expressions: lowercase, spaces as underscores
pub fn symbolic_name(display_name: &str) -> String {
    display_name.trim().to_lowercase().replace(' ', "_")
}

fn is_noise(line: &str) -> bool {
    sensor::NOISE_MARKERS.iter().any(|marker| line.contains(marker))
}

fn parse_id(hex: &str) -> u32 {
    u32::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap_or(0)
}

/// Parse one utility output line
pub fn parse_sensor_line(line: &str) -> Option<SensorReading> {
    if line.trim().is_empty() || is_noise(line) {
        return None;
    }
    if let Some(caps) = sensor_line_re()?.captures(line) {
        let unit = caps["unit"].trim();
        return Some(SensorReading {
            id: parse_id(&caps["id"]),
            name: caps["name"].trim().to_string(),
            value: caps["value"].parse().ok(),
            unit: (!unit.is_empty()).then(|| unit.to_string()),
            status: Some(caps["status"].trim().to_string()),
        });
    }
    let caps = sensor_na_line_re()?.captures(line)?;
    Some(SensorReading {
        id: parse_id(&caps["id"]),
        name: caps["name"].trim().to_string(),
        value: None,
        unit: None,
        status: Some(caps["status"].trim().to_string()),
    })
}

/// Parse a utility output blob into readings keyed by symbolic name
pub fn parse_sensor_output(blob: &str) -> FruReadings {
    blob.lines()
        .filter_map(parse_sensor_line)
        .map(|reading| (symbolic_name(&reading.name), reading))
        .collect()
}

/// Parse fan utility output into fan number -> RPM
pub fn parse_fan_output(blob: &str) -> BTreeMap<u32, u32> {
    let Some(re) = fan_line_re() else {
        return BTreeMap::new();
    };
    blob.lines()
        .filter_map(|line| re.captures(line.trim()))
        .filter_map(|caps| Some((caps["num"].parse().ok()?, caps["rpm"].parse().ok()?)))
        .collect()
}

/// Read every fan's tachometer; utility-backed fans share one invocation
pub fn read_fans<'a, I>(fans: I) -> BTreeMap<String, u32>
where
    I: IntoIterator<Item = &'a mut Fan>,
{
    let mut util_speeds: Option<BTreeMap<u32, u32>> = None;
    let mut speeds = BTreeMap::new();
    for fan in fans {
        let rpm = match fan.kind() {
            SourceKind::Util => {
                let table = util_speeds.get_or_insert_with(|| parse_fan_output(&fan.read_raw()));
                fan.number().and_then(|n| table.get(&n).copied())
            }
            SourceKind::Sysfs => fan.read_raw().trim().parse().ok(),
        };
        fan.record_reading(rpm.is_some());
        match rpm {
            Some(rpm) => {
                speeds.insert(fan.name().to_string(), rpm);
            }
            None => debug!(
                fan = %fan.name(),
                failures = fan.read_fail_counter(),
                "No tachometer reading"
            ),
        }
    }
    speeds
}

#[derive(Debug)]
struct PathSensor {
    fru: String,
    name: String,
    source: Box<dyn SensorSource>,
}

/// Sensor acquisition for all zones
#[derive(Debug)]
pub struct Machine {
    source: Box<dyn SensorSource>,
    frus: BTreeSet<String>,
    numbers: HashMap<String, Vec<String>>,
    path_sensors: Vec<PathSensor>,
}

impl Machine {
    pub fn new(source: Box<dyn SensorSource>) -> Self {
        Self {
            source,
            frus: BTreeSet::new(),
            numbers: HashMap::new(),
            path_sensors: Vec::new(),
        }
    }

    /// Register the FRUs and explicit sensor numbers an expression reads
    pub fn register_expression(&mut self, info: &ExpressionInfo) {
        for fru in info.frus() {
            self.frus.insert(fru.to_string());
            let numbers = info.numbers_for_fru(fru);
            if !numbers.is_empty() {
                let entry = self.numbers.entry(fru.to_string()).or_default();
                for num in numbers {
                    if !entry.contains(&num) {
                        entry.push(num);
                    }
                }
            }
        }
    }

    /// Register a sensor read directly from a file path (millidegrees)
    pub fn add_path_sensor(
        &mut self,
        fru: impl Into<String>,
        name: impl Into<String>,
        source: Box<dyn SensorSource>,
    ) {
        self.path_sensors.push(PathSensor {
            fru: fru.into(),
            name: name.into(),
            source,
        });
    }

    pub fn frus(&self) -> impl Iterator<Item = &str> {
        self.frus.iter().map(String::as_str)
    }

    fn is_path_only(&self, fru: &str) -> bool {
        self.path_sensors.iter().any(|p| p.fru == fru) && !self.numbers.contains_key(fru)
    }

    /// Read all registered FRUs into a snapshot
    ///
    /// With `filter`, each FRU is read for only the sensors that expression
    /// needs and FRUs it does not reference are skipped.
    pub fn read_sensors(&mut self, filter: Option<&ExpressionInfo>) -> Snapshot {
        let mut snapshot = Snapshot::new();
        let frus: Vec<String> = self
            .frus
            .iter()
            .filter(|fru| !self.is_path_only(fru))
            .cloned()
            .collect();

        for fru in &frus {
            let names;
            let scope = match (self.numbers.get(fru.as_str()), filter) {
                (Some(numbers), _) if !numbers.is_empty() => ReadScope::Numbers { fru, numbers },
                (_, Some(info)) => {
                    names = info.sensors_for_fru(fru);
                    if names.is_empty() {
                        continue;
                    }
                    ReadScope::Filtered { fru, sensors: &names }
                }
                _ => ReadScope::Fru(fru),
            };
            let blob = self.source.read(&scope);
            let readings = parse_sensor_output(&blob);
            if readings.is_empty() {
                warn!(fru = %fru, source = %self.source.name(), "No sensor readings for FRU");
            }
            snapshot.insert_fru(fru.as_str(), readings);
        }

        for path_sensor in &mut self.path_sensors {
            let text = path_sensor.source.read(&ReadScope::All);
            let Ok(milli) = text.trim().parse::<f64>() else {
                debug!(sensor = %path_sensor.name, "Path sensor has no reading");
                continue;
            };
            let reading = SensorReading {
                id: 0,
                name: path_sensor.name.clone(),
                value: Some(milli / sensor::MILLIDEGREES_PER_DEGREE),
                unit: Some("C".to_string()),
                status: Some(status::OK.to_string()),
            };
            snapshot.insert(path_sensor.fru.as_str(), symbolic_name(&path_sensor.name), reading);
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{MockCommandRunner, SysfsSource, UtilSource};
    use std::fs;
    use tempfile::TempDir;

    const MB_OUTPUT: &str = "\
MB_INLET_TEMP                (0x1) :   27.00 C     | (ok)
MB_SOC_TEMP                  (0x2) :   81.50 C     | (ucr)
MB_P12V                      (0x3) :   12.10 Volts | (ok)
SSD0 Temp                    (0x4) : NA | (na)
bic_get_sdr failed, SDR is missing!
";

    #[test]
    fn test_parse_sensor_line() {
        let reading = parse_sensor_line("MB_INLET_TEMP                (0x1) :   27.00 C     | (ok)").unwrap();
        assert_eq!(reading.id, 1);
        assert_eq!(reading.name, "MB_INLET_TEMP");
        assert_eq!(reading.value, Some(27.0));
        assert_eq!(reading.unit.as_deref(), Some("C"));
        assert!(reading.status_is("ok"));
    }

    #[test]
    fn test_parse_na_line() {
        let reading = parse_sensor_line("SSD0 Temp                    (0x4) : NA | (na)").unwrap();
        assert_eq!(reading.value, None);
        assert!(reading.status_is("na"));
    }

    #[test]
    fn test_parse_output_skips_noise() {
        let readings = parse_sensor_output(MB_OUTPUT);
        assert_eq!(readings.len(), 4);
        assert_eq!(readings["mb_soc_temp"].value, Some(81.5));
        assert!(readings["mb_soc_temp"].status_is("ucr"));
        assert!(readings.contains_key("ssd0_temp"));
    }

    #[test]
    fn test_parse_fan_output() {
        let speeds = parse_fan_output("Fan 0 Speed: 4800 RPM (45%)\nFan 1 Speed: 0 RPM (45%)\nFan Mode: Normal\n");
        assert_eq!(speeds.get(&0), Some(&4800));
        assert_eq!(speeds.get(&1), Some(&0));
        assert_eq!(speeds.len(), 2);
    }

    fn info(vars: &[&str]) -> ExpressionInfo {
        ExpressionInfo {
            ext_vars: vars.iter().map(|s| s.to_string()).collect(),
            profiles: BTreeSet::new(),
        }
    }

    #[test]
    fn test_read_sensors_per_fru() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.trim() == "sensor-util mb")
            .times(1)
            .returning(|_| Ok(MB_OUTPUT.to_string()));
        let source = UtilSource::new("sensor-util", "sensor-util").with_runner(Box::new(runner));

        let mut machine = Machine::new(Box::new(source));
        machine.register_expression(&info(&["mb:mb_inlet_temp", "mb:mb_soc_temp"]));
        let snapshot = machine.read_sensors(None);
        assert_eq!(snapshot.get("mb", "mb_inlet_temp").and_then(|r| r.value), Some(27.0));
        assert!(snapshot.get("nic", "temp").is_none());
    }

    #[test]
    fn test_read_sensors_filtered() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.trim() == "sensor-util mb --filter mb_inlet_temp")
            .times(1)
            .returning(|_| Ok("MB_INLET_TEMP (0x1) : 30.00 C | (ok)\n".to_string()));
        let source = UtilSource::new("sensor-util", "sensor-util").with_runner(Box::new(runner));

        let mut machine = Machine::new(Box::new(source));
        let zone_info = info(&["mb:mb_inlet_temp"]);
        machine.register_expression(&zone_info);
        machine.register_expression(&info(&["nic:nic_temp"]));
        // The nic FRU is not referenced by this zone and is skipped
        let snapshot = machine.read_sensors(Some(&zone_info));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_read_sensors_by_number() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.trim() == "sensor-util nic 0x10")
            .times(1)
            .returning(|_| Ok("NIC_TEMP (0x10) : 55.00 C | (ok)\n".to_string()));
        let source = UtilSource::new("sensor-util", "sensor-util").with_runner(Box::new(runner));

        let mut machine = Machine::new(Box::new(source));
        machine.register_expression(&info(&["nic:nic_temp:0x10"]));
        let snapshot = machine.read_sensors(None);
        assert_eq!(snapshot.get("nic", "nic_temp").map(|r| r.id), Some(0x10));
    }

    #[test]
    fn test_path_sensor_millidegrees() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("temp1_input");
        fs::write(&path, "45500\n").unwrap();

        let runner = MockCommandRunner::new();
        let source = UtilSource::new("sensor-util", "sensor-util").with_runner(Box::new(runner));
        let mut machine = Machine::new(Box::new(source));
        machine.register_expression(&info(&["sys:cpu_temp"]));
        machine.add_path_sensor(
            "sys",
            "cpu_temp",
            Box::new(SysfsSource::new("cpu_temp", path.display().to_string())),
        );
        let snapshot = machine.read_sensors(None);
        assert_eq!(snapshot.get("sys", "cpu_temp").and_then(|r| r.value), Some(45.5));

        fs::write(&path, "").unwrap();
        let snapshot = machine.read_sensors(None);
        assert!(snapshot.get("sys", "cpu_temp").is_none());
    }

    #[test]
    fn test_read_fans_sysfs() {
        let tmp = TempDir::new().unwrap();
        let tach = tmp.path().join("fan1_input");
        fs::write(&tach, "5200\n").unwrap();
        let mut fans = vec![
            Fan::new("0", None, Box::new(SysfsSource::new("0", tach.display().to_string()))),
            Fan::new("1", None, Box::new(SysfsSource::new("1", "/nonexistent/fan2_input"))),
        ];
        let speeds = read_fans(fans.iter_mut());
        assert_eq!(speeds.get("0"), Some(&5200));
        assert!(!speeds.contains_key("1"));
        assert_eq!(fans[0].read_fail_counter(), 0);
        assert_eq!(fans[1].read_fail_counter(), 1);
    }

    #[test]
    fn test_read_fans_util_missing_fan_counts_failure() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(2)
            .returning(|_| Ok("Fan 0 Speed: 4000 RPM\n".to_string()));
        let shared = UtilSource::new("0", "fan-util --get").with_runner(Box::new(runner));
        let idle = UtilSource::new("1", "fan-util --get").with_runner(Box::new(MockCommandRunner::new()));
        let mut fans = vec![
            Fan::new("0", None, Box::new(shared)),
            Fan::new("1", None, Box::new(idle)),
        ];
        read_fans(fans.iter_mut());
        let speeds = read_fans(fans.iter_mut());
        assert_eq!(speeds.get("0"), Some(&4000));
        assert_eq!(fans[0].read_fail_counter(), 0);
        assert_eq!(fans[1].read_fail_counter(), 2);
    }

    #[test]
    fn test_read_fans_util_single_invocation() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Ok("Fan 0 Speed: 4000 RPM\nFan 1 Speed: 3900 RPM\n".to_string()));
        let shared = UtilSource::new("0", "fan-util --get").with_runner(Box::new(runner));
        let idle = UtilSource::new("1", "fan-util --get").with_runner(Box::new(MockCommandRunner::new()));
        let mut fans = vec![
            Fan::new("0", None, Box::new(shared)),
            Fan::new("1", None, Box::new(idle)),
        ];
        let speeds = read_fans(fans.iter_mut());
        assert_eq!(speeds.get("0"), Some(&4000));
        assert_eq!(speeds.get("1"), Some(&3900));
    }
}

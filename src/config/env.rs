use super::CollectorConfig;
use std::path::PathBuf;
use tracing::warn;

/// Overlay `TELEMETRY_*` variables onto a loaded config.
///
/// Unparseable values are ignored with a warning; the file value wins.
pub(super) fn apply<F>(mut cfg: CollectorConfig, lookup: F) -> CollectorConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("TELEMETRY_OUTPUT_DIR") {
        cfg.output.directory = PathBuf::from(v);
    }
    if let Some(v) = lookup("TELEMETRY_ATTRIBUTE_KEY") {
        // Empty string disables the attribute query
        cfg.collector.attribute_key = if v.is_empty() { None } else { Some(v) };
    }
    if let Some(v) = lookup("TELEMETRY_REFERENCE_X") {
        match v.parse::<f64>() {
            Ok(x) => cfg.collector.reference_point.x = x,
            Err(_) => warn!(value = %v, "Ignoring invalid TELEMETRY_REFERENCE_X"),
        }
    }
    if let Some(v) = lookup("TELEMETRY_REFERENCE_Y") {
        match v.parse::<f64>() {
            Ok(y) => cfg.collector.reference_point.y = y,
            Err(_) => warn!(value = %v, "Ignoring invalid TELEMETRY_REFERENCE_Y"),
        }
    }
    if let Some(v) = lookup("TELEMETRY_SCENARIO") {
        cfg.simulation.scenario = Some(PathBuf::from(v));
    }

    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let cfg = apply(CollectorConfig::default(), lookup_from(&[]));
        assert_eq!(cfg.output.directory, PathBuf::from("."));
        assert_eq!(cfg.collector.reference_point.x, 0.0);
    }

    #[test]
    fn test_overrides_applied() {
        let cfg = apply(
            CollectorConfig::default(),
            lookup_from(&[
                ("TELEMETRY_OUTPUT_DIR", "/data/runs"),
                ("TELEMETRY_REFERENCE_X", "10.5"),
                ("TELEMETRY_REFERENCE_Y", "-2"),
                ("TELEMETRY_SCENARIO", "meeting.json.gz"),
            ]),
        );
        assert_eq!(cfg.output.directory, PathBuf::from("/data/runs"));
        assert_eq!(cfg.collector.reference_point.x, 10.5);
        assert_eq!(cfg.collector.reference_point.y, -2.0);
        assert_eq!(cfg.simulation.scenario, Some(PathBuf::from("meeting.json.gz")));
    }

    #[test]
    fn test_invalid_number_ignored() {
        let cfg = apply(
            CollectorConfig::default(),
            lookup_from(&[("TELEMETRY_REFERENCE_X", "east")]),
        );
        assert_eq!(cfg.collector.reference_point.x, 0.0);
    }

    #[test]
    fn test_empty_attribute_key_disables_query() {
        let cfg = apply(
            CollectorConfig::default(),
            lookup_from(&[("TELEMETRY_ATTRIBUTE_KEY", "")]),
        );
        assert!(cfg.collector.attribute_key.is_none());
    }
}

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("invalid run name pattern {0}: {1}")]
    Pattern(String, regex::Error),
}

/// Distance thresholds of the external cross-match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossMatchConfig {
    /// Half width of the ra/dec search box, degrees.
    pub search_threshold: f64,
    /// Automatic decision: angular separation (arcsec) and frequency difference (MHz).
    pub thresh_spat_auto: f64,
    pub thresh_spec_auto: f64,
    /// Manual conflict: angular separation (arcsec) and frequency difference (MHz).
    pub thresh_spat: f64,
    pub thresh_spec: f64,
}

impl Default for CrossMatchConfig {
    fn default() -> Self {
        Self {
            search_threshold: 0.1,
            thresh_spat_auto: 5.0,
            thresh_spec_auto: 0.05,
            thresh_spat: 90.0,
            thresh_spec: 2.0,
        }
    }
}

impl CrossMatchConfig {
    /// Both separation thresholds must fit inside the search box, otherwise candidates beyond
    /// the box are never compared.
    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("CROSSMATCH_SEARCH_THRESHOLD", self.search_threshold),
            ("CROSSMATCH_THRESH_SPAT_AUTO", self.thresh_spat_auto),
            ("CROSSMATCH_THRESH_SPEC_AUTO", self.thresh_spec_auto),
            ("CROSSMATCH_THRESH_SPAT", self.thresh_spat),
            ("CROSSMATCH_THRESH_SPEC", self.thresh_spec),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                });
            }
        }
        for (key, arcsec) in [
            ("CROSSMATCH_THRESH_SPAT_AUTO", self.thresh_spat_auto),
            ("CROSSMATCH_THRESH_SPAT", self.thresh_spat),
        ] {
            if arcsec / 3600.0 > self.search_threshold {
                return Err(ConfigError::Invalid {
                    key,
                    value: format!(
                        "{}\" exceeds the {}° search box",
                        arcsec, self.search_threshold
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Selection of the manual-inspection queue: detections not yet accepted that are large and
/// reliable enough to be worth a look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionConfig {
    pub min_n_pix: i32,
    pub min_rel: f64,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            min_n_pix: 300,
            min_rel: 0.7,
        }
    }
}

/// How working names become public release names.
#[derive(Debug, Clone, PartialEq)]
pub struct NamingConfig {
    pub project: String,
    pub pipeline_prefix: String,
    pub truncate_precision: bool,
}

impl NamingConfig {
    /// WALLABY drops sub-integer precision, DINGO and other projects keep it.
    pub fn for_project(project: &str) -> Self {
        Self {
            project: project.to_string(),
            pipeline_prefix: "SoFiA".to_string(),
            truncate_precision: project == "WALLABY",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub operator: String,
    pub task_workers: usize,
    pub release_tag: String,
    pub naming: NamingConfig,
    pub crossmatch: CrossMatchConfig,
    pub inspection: InspectionConfig,
    /// (run name regex, survey component) used when a run has no component membership.
    pub run_name_components: Vec<(String, String)>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://survey.db?mode=rwc".to_string(),
            operator: "operator".to_string(),
            task_workers: 2,
            release_tag: "Released".to_string(),
            naming: NamingConfig::for_project("WALLABY"),
            crossmatch: CrossMatchConfig::default(),
            inspection: InspectionConfig::default(),
            run_name_components: vec![
                (r"^SB.*_gc$".to_string(), "Quality-Check".to_string()),
                (r"^SER.*$".to_string(), "WALLABY v1".to_string()),
            ],
        }
    }
}

impl AppConfig {
    /// Reads the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            cfg.database_url = url;
        }
        if let Some(op) = lookup("OPERATOR") {
            cfg.operator = op;
        }
        if let Some(project) = lookup("SURVEY_PROJECT") {
            cfg.naming = NamingConfig::for_project(project.trim());
        }
        if let Some(v) = lookup("RELEASE_TRUNCATE") {
            cfg.naming.truncate_precision = parse_flag("RELEASE_TRUNCATE", &v)?;
        }
        if let Some(tag) = lookup("RELEASE_TAG") {
            cfg.release_tag = tag;
        }
        if let Some(v) = lookup("TASK_WORKERS") {
            cfg.task_workers = parse_num::<usize>("TASK_WORKERS", &v)?.max(1);
        }

        let cm = &mut cfg.crossmatch;
        for (key, slot) in [
            ("CROSSMATCH_SEARCH_THRESHOLD", &mut cm.search_threshold),
            ("CROSSMATCH_THRESH_SPAT_AUTO", &mut cm.thresh_spat_auto),
            ("CROSSMATCH_THRESH_SPEC_AUTO", &mut cm.thresh_spec_auto),
            ("CROSSMATCH_THRESH_SPAT", &mut cm.thresh_spat),
            ("CROSSMATCH_THRESH_SPEC", &mut cm.thresh_spec),
        ] {
            if let Some(v) = lookup(key) {
                *slot = parse_num::<f64>(key, &v)?;
            }
        }
        cm.validate()?;

        if let Some(v) = lookup("INSPECT_MIN_NPIX") {
            cfg.inspection.min_n_pix = parse_num::<i32>("INSPECT_MIN_NPIX", &v)?;
        }
        if let Some(v) = lookup("INSPECT_MIN_REL") {
            cfg.inspection.min_rel = parse_num::<f64>("INSPECT_MIN_REL", &v)?;
        }

        // RUN_NAME_COMPONENTS="^SB.*_gc$=Quality-Check;^SER.*$=WALLABY v1"
        if let Some(v) = lookup("RUN_NAME_COMPONENTS") {
            let mut pairs = Vec::new();
            for item in v.split(';').filter(|s| !s.trim().is_empty()) {
                let (pattern, component) =
                    item.split_once('=').ok_or_else(|| ConfigError::Invalid {
                        key: "RUN_NAME_COMPONENTS",
                        value: item.to_string(),
                    })?;
                regex::Regex::new(pattern.trim())
                    .map_err(|e| ConfigError::Pattern(pattern.to_string(), e))?;
                pairs.push((pattern.trim().to_string(), component.trim().to_string()));
            }
            cfg.run_name_components = pairs;
        }

        Ok(cfg)
    }
}

fn parse_num<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_survey_thresholds() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.crossmatch.thresh_spat_auto, 5.0);
        assert_eq!(cfg.crossmatch.thresh_spec_auto, 0.05);
        assert_eq!(cfg.crossmatch.thresh_spat, 90.0);
        assert_eq!(cfg.crossmatch.thresh_spec, 2.0);
        assert_eq!(cfg.naming.project, "WALLABY");
        assert!(cfg.naming.truncate_precision);
    }

    #[test]
    fn project_and_threshold_overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("SURVEY_PROJECT", "DINGO"),
            ("CROSSMATCH_THRESH_SPAT", "30"),
            ("TASK_WORKERS", "0"),
            ("RUN_NAME_COMPONENTS", "^DR1.*$=Deep;^X$=Other"),
        ]))
        .unwrap();
        assert_eq!(cfg.naming.project, "DINGO");
        assert!(!cfg.naming.truncate_precision);
        assert_eq!(cfg.crossmatch.thresh_spat, 30.0);
        assert_eq!(cfg.task_workers, 1);
        assert_eq!(cfg.run_name_components.len(), 2);
        assert_eq!(cfg.run_name_components[0].1, "Deep");
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(AppConfig::from_lookup(lookup(&[("CROSSMATCH_THRESH_SPEC", "abc")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("RELEASE_TRUNCATE", "maybe")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("RUN_NAME_COMPONENTS", "nope")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("INSPECT_MIN_REL", "high")])).is_err());
    }

    #[test]
    fn separation_thresholds_must_fit_the_search_box() {
        // 0.1° box is 360 arcsec
        let err = AppConfig::from_lookup(lookup(&[("CROSSMATCH_THRESH_SPAT", "400")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CROSSMATCH_THRESH_SPAT", .. }));

        let err = AppConfig::from_lookup(lookup(&[
            ("CROSSMATCH_SEARCH_THRESHOLD", "0.001"),
            ("CROSSMATCH_THRESH_SPAT", "3"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CROSSMATCH_THRESH_SPAT_AUTO", .. }));

        let err = AppConfig::from_lookup(lookup(&[("CROSSMATCH_THRESH_SPEC", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CROSSMATCH_THRESH_SPEC", .. }));

        let cfg = AppConfig::from_lookup(lookup(&[
            ("CROSSMATCH_SEARCH_THRESHOLD", "0.2"),
            ("CROSSMATCH_THRESH_SPAT", "400"),
        ]))
        .unwrap();
        assert_eq!(cfg.crossmatch.thresh_spat, 400.0);
    }

    #[test]
    fn inspection_thresholds() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.inspection, InspectionConfig { min_n_pix: 300, min_rel: 0.7 });
        let cfg = AppConfig::from_lookup(lookup(&[
            ("INSPECT_MIN_NPIX", "50"),
            ("INSPECT_MIN_REL", "0.5"),
        ]))
        .unwrap();
        assert_eq!(cfg.inspection.min_n_pix, 50);
        assert_eq!(cfg.inspection.min_rel, 0.5);
    }
}

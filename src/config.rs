// Handles configuration loading, saving, and defaults.
//
// The config file carries user preferences (start-of-day, working hours,
// holidays, February 29th policy, archive retention) plus the companion
// records for each calendar resource: display name, enabled alarm types,
// standard-for-type flags, colour, read-only and keep-format flags.

use anyhow::Result;
use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use crate::context::AppContext;
use crate::model::datetime::AlarmDateTime;
use crate::model::recurrence::Feb29Policy;
use crate::resource::{ResourceId, StorageKind, TypeMask};
use crate::storage;

fn default_start_of_day() -> String {
    "00:00".to_string()
}

fn default_work_start() -> String {
    "09:00".to_string()
}

fn default_work_end() -> String {
    "17:00".to_string()
}

fn default_work_days() -> [bool; 7] {
    [true, true, true, true, true, false, false]
}

fn default_keep_days() -> i32 {
    -1
} // keep archived alarms indefinitely

fn default_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig {
            id: 1,
            name: "Default".to_string(),
            config_name: "default".to_string(),
            kind: StorageKind::File,
            path: "calendar.ics".to_string(),
            alarm_types: TypeMask::active(),
            standard_types: TypeMask::active(),
            read_only: false,
            keep_format: false,
            colour: None,
        },
        ResourceConfig {
            id: 2,
            name: "Archive".to_string(),
            config_name: "archive".to_string(),
            kind: StorageKind::File,
            path: "archive.ics".to_string(),
            alarm_types: TypeMask::archived(),
            standard_types: TypeMask::archived(),
            read_only: false,
            keep_format: false,
            colour: Some("#808080".to_string()),
        },
    ]
}

/// Companion record for one calendar resource: everything about the
/// resource that lives in the config file rather than the calendar itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub config_name: String,
    #[serde(default)]
    pub kind: StorageKind,
    /// Absolute path, or a file name resolved under the resources directory.
    pub path: String,
    #[serde(default)]
    pub alarm_types: TypeMask,
    #[serde(default)]
    pub standard_types: TypeMask,
    #[serde(default)]
    pub read_only: bool,
    /// Keep the existing file format instead of upgrading on save.
    #[serde(default)]
    pub keep_format: bool,
    #[serde(default)]
    pub colour: Option<String>,
}

impl ResourceConfig {
    pub fn resolve_path(&self, ctx: &dyn AppContext) -> Result<PathBuf> {
        let p = PathBuf::from(&self.path);
        if p.is_absolute() {
            Ok(p)
        } else {
            Ok(ctx.get_resources_dir()?.join(p))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Time of day at which date-only alarms trigger, "HH:MM".
    #[serde(default = "default_start_of_day")]
    pub start_of_day: String,

    /// Default policy for new February 29th yearly recurrences.
    #[serde(default)]
    pub feb29_policy: Feb29Policy,

    // Working hours, used by work-time-only alarms.
    #[serde(default = "default_work_days")]
    pub work_days: [bool; 7],
    #[serde(default = "default_work_start")]
    pub work_start: String,
    #[serde(default = "default_work_end")]
    pub work_end: String,

    /// Dates on which holiday-excluded alarms stay silent.
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,

    /// How long archived alarms are kept: -1 forever, 0 do not archive,
    /// n > 0 purge after n days.
    #[serde(default = "default_keep_days")]
    pub archived_keep_days: i32,

    /// Late-cancel minutes applied to new alarms when unspecified.
    #[serde(default)]
    pub default_late_cancel: u32,

    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            start_of_day: default_start_of_day(),
            feb29_policy: Feb29Policy::default(),
            work_days: default_work_days(),
            work_start: default_work_start(),
            work_end: default_work_end(),
            holidays: Vec::new(),
            archived_keep_days: default_keep_days(),
            default_late_cancel: 0,
            resources: default_resources(),
        }
    }
}

fn parse_time(s: &str, fallback: NaiveTime) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap_or(fallback)
}

impl Config {
    pub fn load(ctx: &dyn AppContext) -> Result<Config> {
        let path = ctx.get_config_file_path()?;
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, ctx: &dyn AppContext) -> Result<()> {
        let path = ctx.get_config_file_path()?;
        let content = toml::to_string_pretty(self)?;
        storage::atomic_write(&path, content)?;
        Ok(())
    }

    pub fn start_of_day_time(&self) -> NaiveTime {
        parse_time(&self.start_of_day, NaiveTime::MIN)
    }

    pub fn work_schedule(&self) -> WorkSchedule {
        WorkSchedule {
            days: self.work_days,
            start: parse_time(&self.work_start, NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            end: parse_time(&self.work_end, NaiveTime::from_hms_opt(17, 0, 0).unwrap()),
            holidays: self.holidays.iter().copied().collect(),
        }
    }
}

/// Working-hours and holiday context consumed by trigger computation.
#[derive(Debug, Clone)]
pub struct WorkSchedule {
    /// Working days, Monday first.
    pub days: [bool; 7],
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub holidays: BTreeSet<NaiveDate>,
}

impl WorkSchedule {
    pub fn is_working_day(&self, d: NaiveDate) -> bool {
        self.days[d.weekday().num_days_from_monday() as usize]
    }

    /// Whether a trigger instant falls within working hours. Date-only
    /// triggers qualify on any working day.
    pub fn is_working_time(&self, t: &AlarmDateTime) -> bool {
        if !self.is_working_day(t.date()) {
            return false;
        }
        match t {
            AlarmDateTime::DateOnly(_) => true,
            AlarmDateTime::Timed(dt) => {
                let local = dt.with_timezone(&chrono::Local).time();
                local >= self.start && local < self.end
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;

    #[test]
    fn roundtrip_preserves_resources() {
        let ctx = TestContext::new();
        let mut cfg = Config::default();
        cfg.archived_keep_days = 30;
        cfg.save(&ctx).unwrap();
        let loaded = Config::load(&ctx).unwrap();
        assert_eq!(loaded.archived_keep_days, 30);
        assert_eq!(loaded.resources.len(), 2);
        assert!(loaded.resources[0].standard_types.active);
    }

    #[test]
    fn work_schedule_rejects_weekends_by_default() {
        let cfg = Config::default();
        let ws = cfg.work_schedule();
        // 2025-06-01 is a Sunday.
        assert!(!ws.is_working_day(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()));
        assert!(ws.is_working_day(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()));
    }
}

// One calendar backend: a file (or directory of files) holding events,
// together with its user-facing settings. Mutating operations check
// writability; the registry in `resources.rs` owns the instances and turns
// successful operations into change signals.

use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ResourceConfig;
use crate::error::{AlarmError, AlarmResult};
use crate::model::adapter::{FormatCompat, IcsAdapter};
use crate::model::event::{Event, EventCategory};
use crate::storage;

pub type ResourceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageKind {
    #[default]
    File,
    Directory,
    None,
}

/// Which alarm categories a resource holds or is standard for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeMask {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub template: bool,
}

impl TypeMask {
    pub fn active() -> TypeMask {
        TypeMask {
            active: true,
            ..TypeMask::default()
        }
    }

    pub fn archived() -> TypeMask {
        TypeMask {
            archived: true,
            ..TypeMask::default()
        }
    }

    pub fn template() -> TypeMask {
        TypeMask {
            template: true,
            ..TypeMask::default()
        }
    }

    pub fn contains(&self, cat: EventCategory) -> bool {
        match cat {
            EventCategory::Active => self.active,
            EventCategory::Archived => self.archived,
            EventCategory::Template => self.template,
            EventCategory::Displaying => false,
        }
    }

    pub fn set(&mut self, cat: EventCategory, on: bool) {
        match cat {
            EventCategory::Active => self.active = on,
            EventCategory::Archived => self.archived = on,
            EventCategory::Template => self.template = on,
            EventCategory::Displaying => {}
        }
    }

    pub fn any(&self) -> bool {
        self.active || self.archived || self.template
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    New,
    Loading,
    Populated,
    Failed,
    Deleted,
}

/// Severity of a user-facing resource message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug)]
pub struct Resource {
    config: ResourceConfig,
    path: PathBuf,
    state: ResourceState,
    compat: FormatCompat,
    events: HashMap<String, Event>,
}

impl Resource {
    pub fn new(config: ResourceConfig, path: PathBuf) -> Resource {
        Resource {
            config,
            path,
            state: ResourceState::New,
            compat: FormatCompat::Unknown,
            events: HashMap::new(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config_name(&self) -> &str {
        &self.config.config_name
    }

    pub fn kind(&self) -> StorageKind {
        self.config.kind
    }

    pub fn location(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn compatibility(&self) -> FormatCompat {
        self.compat
    }

    pub fn alarm_types(&self) -> TypeMask {
        self.config.alarm_types
    }

    pub fn standard_types(&self) -> TypeMask {
        self.config.standard_types
    }

    pub fn read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn keep_format(&self) -> bool {
        self.config.keep_format
    }

    pub fn background_colour(&self) -> Option<&str> {
        self.config.colour.as_deref()
    }

    pub fn set_background_colour(&mut self, colour: Option<String>) {
        self.config.colour = colour;
    }

    pub fn set_read_only(&mut self, ro: bool) {
        self.config.read_only = ro;
    }

    pub fn is_enabled(&self, cat: EventCategory) -> bool {
        self.state != ResourceState::Deleted && self.config.alarm_types.contains(cat)
    }

    /// Writable for a category: enabled, not read-only, current format.
    pub fn is_writable(&self, cat: EventCategory) -> bool {
        self.is_enabled(cat) && !self.config.read_only && self.compat.is_writable()
    }

    /// Enables or disables one alarm category. Disabling a category also
    /// clears its standard flag.
    pub fn set_enabled(&mut self, cat: EventCategory, enabled: bool) {
        self.config.alarm_types.set(cat, enabled);
        if !enabled {
            self.config.standard_types.set(cat, false);
        }
    }

    pub fn set_enabled_types(&mut self, mask: TypeMask) {
        for cat in [
            EventCategory::Active,
            EventCategory::Archived,
            EventCategory::Template,
        ] {
            self.set_enabled(cat, mask.contains(cat));
        }
    }

    /// Directly sets the standard flags. Cross-resource uniqueness is the
    /// registry's concern.
    pub(crate) fn set_standard_types(&mut self, mask: TypeMask) {
        self.config.standard_types = mask;
    }

    pub(crate) fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn mark_deleted(&mut self) {
        self.state = ResourceState::Deleted;
        self.events.clear();
    }

    // --- Queries ---

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn event(&self, uid: &str) -> Option<&Event> {
        self.events.get(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.events.contains_key(uid)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    // --- Load / save ---

    /// Reads the backing store and replaces the in-memory event set.
    /// Does nothing when no alarm type is enabled or a populated resource
    /// is asked to load without `force`.
    pub fn load(&mut self, force: bool) -> AlarmResult<Vec<Event>> {
        if !self.config.alarm_types.any() {
            debug!("Resource {} disabled, not loading", self.config.name);
            return Ok(Vec::new());
        }
        if self.state == ResourceState::Populated && !force {
            return Ok(self.events.values().cloned().collect());
        }
        self.state = ResourceState::Loading;
        match self.load_inner() {
            Ok(events) => {
                self.events = events
                    .into_iter()
                    .map(|mut e| {
                        e.resource_id = Some(self.config.id);
                        (e.uid.clone(), e)
                    })
                    .collect();
                self.state = ResourceState::Populated;
                info!(
                    "Loaded {} events from resource '{}'",
                    self.events.len(),
                    self.config.name
                );
                Ok(self.events.values().cloned().collect())
            }
            Err(e) => {
                self.state = ResourceState::Failed;
                Err(AlarmError::LoadFailed {
                    path: self.path.display().to_string(),
                    detail: e.to_string(),
                })
            }
        }
    }

    fn load_inner(&mut self) -> Result<Vec<Event>> {
        match self.config.kind {
            StorageKind::None => {
                self.compat = FormatCompat::Current;
                Ok(Vec::new())
            }
            StorageKind::File => {
                let content = storage::read_calendar(&self.path)?;
                if content.trim().is_empty() {
                    self.compat = FormatCompat::Current;
                    return Ok(Vec::new());
                }
                let (events, compat) = IcsAdapter::calendar_from_ics(&content)?;
                self.compat = compat;
                if compat == FormatCompat::Incompatible {
                    anyhow::bail!("calendar format is newer than this version understands");
                }
                Ok(events)
            }
            StorageKind::Directory => {
                let mut all = Vec::new();
                let mut compat = FormatCompat::Current;
                if self.path.exists() {
                    for entry in fs::read_dir(&self.path)? {
                        let entry = entry?;
                        let p = entry.path();
                        if p.extension().map(|e| e == "ics").unwrap_or(false) {
                            let content = storage::read_calendar(&p)?;
                            if content.trim().is_empty() {
                                continue;
                            }
                            let (events, c) = IcsAdapter::calendar_from_ics(&content)?;
                            if c == FormatCompat::Incompatible {
                                anyhow::bail!(
                                    "calendar file {} uses an incompatible format",
                                    p.display()
                                );
                            }
                            if c == FormatCompat::Convertible {
                                compat = FormatCompat::Convertible;
                            }
                            all.extend(events);
                        }
                    }
                }
                self.compat = compat;
                Ok(all)
            }
        }
    }

    /// Writes the event set back to the backing store.
    pub fn save(&mut self) -> AlarmResult<()> {
        if !self.config.alarm_types.any() {
            return Ok(());
        }
        if self.config.read_only {
            return Err(AlarmError::SaveFailed {
                path: self.path.display().to_string(),
                detail: "resource is read-only".into(),
            });
        }
        self.save_inner().map_err(|e| AlarmError::SaveFailed {
            path: self.path.display().to_string(),
            detail: e.to_string(),
        })
    }

    fn save_inner(&mut self) -> Result<()> {
        match self.config.kind {
            StorageKind::None => Ok(()),
            StorageKind::File => {
                let refs: Vec<&Event> = self.events.values().collect();
                let content = IcsAdapter::calendar_to_ics(&refs);
                storage::write_calendar(&self.path, &content)?;
                Ok(())
            }
            StorageKind::Directory => {
                fs::create_dir_all(&self.path)?;
                for event in self.events.values() {
                    let file = self.path.join(format!("{}.ics", sanitise_uid(&event.uid)));
                    storage::write_calendar(&file, &IcsAdapter::to_ics(event))?;
                }
                Ok(())
            }
        }
    }

    /// Rewrites an older-format calendar in the current format, making the
    /// resource writable again.
    pub fn update_to_current(&mut self) -> AlarmResult<()> {
        match self.compat {
            FormatCompat::Current | FormatCompat::Converted => Ok(()),
            FormatCompat::Convertible => {
                self.compat = FormatCompat::Converted;
                let result = self.save_inner().map_err(|e| AlarmError::SaveFailed {
                    path: self.path.display().to_string(),
                    detail: e.to_string(),
                });
                if result.is_err() {
                    self.compat = FormatCompat::Convertible;
                }
                result
            }
            _ => Err(AlarmError::FormatIncompatible(self.config.id)),
        }
    }

    // --- Mutation ---

    fn check_writable(&self, cat: EventCategory) -> AlarmResult<()> {
        if !self.is_enabled(cat) {
            return Err(AlarmError::ResourceDisabled(self.config.id));
        }
        if self.config.read_only {
            return Err(AlarmError::ResourceReadOnly(self.config.id));
        }
        if !self.compat.is_writable() {
            return Err(AlarmError::FormatIncompatible(self.config.id));
        }
        Ok(())
    }

    pub fn add_event(&mut self, mut event: Event) -> AlarmResult<Event> {
        self.check_writable(event.category)?;
        event.resource_id = Some(self.config.id);
        self.events.insert(event.uid.clone(), event.clone());
        self.save()?;
        Ok(event)
    }

    pub fn update_event(&mut self, mut event: Event) -> AlarmResult<Event> {
        self.check_writable(event.category)?;
        if !self.events.contains_key(&event.uid) {
            return Err(AlarmError::EventNotFound(event.uid.clone()));
        }
        event.resource_id = Some(self.config.id);
        self.events.insert(event.uid.clone(), event.clone());
        self.save()?;
        Ok(event)
    }

    pub fn delete_event(&mut self, uid: &str) -> AlarmResult<Event> {
        let event = self
            .events
            .get(uid)
            .cloned()
            .ok_or_else(|| AlarmError::EventNotFound(uid.to_string()))?;
        self.check_writable(event.category)?;
        self.events.remove(uid);
        if self.config.kind == StorageKind::Directory {
            let file = self.path.join(format!("{}.ics", sanitise_uid(uid)));
            let _ = fs::remove_file(file);
        }
        self.save()?;
        Ok(event)
    }
}

fn sanitise_uid(uid: &str) -> String {
    uid.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AppContext, TestContext};
    use crate::model::datetime::AlarmDateTime;
    use crate::model::event::Action;
    use chrono::{TimeZone, Utc};

    fn test_resource(ctx: &TestContext) -> Resource {
        let config = ResourceConfig {
            id: 7,
            name: "Test".into(),
            config_name: "test".into(),
            kind: StorageKind::File,
            path: "test.ics".into(),
            alarm_types: TypeMask::active(),
            standard_types: TypeMask::default(),
            read_only: false,
            keep_format: false,
            colour: None,
        };
        let path = config.resolve_path(ctx).unwrap();
        Resource::new(config, path)
    }

    fn event() -> Event {
        Event::new(
            Action::Message("test".into()),
            AlarmDateTime::Timed(Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap()),
        )
    }

    #[test]
    fn add_and_reload() {
        let ctx = TestContext::new();
        let mut res = test_resource(&ctx);
        res.load(false).unwrap();
        let e = res.add_event(event()).unwrap();
        assert!(res.contains(&e.uid));

        let mut res2 = test_resource(&ctx);
        let loaded = res2.load(false).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uid, e.uid);
        assert_eq!(loaded[0].resource_id, Some(7));
    }

    #[test]
    fn mutation_refused_for_disabled_type() {
        let ctx = TestContext::new();
        let mut res = test_resource(&ctx);
        res.load(false).unwrap();
        let mut e = event();
        e.set_category(EventCategory::Archived);
        assert!(matches!(
            res.add_event(e),
            Err(AlarmError::ResourceDisabled(7))
        ));
    }

    #[test]
    fn disabling_type_clears_standard_bit() {
        let ctx = TestContext::new();
        let mut res = test_resource(&ctx);
        res.set_standard_types(TypeMask::active());
        res.set_enabled(EventCategory::Active, false);
        assert!(!res.standard_types().active);
    }
}

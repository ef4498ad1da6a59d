// Process-wide set of Resource instances.
//
// The registry owns every resource, arbitrates the standard-resource flags
// (at most one resource may be standard per alarm type), selects the
// destination for new events, and converts successful operations into an
// ordered notice stream which the engine drains and forwards to the
// calendar index. All initial-population EventsAdded notices precede the
// single AllPopulated notice.

use log::{info, warn};
use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::error::{AlarmError, AlarmResult};
use crate::model::event::{Event, EventCategory};
use crate::resource::{MessageKind, Resource, ResourceId, ResourceState};

#[derive(Debug, Clone)]
pub enum ResourceNotice {
    Added(ResourceId),
    Populated(ResourceId),
    /// Every initially-configured resource has populated or failed.
    AllPopulated,
    EventsAdded(ResourceId, Vec<Event>),
    EventUpdated(ResourceId, Event),
    EventsToBeRemoved(ResourceId, Vec<Event>),
    ToBeRemoved(ResourceId),
    Removed(ResourceId),
    Message {
        resource: ResourceId,
        kind: MessageKind,
        text: String,
        details: String,
    },
}

/// Options for `destination()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DestOptions {
    /// Don't prompt the user even if no standard resource is usable.
    pub no_resource_prompt: bool,
    /// If there is exactly one enabled writable resource, use it.
    pub use_only_resource: bool,
}

/// Collaborator that asks the user to pick a destination resource.
pub trait ResourcePrompter {
    /// Returns the chosen resource id, or None if the user cancelled.
    fn choose(&self, cat: EventCategory, candidates: &[(ResourceId, String)])
        -> Option<ResourceId>;
}

#[derive(Debug, Default)]
pub struct Resources {
    resources: BTreeMap<ResourceId, Resource>,
    notices: VecDeque<ResourceNotice>,
    /// Resources whose initial population is still outstanding.
    awaiting_population: HashSet<ResourceId>,
    all_populated_sent: bool,
}

impl Resources {
    pub fn new() -> Resources {
        Resources::default()
    }

    // --- Membership ---

    pub fn add_resource(&mut self, resource: Resource) {
        let id = resource.id();
        self.awaiting_population.insert(id);
        self.resources.insert(id, resource);
        self.notices.push_back(ResourceNotice::Added(id));
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(&id)
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn ids(&self) -> Vec<ResourceId> {
        self.resources.keys().copied().collect()
    }

    /// Removes a resource from the registry; the calendar file is kept.
    pub fn remove_resource(&mut self, id: ResourceId) -> bool {
        let Some(res) = self.resources.get_mut(&id) else {
            return false;
        };
        let events: Vec<Event> = res.events().cloned().collect();
        self.notices.push_back(ResourceNotice::ToBeRemoved(id));
        if !events.is_empty() {
            self.notices
                .push_back(ResourceNotice::EventsToBeRemoved(id, events));
        }
        res.mark_deleted();
        self.resources.remove(&id);
        self.awaiting_population.remove(&id);
        self.notices.push_back(ResourceNotice::Removed(id));
        true
    }

    // --- Population ---

    /// Loads every resource, emitting per-resource population notices and a
    /// final AllPopulated once the initial set is done.
    pub fn load_all(&mut self, force: bool) {
        let ids = self.ids();
        for id in ids {
            self.load_resource(id, force);
        }
    }

    pub fn load_resource(&mut self, id: ResourceId, force: bool) {
        let Some(res) = self.resources.get_mut(&id) else {
            return;
        };
        let name = res.name().to_string();
        match res.load(force) {
            Ok(events) => {
                if !events.is_empty() {
                    self.notices
                        .push_back(ResourceNotice::EventsAdded(id, events));
                }
                self.notices.push_back(ResourceNotice::Populated(id));
            }
            Err(e) => {
                warn!("Resource '{}' failed to load: {}", name, e);
                self.notices.push_back(ResourceNotice::Message {
                    resource: id,
                    kind: MessageKind::Error,
                    text: format!("Failed to load calendar '{}'", name),
                    details: e.to_string(),
                });
                self.notices.push_back(ResourceNotice::Populated(id));
            }
        }
        self.note_populated(id);
    }

    fn note_populated(&mut self, id: ResourceId) {
        self.awaiting_population.remove(&id);
        if self.awaiting_population.is_empty() && !self.all_populated_sent {
            self.all_populated_sent = true;
            self.notices.push_back(ResourceNotice::AllPopulated);
        }
    }

    pub fn all_populated(&self) -> bool {
        self.all_populated_sent
    }

    // --- Standard resource arbitration ---

    /// Resources enabled for a category, optionally restricted to writable
    /// ones.
    pub fn enabled_resources(&self, cat: EventCategory, writable: bool) -> Vec<ResourceId> {
        self.resources
            .values()
            .filter(|r| r.state() != ResourceState::Deleted)
            .filter(|r| {
                if writable {
                    r.is_writable(cat)
                } else {
                    r.is_enabled(cat)
                }
            })
            .map(|r| r.id())
            .collect()
    }

    /// Sets or clears the standard flag for one category. Setting it clears
    /// the flag on every other resource.
    pub fn set_standard(
        &mut self,
        id: ResourceId,
        cat: EventCategory,
        standard: bool,
    ) -> AlarmResult<()> {
        if standard {
            {
                let res = self
                    .resources
                    .get(&id)
                    .ok_or(AlarmError::ResourceNotFound(id))?;
                if !res.is_enabled(cat) {
                    return Err(AlarmError::ResourceDisabled(id));
                }
                if !res.is_writable(cat) {
                    return Err(AlarmError::ResourceReadOnly(id));
                }
            }
            for res in self.resources.values_mut() {
                let mut mask = res.standard_types();
                mask.set(cat, res.id() == id);
                res.set_standard_types(mask);
            }
        } else if let Some(res) = self.resources.get_mut(&id) {
            let mut mask = res.standard_types();
            mask.set(cat, false);
            res.set_standard_types(mask);
        }
        Ok(())
    }

    /// The standard resource for a category, if a usable one is configured.
    /// With `use_only_resource`, a sole writable resource of the category is
    /// adopted (and marked) as standard.
    pub fn get_standard(
        &mut self,
        cat: EventCategory,
        use_only_resource: bool,
    ) -> Option<ResourceId> {
        let configured = self
            .resources
            .values()
            .find(|r| r.standard_types().contains(cat) && r.is_writable(cat))
            .map(|r| r.id());
        if configured.is_some() {
            return configured;
        }
        if use_only_resource {
            let writable = self.enabled_resources(cat, true);
            if writable.len() == 1 {
                let id = writable[0];
                info!(
                    "Adopting sole writable resource {} as standard for {} alarms",
                    id,
                    cat.name()
                );
                let _ = self.set_standard(id, cat, true);
                return Some(id);
            }
        }
        None
    }

    pub fn is_standard(&self, id: ResourceId, cat: EventCategory) -> bool {
        self.resources
            .get(&id)
            .map(|r| r.standard_types().contains(cat) && r.is_writable(cat))
            .unwrap_or(false)
    }

    /// Finds the resource that should store a new event of a category.
    ///
    /// Selection order: the sole enabled writable resource (when
    /// `use_only_resource`), else the configured standard resource, else a
    /// user prompt. `cancelled` is set when the user declined the prompt.
    pub fn destination(
        &mut self,
        cat: EventCategory,
        prompter: Option<&dyn ResourcePrompter>,
        options: DestOptions,
        cancelled: &mut bool,
    ) -> AlarmResult<ResourceId> {
        *cancelled = false;
        let writable = self.enabled_resources(cat, true);
        if writable.is_empty() {
            return Err(AlarmError::NoWritableResource(cat.name().to_string()));
        }
        if options.use_only_resource && writable.len() == 1 {
            return Ok(writable[0]);
        }
        if let Some(standard) = self.get_standard(cat, false) {
            return Ok(standard);
        }
        let Some(prompter) = prompter.filter(|_| !options.no_resource_prompt) else {
            // No usable standard and no way (or wish) to ask; fall back to
            // the sole candidate if there is one.
            if writable.len() == 1 {
                return Ok(writable[0]);
            }
            return Err(AlarmError::NoWritableResource(cat.name().to_string()));
        };
        let candidates: Vec<(ResourceId, String)> = writable
            .iter()
            .map(|id| {
                (
                    *id,
                    self.resources
                        .get(id)
                        .map(|r| r.name().to_string())
                        .unwrap_or_default(),
                )
            })
            .collect();
        match prompter.choose(cat, &candidates) {
            Some(id) if writable.contains(&id) => Ok(id),
            Some(_) | None => {
                *cancelled = true;
                Err(AlarmError::NoWritableResource(cat.name().to_string()))
            }
        }
    }

    // --- Event operations (emit notices on success) ---

    pub fn add_event(&mut self, id: ResourceId, event: Event) -> AlarmResult<Event> {
        let res = self
            .resources
            .get_mut(&id)
            .ok_or(AlarmError::ResourceNotFound(id))?;
        let added = res.add_event(event)?;
        self.notices
            .push_back(ResourceNotice::EventsAdded(id, vec![added.clone()]));
        Ok(added)
    }

    pub fn update_event(&mut self, id: ResourceId, event: Event) -> AlarmResult<Event> {
        let res = self
            .resources
            .get_mut(&id)
            .ok_or(AlarmError::ResourceNotFound(id))?;
        let updated = res.update_event(event)?;
        self.notices
            .push_back(ResourceNotice::EventUpdated(id, updated.clone()));
        Ok(updated)
    }

    pub fn delete_event(&mut self, id: ResourceId, uid: &str) -> AlarmResult<Event> {
        let res = self
            .resources
            .get_mut(&id)
            .ok_or_else(|| AlarmError::EventNotFound(uid.to_string()))?;
        let removed = res.delete_event(uid)?;
        self.notices
            .push_back(ResourceNotice::EventsToBeRemoved(id, vec![removed.clone()]));
        Ok(removed)
    }

    // --- Lookup across resources ---

    /// The resource holding an event whose alarm type is enabled.
    pub fn resource_for_event(&self, uid: &str) -> Option<ResourceId> {
        self.resources
            .values()
            .find(|r| r.contains(uid) && r.is_enabled(EventCategory::from_uid(uid)))
            .map(|r| r.id())
    }

    pub fn find_event(&self, uid: &str) -> Option<(ResourceId, Event)> {
        for res in self.resources.values() {
            if let Some(e) = res.event(uid) {
                return Some((res.id(), e.clone()));
            }
        }
        None
    }

    // --- Messages / notices ---

    pub fn push_message(
        &mut self,
        resource: ResourceId,
        kind: MessageKind,
        text: String,
        details: String,
    ) {
        self.notices.push_back(ResourceNotice::Message {
            resource,
            kind,
            text,
            details,
        });
    }

    /// Drains the pending notice queue in emission order.
    pub fn take_notices(&mut self) -> Vec<ResourceNotice> {
        self.notices.drain(..).collect()
    }

    /// Snapshot of every resource's companion config record, for writing
    /// back to the config file on shutdown.
    pub fn configs(&self) -> Vec<crate::config::ResourceConfig> {
        self.resources.values().map(|r| r.config().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::context::TestContext;
    use crate::resource::{StorageKind, TypeMask};

    fn make(ctx: &TestContext, id: ResourceId, name: &str, standard: bool) -> Resource {
        let config = ResourceConfig {
            id,
            name: name.into(),
            config_name: name.to_lowercase(),
            kind: StorageKind::File,
            path: format!("{}.ics", name.to_lowercase()),
            alarm_types: TypeMask::active(),
            standard_types: if standard {
                TypeMask::active()
            } else {
                TypeMask::default()
            },
            read_only: false,
            keep_format: false,
            colour: None,
        };
        let path = config.resolve_path(ctx).unwrap();
        Resource::new(config, path)
    }

    #[test]
    fn standard_is_exclusive() {
        let ctx = TestContext::new();
        let mut registry = Resources::new();
        registry.add_resource(make(&ctx, 1, "A", true));
        registry.add_resource(make(&ctx, 2, "B", false));
        registry.load_all(false);

        assert!(registry.is_standard(1, EventCategory::Active));
        registry.set_standard(2, EventCategory::Active, true).unwrap();
        assert!(!registry.is_standard(1, EventCategory::Active));
        assert!(registry.is_standard(2, EventCategory::Active));
    }

    #[test]
    fn all_populated_fires_once_after_loads() {
        let ctx = TestContext::new();
        let mut registry = Resources::new();
        registry.add_resource(make(&ctx, 1, "A", true));
        registry.add_resource(make(&ctx, 2, "B", false));
        registry.load_all(false);

        let notices = registry.take_notices();
        let populated_count = notices
            .iter()
            .filter(|n| matches!(n, ResourceNotice::AllPopulated))
            .count();
        assert_eq!(populated_count, 1);
        // AllPopulated is the final notice of initial population.
        assert!(matches!(notices.last(), Some(ResourceNotice::AllPopulated)));
    }

    #[test]
    fn destination_prefers_standard() {
        let ctx = TestContext::new();
        let mut registry = Resources::new();
        registry.add_resource(make(&ctx, 1, "A", false));
        registry.add_resource(make(&ctx, 2, "B", true));
        registry.load_all(false);

        let mut cancelled = false;
        let dest = registry
            .destination(
                EventCategory::Active,
                None,
                DestOptions::default(),
                &mut cancelled,
            )
            .unwrap();
        assert_eq!(dest, 2);
        assert!(!cancelled);
    }
}

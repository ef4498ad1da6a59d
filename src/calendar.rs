// In-memory index over every resource's events.
//
// Keeps the (resource, UID) map, per-resource event lists and the
// earliest-alarm cache the scheduler arms its timer from. Alarms being
// processed sit in a pending set so they are excluded from the earliest
// computation and cannot re-fire mid-handling.

use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::config::WorkSchedule;
use crate::model::event::{Event, EventCategory, TriggerKind};
use crate::model::AlarmDateTime;
use crate::resource::ResourceId;
use crate::resources::ResourceNotice;

/// Unique identity of an event within the process: resource + UID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
    pub resource: ResourceId,
    pub uid: String,
}

impl EventId {
    pub fn new(resource: ResourceId, uid: &str) -> EventId {
        EventId {
            resource,
            uid: uid.to_string(),
        }
    }
}

/// State transitions the engine reacts to.
#[derive(Debug, Clone)]
pub enum CalendarChange {
    EarliestChanged,
    HaveDisabledChanged(bool),
    /// A repeat-at-login alarm was added after initial population.
    AtLoginEventAdded(Event),
}

#[derive(Debug, Default)]
pub struct ResourcesCalendar {
    by_uid: HashMap<(ResourceId, String), Event>,
    by_resource: BTreeMap<ResourceId, Vec<String>>,
    /// UID of the earliest-triggering active event per resource.
    earliest: BTreeMap<ResourceId, Option<String>>,
    /// UIDs currently being processed after triggering.
    pending: HashSet<String>,
    have_disabled: bool,
    /// Set once initial population is done; newly added repeat-at-login
    /// alarms are announced from then on.
    populated: bool,
    changes: VecDeque<CalendarChange>,
}

impl ResourcesCalendar {
    pub fn new() -> ResourcesCalendar {
        ResourcesCalendar::default()
    }

    pub fn populated(&self) -> bool {
        self.populated
    }

    pub fn have_disabled_alarms(&self) -> bool {
        self.have_disabled
    }

    pub fn take_changes(&mut self) -> Vec<CalendarChange> {
        self.changes.drain(..).collect()
    }

    /// Applies one registry notice to the index.
    pub fn handle_notice(&mut self, notice: &ResourceNotice, work: Option<&WorkSchedule>) {
        match notice {
            ResourceNotice::EventsAdded(rid, events) => {
                for event in events {
                    self.insert_event(*rid, event.clone(), work);
                }
                self.refresh_watches();
            }
            ResourceNotice::EventUpdated(rid, event) => {
                self.insert_event(*rid, event.clone(), work);
                self.refresh_watches();
            }
            ResourceNotice::EventsToBeRemoved(rid, events) => {
                for event in events {
                    self.remove_event(*rid, &event.uid, work);
                }
                self.refresh_watches();
            }
            ResourceNotice::Removed(rid) => {
                if let Some(uids) = self.by_resource.remove(rid) {
                    for uid in uids {
                        self.by_uid.remove(&(*rid, uid));
                    }
                }
                self.earliest.remove(rid);
                self.changes.push_back(CalendarChange::EarliestChanged);
                self.refresh_watches();
            }
            ResourceNotice::AllPopulated => {
                self.populated = true;
            }
            _ => {}
        }
    }

    fn insert_event(&mut self, rid: ResourceId, event: Event, work: Option<&WorkSchedule>) {
        let key = (rid, event.uid.clone());
        let is_new = !self.by_uid.contains_key(&key);
        if is_new {
            self.by_resource
                .entry(rid)
                .or_default()
                .push(event.uid.clone());
        }
        let announce_login = self.populated
            && event.enabled
            && event.at_login
            && event.category == EventCategory::Active;
        self.by_uid.insert(key, event.clone());
        self.recompute_earliest(rid, work);
        if announce_login {
            self.changes
                .push_back(CalendarChange::AtLoginEventAdded(event));
        }
    }

    fn remove_event(&mut self, rid: ResourceId, uid: &str, work: Option<&WorkSchedule>) {
        self.by_uid.remove(&(rid, uid.to_string()));
        if let Some(list) = self.by_resource.get_mut(&rid) {
            list.retain(|u| u != uid);
        }
        self.pending.remove(uid);
        let was_earliest = self
            .earliest
            .get(&rid)
            .and_then(|u| u.as_deref())
            .map(|u| u == uid)
            .unwrap_or(false);
        if was_earliest {
            self.recompute_earliest(rid, work);
        }
    }

    /// Recomputes the earliest active trigger for one resource.
    pub fn recompute_earliest(&mut self, rid: ResourceId, work: Option<&WorkSchedule>) {
        let mut best: Option<(AlarmDateTime, String)> = None;
        if let Some(uids) = self.by_resource.get(&rid) {
            for uid in uids {
                if self.pending.contains(uid) {
                    continue;
                }
                let Some(event) = self.by_uid.get(&(rid, uid.clone())) else {
                    continue;
                };
                if event.category != EventCategory::Active || !event.enabled {
                    continue;
                }
                if let Some(t) = event.next_trigger(TriggerKind::AllWork, work) {
                    if best.as_ref().map(|(b, _)| t < *b).unwrap_or(true) {
                        best = Some((t, uid.clone()));
                    }
                }
            }
        }
        let new = best.map(|(_, uid)| uid);
        let old = self.earliest.insert(rid, new.clone());
        if old.flatten() != new {
            self.changes.push_back(CalendarChange::EarliestChanged);
        }
    }

    fn recompute_all(&mut self, work: Option<&WorkSchedule>) {
        let rids: Vec<ResourceId> = self.by_resource.keys().copied().collect();
        for rid in rids {
            self.recompute_earliest(rid, work);
        }
    }

    /// Updates the disabled-alarms watch, announcing edges.
    fn refresh_watches(&mut self) {
        let have = self
            .by_uid
            .values()
            .any(|e| e.category == EventCategory::Active && !e.enabled);
        if have != self.have_disabled {
            self.have_disabled = have;
            self.changes
                .push_back(CalendarChange::HaveDisabledChanged(have));
        }
    }

    /// The next-to-fire active alarm across all resources, ignoring pending
    /// ones.
    pub fn earliest_alarm(&self, work: Option<&WorkSchedule>) -> Option<&Event> {
        let mut best: Option<(AlarmDateTime, &Event)> = None;
        for (rid, uid) in self.earliest.iter() {
            let Some(uid) = uid else { continue };
            let Some(event) = self.by_uid.get(&(*rid, uid.clone())) else {
                continue;
            };
            let Some(t) = event.next_trigger(TriggerKind::AllWork, work) else {
                continue;
            };
            if best.as_ref().map(|(b, _)| t < *b).unwrap_or(true) {
                best = Some((t, event));
            }
        }
        best.map(|(_, e)| e)
    }

    /// Marks an alarm as being processed (or done), keeping it out of the
    /// earliest computation while it is handled.
    pub fn set_alarm_pending(&mut self, id: &EventId, pending: bool, work: Option<&WorkSchedule>) {
        let changed = if pending {
            self.pending.insert(id.uid.clone())
        } else {
            self.pending.remove(&id.uid)
        };
        if changed {
            debug!("Alarm {} pending = {}", id.uid, pending);
            self.recompute_earliest(id.resource, work);
        }
    }

    pub fn is_pending(&self, uid: &str) -> bool {
        self.pending.contains(uid)
    }

    // --- Queries ---

    pub fn event(&self, id: &EventId) -> Option<&Event> {
        self.by_uid.get(&(id.resource, id.uid.clone()))
    }

    /// Looks up an event by UID alone; used by requests that carry no
    /// resource id. Returns None if the UID is ambiguous across resources.
    pub fn event_by_uid(&self, uid: &str) -> Option<&Event> {
        let mut found = None;
        for ((_, u), event) in self.by_uid.iter() {
            if u == uid {
                if found.is_some() {
                    return None;
                }
                found = Some(event);
            }
        }
        found
    }

    pub fn events_for_resource(&self, rid: ResourceId) -> Vec<&Event> {
        self.by_resource
            .get(&rid)
            .map(|uids| {
                uids.iter()
                    .filter_map(|u| self.by_uid.get(&(rid, u.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn events(&self, category: Option<EventCategory>) -> Vec<&Event> {
        self.by_uid
            .values()
            .filter(|e| category.map(|c| e.category == c).unwrap_or(true))
            .collect()
    }

    pub fn template_event(&self, name: &str) -> Option<&Event> {
        self.by_uid.values().find(|e| {
            e.category == EventCategory::Template
                && e.template.as_ref().map(|t| t.name == name).unwrap_or(false)
        })
    }

    /// Re-evaluates every earliest cache, e.g. after working hours changed.
    pub fn refresh_triggers(&mut self, work: Option<&WorkSchedule>) {
        self.recompute_all(work);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::Action;
    use chrono::{TimeZone, Utc};

    fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
        AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
    }

    fn event_at(h: u32) -> Event {
        Event::new(Action::Message(format!("m{}", h)), timed(2030, 5, 1, h, 0))
    }

    #[test]
    fn earliest_tracks_minimum_across_resources() {
        let mut cal = ResourcesCalendar::new();
        let e1 = event_at(10);
        let e2 = event_at(8);
        cal.handle_notice(&ResourceNotice::EventsAdded(1, vec![e1]), None);
        cal.handle_notice(&ResourceNotice::EventsAdded(2, vec![e2.clone()]), None);
        assert_eq!(cal.earliest_alarm(None).unwrap().uid, e2.uid);
    }

    #[test]
    fn pending_alarm_is_skipped() {
        let mut cal = ResourcesCalendar::new();
        let e1 = event_at(8);
        let e2 = event_at(10);
        cal.handle_notice(
            &ResourceNotice::EventsAdded(1, vec![e1.clone(), e2.clone()]),
            None,
        );
        cal.set_alarm_pending(&EventId::new(1, &e1.uid), true, None);
        assert_eq!(cal.earliest_alarm(None).unwrap().uid, e2.uid);
        cal.set_alarm_pending(&EventId::new(1, &e1.uid), false, None);
        assert_eq!(cal.earliest_alarm(None).unwrap().uid, e1.uid);
    }

    #[test]
    fn disabled_watch_announces_edges() {
        let mut cal = ResourcesCalendar::new();
        let mut e = event_at(9);
        e.enabled = false;
        cal.handle_notice(&ResourceNotice::EventsAdded(1, vec![e.clone()]), None);
        let changes = cal.take_changes();
        assert!(changes
            .iter()
            .any(|c| matches!(c, CalendarChange::HaveDisabledChanged(true))));
        assert!(cal.have_disabled_alarms());
    }
}

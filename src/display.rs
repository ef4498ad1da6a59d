// The displaying calendar: a single-file store holding a copy of every
// alarm whose display is currently open. After a crash, the next start
// scans this file and re-raises each entry; copies are removed when the
// user acknowledges the display.

use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::context::AppContext;
use crate::error::{AlarmError, AlarmResult};
use crate::model::adapter::IcsAdapter;
use crate::model::datetime::AlarmDateTime;
use crate::model::event::{AlarmKind, Event, EventCategory};
use crate::resource::ResourceId;
use crate::storage;

#[derive(Debug)]
pub struct DisplayCalendar {
    path: PathBuf,
    events: HashMap<String, Event>,
    open: bool,
}

impl DisplayCalendar {
    pub fn new(ctx: &dyn AppContext) -> Result<DisplayCalendar> {
        let path = ctx
            .get_display_calendar_path()
            .ok_or_else(|| anyhow::anyhow!("no data directory for the display calendar"))?;
        Ok(DisplayCalendar {
            path,
            events: HashMap::new(),
            open: false,
        })
    }

    /// Reads the calendar, creating it empty when missing or zero-length.
    pub fn open(&mut self) -> Result<()> {
        let content = storage::read_calendar(&self.path)?;
        if content.trim().is_empty() {
            self.events.clear();
            self.open = true;
            return Ok(());
        }
        match IcsAdapter::calendar_from_ics(&content) {
            Ok((events, _compat)) => {
                self.events = events
                    .into_iter()
                    .filter(|e| e.category == EventCategory::Displaying)
                    .map(|e| (e.uid.clone(), e))
                    .collect();
                if !self.events.is_empty() {
                    info!(
                        "Display calendar holds {} unacknowledged alarm(s)",
                        self.events.len()
                    );
                }
            }
            Err(e) => {
                // A broken display calendar only loses crash recovery;
                // start afresh rather than refusing to run.
                warn!("Display calendar unreadable, starting empty: {}", e);
                self.events.clear();
            }
        }
        self.open = true;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn save(&self) -> AlarmResult<()> {
        let refs: Vec<&Event> = self.events.values().collect();
        let content = IcsAdapter::calendar_to_ics(&refs);
        storage::write_calendar(&self.path, &content).map_err(|e| AlarmError::SaveFailed {
            path: self.path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Stores a copy of an event whose display has just opened.
    pub fn add_displaying(
        &mut self,
        src: &Event,
        kind: AlarmKind,
        resource: ResourceId,
        when: AlarmDateTime,
        show_edit: bool,
        show_defer: bool,
    ) -> AlarmResult<()> {
        let copy = Event::displaying_copy(src, kind, resource, when, show_edit, show_defer);
        self.events.insert(copy.uid.clone(), copy);
        self.save()
    }

    /// Removes the copy once its display is acknowledged.
    pub fn remove_displaying(&mut self, uid: &str) -> AlarmResult<()> {
        let tagged = EventCategory::Displaying.tag_uid(uid);
        if self.events.remove(&tagged).is_some() {
            self.save()?;
        }
        Ok(())
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.events
            .contains_key(&EventCategory::Displaying.tag_uid(uid))
    }

    pub fn events(&self) -> Vec<&Event> {
        self.events.values().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Rewrites the backing file to match the in-memory set, e.g. after a
    /// recovery scan dropped stale copies.
    pub fn flush(&self) -> AlarmResult<()> {
        self.save()
    }

    /// Drains the stored copies for startup recovery, returning each with
    /// its original resource id and display-button state.
    pub fn take_for_recovery(&mut self) -> Vec<(Event, Option<ResourceId>, bool, bool)> {
        let drained: Vec<Event> = self.events.drain().map(|(_, e)| e).collect();
        drained
            .into_iter()
            .map(|e| {
                let (event, rid, edit, defer) = e.reinstate_from_displaying();
                (event, rid, edit, defer)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;
    use crate::model::event::Action;
    use chrono::{TimeZone, Utc};

    fn event() -> Event {
        Event::new(
            Action::Message("wake".into()),
            AlarmDateTime::Timed(Utc.with_ymd_and_hms(2030, 1, 1, 7, 0, 0).unwrap()),
        )
    }

    #[test]
    fn copies_survive_reopen() {
        let ctx = TestContext::new();
        let e = event();
        {
            let mut cal = DisplayCalendar::new(&ctx).unwrap();
            cal.open().unwrap();
            cal.add_displaying(&e, AlarmKind::Main, 1, e.next_main, true, true)
                .unwrap();
        }
        let mut cal = DisplayCalendar::new(&ctx).unwrap();
        cal.open().unwrap();
        assert_eq!(cal.len(), 1);
        assert!(cal.contains(&e.uid));

        let recovered = cal.take_for_recovery();
        assert_eq!(recovered.len(), 1);
        let (rec, rid, edit, defer) = &recovered[0];
        assert_eq!(rec.uid, e.uid);
        assert_eq!(*rid, Some(1));
        assert!(edit);
        assert!(defer);
    }

    #[test]
    fn acknowledgement_removes_copy() {
        let ctx = TestContext::new();
        let e = event();
        let mut cal = DisplayCalendar::new(&ctx).unwrap();
        cal.open().unwrap();
        cal.add_displaying(&e, AlarmKind::Main, 1, e.next_main, false, false)
            .unwrap();
        cal.remove_displaying(&e.uid).unwrap();
        assert!(cal.is_empty());
    }
}

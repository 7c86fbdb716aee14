//! In-memory reference implementations of the domain services.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::RwLock;
use parley_protocol::{Clock, DomainRecord, DomainService, ServiceError, Slots, Validation};
use uuid::Uuid;

/// Start time of a record, when it has one.
pub fn scheduled_at(slots: &Slots) -> Option<NaiveDateTime> {
    slots.get("datetime").and_then(|value| value.as_datetime())
}

/// Calendar day of a record: the `date` slot, or the day of its `datetime`.
pub fn scheduled_on(slots: &Slots) -> Option<NaiveDate> {
    scheduled_at(slots).map(|at| at.date()).or_else(|| {
        slots
            .get("date")
            .and_then(|value| value.as_text())
            .and_then(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok())
    })
}

fn reject_past(slots: &Slots, now: NaiveDateTime) -> Validation {
    if let Some(at) = scheduled_at(slots) {
        if at < now {
            return Validation::rejected("that time has already passed");
        }
    } else if let Some(day) = scheduled_on(slots)
        && day < now.date()
    {
        return Validation::rejected("that date has already passed");
    }
    Validation::ok()
}

struct RecordBook {
    prefix: &'static str,
    records: RwLock<Vec<DomainRecord>>,
}

impl RecordBook {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            records: RwLock::new(Vec::new()),
        }
    }

    fn insert(&self, fields: &Slots) -> DomainRecord {
        let record = DomainRecord {
            id: format!("{}_{}", self.prefix, Uuid::new_v4().simple()),
            fields: fields.clone(),
        };
        self.records.write().push(record.clone());
        record
    }

    fn all(&self) -> Vec<DomainRecord> {
        self.records.read().clone()
    }
}

/// Events keyed by start time. Rejects anything scheduled in the past.
pub struct CalendarService {
    clock: Arc<dyn Clock>,
    events: RecordBook,
}

impl CalendarService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            events: RecordBook::new("evt"),
        }
    }
}

#[async_trait]
impl DomainService for CalendarService {
    fn name(&self) -> &str {
        "calendar"
    }

    async fn create(&self, fields: &Slots) -> Result<DomainRecord, ServiceError> {
        Ok(self.events.insert(fields))
    }

    async fn validate(&self, slots: &Slots) -> Validation {
        reject_past(slots, self.clock.now())
    }

    /// Events ordered by start; undated ones last.
    async fn list(&self) -> Result<Vec<DomainRecord>, ServiceError> {
        let mut events = self.events.all();
        events.sort_by_key(|record| {
            (
                scheduled_on(&record.fields).is_none(),
                scheduled_on(&record.fields),
                scheduled_at(&record.fields),
            )
        });
        Ok(events)
    }
}

pub struct ReminderService {
    clock: Arc<dyn Clock>,
    reminders: RecordBook,
}

impl ReminderService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            reminders: RecordBook::new("rem"),
        }
    }
}

#[async_trait]
impl DomainService for ReminderService {
    fn name(&self) -> &str {
        "reminders"
    }

    async fn create(&self, fields: &Slots) -> Result<DomainRecord, ServiceError> {
        Ok(self.reminders.insert(fields))
    }

    async fn validate(&self, slots: &Slots) -> Validation {
        reject_past(slots, self.clock.now())
    }

    async fn list(&self) -> Result<Vec<DomainRecord>, ServiceError> {
        Ok(self.reminders.all())
    }
}

pub struct NoteService {
    notes: RecordBook,
}

impl NoteService {
    pub fn new() -> Self {
        Self {
            notes: RecordBook::new("note"),
        }
    }
}

impl Default for NoteService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DomainService for NoteService {
    fn name(&self) -> &str {
        "notes"
    }

    async fn create(&self, fields: &Slots) -> Result<DomainRecord, ServiceError> {
        Ok(self.notes.insert(fields))
    }

    async fn validate(&self, slots: &Slots) -> Validation {
        if slots.contains_key("body") || slots.contains_key("title") {
            Validation::ok()
        } else {
            Validation::rejected("what should the note say?")
        }
    }

    async fn list(&self) -> Result<Vec<DomainRecord>, ServiceError> {
        Ok(self.notes.all())
    }
}

/// Collects drafts in an outbox instead of sending anything.
pub struct EmailStubService {
    outbox: RecordBook,
}

impl EmailStubService {
    pub fn new() -> Self {
        Self {
            outbox: RecordBook::new("mail"),
        }
    }
}

impl Default for EmailStubService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DomainService for EmailStubService {
    fn name(&self) -> &str {
        "email"
    }

    async fn create(&self, fields: &Slots) -> Result<DomainRecord, ServiceError> {
        Ok(self.outbox.insert(fields))
    }

    async fn validate(&self, slots: &Slots) -> Validation {
        let has_recipient = slots
            .get("recipients")
            .is_some_and(|value| value.as_list().is_some_and(|list| !list.is_empty()) || value.as_text().is_some());
        if has_recipient {
            Validation::ok()
        } else {
            Validation::rejected("who should I send it to?")
        }
    }

    async fn list(&self) -> Result<Vec<DomainRecord>, ServiceError> {
        Ok(self.outbox.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{FixedClock, SlotValue};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(
            NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        ))
    }

    fn slots(entries: &[(&str, SlotValue)]) -> Slots {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_owned(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn calendar_rejects_past_times_and_days() {
        let calendar = CalendarService::new(clock());
        let yesterday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        let past = slots(&[("datetime", yesterday.and_hms_opt(15, 0, 0).unwrap().into())]);
        assert!(!calendar.validate(&past).await.valid);

        let past_day = slots(&[("date", "2026-10-18".into())]);
        assert!(!calendar.validate(&past_day).await.valid);

        let today = slots(&[("date", "2026-10-19".into())]);
        assert!(calendar.validate(&today).await.valid);
        assert!(calendar.validate(&Slots::new()).await.valid);
    }

    #[tokio::test]
    async fn calendar_lists_events_in_start_order() {
        let calendar = CalendarService::new(clock());
        let day = NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
        for (title, hour) in [("Late", 17), ("Early", 8)] {
            let fields = slots(&[
                ("title", title.into()),
                ("datetime", day.and_hms_opt(hour, 0, 0).unwrap().into()),
            ]);
            calendar.create(&fields).await.unwrap();
        }
        calendar.create(&slots(&[("title", "Someday".into())])).await.unwrap();

        let titles: Vec<String> = calendar
            .list()
            .await
            .unwrap()
            .iter()
            .map(|record| record.fields["title"].render())
            .collect();
        assert_eq!(titles, ["Early", "Late", "Someday"]);
    }

    #[tokio::test]
    async fn records_get_prefixed_unique_ids() {
        let notes = NoteService::new();
        let fields = slots(&[("body", "buy milk".into())]);
        let first = notes.create(&fields).await.unwrap();
        let second = notes.create(&fields).await.unwrap();
        assert!(first.id.starts_with("note_"));
        assert_ne!(first.id, second.id);
        assert_eq!(notes.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn email_requires_a_recipient() {
        let email = EmailStubService::new();
        assert!(!email.validate(&Slots::new()).await.valid);
        let addressed = slots(&[("recipients", vec!["Bob".to_owned()].into())]);
        assert!(email.validate(&addressed).await.valid);
    }
}

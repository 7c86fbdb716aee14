//! Intent routing to domain services and response rendering.

use std::collections::HashMap;
use std::sync::Arc;

use parley_protocol::{
    ActionResult, AssistantError, Clock, DomainRecord, DomainService, Intent, ServiceError,
    SessionId, Slots,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

mod services;

pub use services::{
    CalendarService, EmailStubService, NoteService, ReminderService, scheduled_at, scheduled_on,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{intent} rejected: {reason}")]
    Rejected { intent: Intent, reason: String },
    #[error("{service} service failed: {source}")]
    Service {
        service: String,
        #[source]
        source: ServiceError,
    },
}

impl From<DispatchError> for AssistantError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Rejected { reason, .. } => Self::ValidationFailure(reason),
            DispatchError::Service { .. } => Self::DispatchFailure(error.to_string()),
        }
    }
}

/// Intent → service table. One service may back several intents.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<Intent, Arc<dyn DomainService>>,
}

impl ServiceRegistry {
    pub fn register(&mut self, intent: impl Into<Intent>, service: Arc<dyn DomainService>) {
        self.services.insert(intent.into(), service);
    }

    pub fn get(&self, intent: &Intent) -> Option<Arc<dyn DomainService>> {
        self.services.get(intent).cloned()
    }

    pub fn intents(&self) -> Vec<&Intent> {
        let mut intents: Vec<&Intent> = self.services.keys().collect();
        intents.sort();
        intents
    }

    pub fn with_in_memory_services(clock: Arc<dyn Clock>) -> Self {
        let calendar: Arc<dyn DomainService> = Arc::new(CalendarService::new(clock.clone()));
        let mut registry = Self::default();
        registry.register(Intent::CREATE_EVENT, calendar.clone());
        registry.register(Intent::LIST_EVENTS, calendar);
        registry.register(Intent::CREATE_REMINDER, Arc::new(ReminderService::new(clock)));
        registry.register(Intent::CREATE_NOTE, Arc::new(NoteService::new()));
        registry.register(Intent::SEND_EMAIL, Arc::new(EmailStubService::new()));
        registry
    }
}

#[derive(Clone)]
pub struct ActionDispatcher {
    registry: Arc<ServiceRegistry>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    /// Validates, then creates (or lists, for `list_events`) through the
    /// routed service.
    ///
    /// Validation rejections and service failures are errors; an unroutable
    /// intent comes back as an unsuccessful result.
    #[instrument(
        skip(self, intent, slots, session_id),
        fields(session_id = %session_id, intent = %intent, slots = slots.len())
    )]
    pub async fn dispatch(
        &self,
        intent: &Intent,
        slots: &Slots,
        session_id: &SessionId,
    ) -> Result<ActionResult, DispatchError> {
        let Some(service) = self.registry.get(intent) else {
            debug!("no service registered for intent");
            return Ok(unroutable(intent));
        };

        let validation = service.validate(slots).await;
        if !validation.valid {
            let reason = validation
                .reason
                .unwrap_or_else(|| "the request was rejected".to_owned());
            warn!(service = service.name(), %reason, "action rejected by validation");
            return Err(DispatchError::Rejected {
                intent: intent.clone(),
                reason,
            });
        }

        let outcome = if intent.as_str() == Intent::LIST_EVENTS {
            service
                .list()
                .await
                .map(|records| render_listing(&records, slots))
        } else {
            service
                .create(slots)
                .await
                .map(|record| render_created(intent, &record))
        };

        match outcome {
            Ok(result) => {
                info!(service = service.name(), follow_up = result.follow_up.is_some(), "action dispatched");
                Ok(result)
            }
            Err(source) => {
                let error = DispatchError::Service {
                    service: service.name().to_owned(),
                    source,
                };
                error!(%error, "domain service failed");
                Err(error)
            }
        }
    }
}

fn unroutable(intent: &Intent) -> ActionResult {
    if intent.is_unknown() {
        return ActionResult::failed(
            "I'm not sure what you'd like me to do. Could you rephrase that?",
        );
    }
    let action = intent.as_str().replace('_', " ");
    ActionResult::failed(format!(
        "I can't {action} yet. Could you rephrase that as an event, reminder, note, or email?"
    ))
    .with_spoken(format!("Sorry, I can't {action} yet."))
}

fn text<'a>(slots: &'a Slots, key: &str) -> Option<&'a str> {
    slots.get(key).and_then(|value| value.as_text())
}

fn list_phrase(slots: &Slots, key: &str) -> Option<String> {
    let value = slots.get(key)?;
    let names = value.as_list().map_or_else(|| value.render(), |names| join_names(names));
    (!names.is_empty()).then_some(names)
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [rest @ .., last] => format!("{} and {last}", rest.join(", ")),
    }
}

/// " on Tuesday October 20 at 3:00 PM", " on Tuesday October 20", or nothing.
fn when_phrase(slots: &Slots) -> String {
    if let Some(at) = scheduled_at(slots) {
        format!(" on {}", at.format("%A %B %-d at %-I:%M %p"))
    } else if let Some(day) = scheduled_on(slots) {
        format!(" on {}", day.format("%A %B %-d"))
    } else {
        String::new()
    }
}

fn attach_record(result: ActionResult, record: &DomainRecord) -> ActionResult {
    match serde_json::to_value(record) {
        Ok(data) => result.with_data(data),
        Err(error) => {
            warn!(%error, "record not serializable, omitting data");
            result
        }
    }
}

fn render_created(intent: &Intent, record: &DomainRecord) -> ActionResult {
    let fields = &record.fields;
    let when = when_phrase(fields);

    let result = match intent.as_str() {
        Intent::CREATE_EVENT => {
            let title = text(fields, "title").unwrap_or("Event");
            let mut details = String::new();
            if let Some(attendees) = list_phrase(fields, "attendees") {
                details.push_str(&format!(" with {attendees}"));
            }
            if let Some(location) = text(fields, "location") {
                details.push_str(&format!(" at {location}"));
            }
            let result = ActionResult::succeeded(format!("Scheduled \"{title}\"{details}{when}."))
                .with_spoken(format!("Okay, {title}{details} is on your calendar{when}."));
            if scheduled_at(fields).is_none() {
                result.with_follow_up("What time should it start?")
            } else {
                result
            }
        }
        Intent::CREATE_REMINDER => {
            let title = text(fields, "title").unwrap_or("Reminder");
            let result = ActionResult::succeeded(format!("Reminder set: {title}{when}."))
                .with_spoken(format!("I'll remind you{when}: {title}."));
            if scheduled_on(fields).is_none() {
                result.with_follow_up("When should I remind you?")
            } else if scheduled_at(fields).is_none() {
                result.with_follow_up("What time should I remind you?")
            } else {
                result
            }
        }
        Intent::CREATE_NOTE => {
            let body = text(fields, "body")
                .or_else(|| text(fields, "title"))
                .unwrap_or_default();
            ActionResult::succeeded(format!("Saved a note: \"{body}\"."))
                .with_spoken("Got it, I saved that note.")
        }
        Intent::SEND_EMAIL => {
            let to = list_phrase(fields, "recipients").unwrap_or_else(|| "them".to_owned());
            let about = text(fields, "subject")
                .map(|subject| format!(" about \"{subject}\""))
                .unwrap_or_default();
            let result = ActionResult::succeeded(format!("Drafted an email to {to}{about}."))
                .with_spoken(format!("I've drafted the email to {to}."));
            if fields.contains_key("body") {
                result
            } else {
                result.with_follow_up("What should the email say?")
            }
        }
        other => ActionResult::succeeded(format!("Done: {}.", other.replace('_', " "))),
    };
    attach_record(result, record)
}

fn render_listing(records: &[DomainRecord], slots: &Slots) -> ActionResult {
    let day = scheduled_on(slots);
    let matching: Vec<&DomainRecord> = records
        .iter()
        .filter(|record| day.is_none() || scheduled_on(&record.fields) == day)
        .collect();
    let scope = day
        .map(|day| format!(" on {}", day.format("%A %B %-d")))
        .unwrap_or_default();

    if matching.is_empty() {
        return ActionResult::succeeded(format!("Your calendar is clear{scope}."))
            .with_data(serde_json::Value::Array(Vec::new()));
    }

    let lines: Vec<String> = matching
        .iter()
        .map(|record| {
            let title = text(&record.fields, "title").unwrap_or("Event");
            match scheduled_at(&record.fields) {
                Some(at) => format!("{title} at {}", at.format("%-I:%M %p")),
                None => title.to_owned(),
            }
        })
        .collect();
    let noun = if matching.len() == 1 { "event" } else { "events" };
    let summary = format!("You have {} {noun}{scope}", matching.len());

    let result = ActionResult::succeeded(format!("{summary}: {}.", lines.join("; ")))
        .with_spoken(format!("{summary}. {}.", lines.join(", then ")));
    match serde_json::to_value(&matching) {
        Ok(data) => result.with_data(data),
        Err(_) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};
    use parley_protocol::{FixedClock, SlotValue};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new(Arc::new(ServiceRegistry::with_in_memory_services(Arc::new(
            FixedClock(now()),
        ))))
    }

    fn slots(entries: &[(&str, SlotValue)]) -> Slots {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_owned(), value.clone()))
            .collect()
    }

    fn session() -> SessionId {
        SessionId::from_string("dispatch-test")
    }

    struct BrokenService;

    #[async_trait]
    impl DomainService for BrokenService {
        fn name(&self) -> &str {
            "broken"
        }

        async fn create(&self, _fields: &Slots) -> Result<DomainRecord, ServiceError> {
            Err(ServiceError::Unavailable("backend offline".to_owned()))
        }
    }

    #[tokio::test]
    async fn creates_event_and_renders_response() -> Result<()> {
        let at = now() + chrono::Duration::days(1);
        let fields = slots(&[
            ("title", "Lunch".into()),
            ("datetime", at.into()),
            ("attendees", vec!["Ana".to_owned(), "Ben".to_owned()].into()),
        ]);

        let result = dispatcher()
            .dispatch(&Intent::new(Intent::CREATE_EVENT), &fields, &session())
            .await?;
        assert!(result.success);
        assert_eq!(
            result.message,
            "Scheduled \"Lunch\" with Ana and Ben on Tuesday October 20 at 9:00 AM."
        );
        assert!(result.follow_up.is_none());
        let data = result.data.expect("record data");
        assert!(data["id"].as_str().is_some_and(|id| id.starts_with("evt_")));
        Ok(())
    }

    #[tokio::test]
    async fn event_without_time_asks_for_one() -> Result<()> {
        let fields = slots(&[("title", "Dinner".into()), ("date", "2026-10-20".into())]);
        let result = dispatcher()
            .dispatch(&Intent::new(Intent::CREATE_EVENT), &fields, &session())
            .await?;
        assert!(result.success);
        assert_eq!(result.follow_up.as_deref(), Some("What time should it start?"));
        Ok(())
    }

    #[tokio::test]
    async fn past_event_is_rejected_as_validation_failure() {
        let fields = slots(&[("datetime", (now() - chrono::Duration::hours(2)).into())]);
        let error = dispatcher()
            .dispatch(&Intent::new(Intent::CREATE_EVENT), &fields, &session())
            .await
            .unwrap_err();
        assert!(matches!(error, DispatchError::Rejected { .. }));
        assert!(matches!(
            AssistantError::from(error),
            AssistantError::ValidationFailure(reason) if reason.contains("passed")
        ));
    }

    #[tokio::test]
    async fn unroutable_intents_fail_softly() -> Result<()> {
        let dispatcher = dispatcher();
        let result = dispatcher
            .dispatch(&Intent::unknown(), &Slots::new(), &session())
            .await?;
        assert!(!result.success);
        assert!(result.message.contains("rephrase"));

        let result = dispatcher
            .dispatch(&Intent::new("order_pizza"), &Slots::new(), &session())
            .await?;
        assert!(!result.success);
        assert!(result.message.contains("order pizza"));
        Ok(())
    }

    #[tokio::test]
    async fn service_failure_is_reported_as_an_error() {
        let mut registry = ServiceRegistry::default();
        registry.register(Intent::CREATE_NOTE, Arc::new(BrokenService));
        let dispatcher = ActionDispatcher::new(Arc::new(registry));

        let result = dispatcher
            .dispatch(
                &Intent::new(Intent::CREATE_NOTE),
                &slots(&[("body", "milk".into())]),
                &session(),
            )
            .await;
        match result {
            Err(DispatchError::Service { service, source }) => {
                assert_eq!(service, "broken");
                assert!(matches!(source, ServiceError::Unavailable(_)));
            }
            other => panic!("expected a service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_events_filters_by_requested_day() -> Result<()> {
        let dispatcher = dispatcher();
        let create = Intent::new(Intent::CREATE_EVENT);
        let tomorrow = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let later = NaiveDate::from_ymd_opt(2026, 10, 23).unwrap();
        for (title, at) in [
            ("Standup", tomorrow.and_hms_opt(10, 0, 0).unwrap()),
            ("Review", later.and_hms_opt(14, 30, 0).unwrap()),
        ] {
            dispatcher
                .dispatch(&create, &slots(&[("title", title.into()), ("datetime", at.into())]), &session())
                .await?;
        }

        let list = Intent::new(Intent::LIST_EVENTS);
        let result = dispatcher
            .dispatch(&list, &slots(&[("date", "2026-10-20".into())]), &session())
            .await?;
        assert_eq!(
            result.message,
            "You have 1 event on Tuesday October 20: Standup at 10:00 AM."
        );

        let result = dispatcher.dispatch(&list, &Slots::new(), &session()).await?;
        assert!(result.message.starts_with("You have 2 events"));

        let result = dispatcher
            .dispatch(&list, &slots(&[("date", "2026-10-21".into())]), &session())
            .await?;
        assert_eq!(result.message, "Your calendar is clear on Wednesday October 21.");
        Ok(())
    }

    #[tokio::test]
    async fn email_and_reminder_follow_ups() -> Result<()> {
        let dispatcher = dispatcher();
        let result = dispatcher
            .dispatch(
                &Intent::new(Intent::SEND_EMAIL),
                &slots(&[
                    ("recipients", vec!["Bob".to_owned()].into()),
                    ("subject", "Budget".into()),
                ]),
                &session(),
            )
            .await?;
        assert_eq!(result.message, "Drafted an email to Bob about \"Budget\".");
        assert_eq!(result.follow_up.as_deref(), Some("What should the email say?"));

        let result = dispatcher
            .dispatch(
                &Intent::new(Intent::CREATE_REMINDER),
                &slots(&[("title", "Call mom".into())]),
                &session(),
            )
            .await?;
        assert_eq!(result.message, "Reminder set: Call mom.");
        assert_eq!(result.follow_up.as_deref(), Some("When should I remind you?"));
        Ok(())
    }

    #[test]
    fn registry_lists_routed_intents() {
        let registry = ServiceRegistry::with_in_memory_services(Arc::new(FixedClock(now())));
        let intents: Vec<&str> = registry.intents().into_iter().map(Intent::as_str).collect();
        assert_eq!(
            intents,
            ["create_event", "create_note", "create_reminder", "list_events", "send_email"]
        );
    }
}

//! Bookable slots for a date.
//!
//! Working shifts are expanded into hourly slots, then every slot is checked
//! against busy markers from two independent sources: appointments stored
//! locally and events on the external calendar. Either source marking an hour
//! busy makes the slot unavailable.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::models::{Appointment, WorkShift};
use crate::db::{AppointmentRepository, WorkShiftRepository};
use crate::error::{AppError, AppResult};
use crate::services::google_calendar::{CalendarApi, EventTime, ExternalEvent};
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    /// Provider-local start, "HH:MM".
    pub time: String,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BusyMarker {
    /// Provider-local hour of the day (0..=23).
    Hour(u32),
    WholeDay,
}

/// Busy markers for one date, kept per source.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BusyMarkers {
    pub local: HashSet<BusyMarker>,
    pub external: HashSet<BusyMarker>,
}

impl BusyMarkers {
    pub fn is_busy(&self, hour: u32) -> bool {
        let marker = BusyMarker::Hour(hour);
        self.external.contains(&BusyMarker::WholeDay)
            || self.local.contains(&BusyMarker::WholeDay)
            || self.external.contains(&marker)
            || self.local.contains(&marker)
    }
}

/// Weekday of `date` at the provider (0 = Sunday), taken at local noon.
pub fn local_weekday(date: NaiveDate, offset: FixedOffset) -> i64 {
    let noon = date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN));
    let weekday = offset
        .from_local_datetime(&noon)
        .single()
        .map(|dt| dt.weekday())
        .unwrap_or_else(|| date.weekday());
    i64::from(weekday.num_days_from_sunday())
}

/// UTC bounds `[start, end)` of the provider-local day.
///
/// Dates at the edge of the representable range have no bounds and are
/// rejected as bad input.
pub fn local_day_bounds(
    date: NaiveDate,
    offset: FixedOffset,
) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = date.and_time(NaiveTime::MIN);
    // A fixed offset always maps a local time to exactly one instant.
    let utc_offset = Duration::seconds(i64::from(offset.local_minus_utc()));
    let start = midnight.checked_sub_signed(utc_offset);
    let end = start.and_then(|s| s.checked_add_signed(Duration::days(1)));
    match (start, end) {
        (Some(start), Some(end)) => Ok((start.and_utc(), end.and_utc())),
        _ => Err(AppError::BadRequest(format!("Date out of range: {}", date))),
    }
}

/// Hours of `date` that the wall-clock interval `[start, end)` touches.
///
/// With no usable end (missing, or not after start) only the start hour counts.
pub fn hours_covered(
    date: NaiveDate,
    start: NaiveDateTime,
    end: Option<NaiveDateTime>,
) -> Vec<u32> {
    let end = match end.filter(|e| *e > start) {
        Some(e) => e,
        None if start.date() == date => return vec![start.hour()],
        None => return Vec::new(),
    };

    (0..24u32)
        .filter(|h| {
            let Some(slot_start) = date.and_hms_opt(*h, 0, 0) else {
                return false;
            };
            // The last hour of the last representable day has no successor.
            let ends_after_start = slot_start
                .checked_add_signed(Duration::hours(1))
                .map_or(true, |slot_end| slot_end > start);
            slot_start < end && ends_after_start
        })
        .collect()
}

/// Expands shifts into hourly slots.
pub struct SlotGenerator;

impl SlotGenerator {
    /// Start hours from each shift's start hour up to its end hour minus one.
    /// Overlapping shifts yield each hour once.
    pub fn hours(shifts: &[WorkShift]) -> BTreeSet<u32> {
        shifts
            .iter()
            .flat_map(|s| s.start_time.hour()..s.end_time.hour())
            .collect()
    }

    pub fn slots(shifts: &[WorkShift], busy: &BusyMarkers) -> Vec<Slot> {
        Self::hours(shifts)
            .into_iter()
            .map(|hour| Slot {
                time: format!("{:02}:00", hour),
                available: !busy.is_busy(hour),
            })
            .collect()
    }
}

fn appointment_markers(
    date: NaiveDate,
    offset: FixedOffset,
    appointments: &[Appointment],
) -> HashSet<BusyMarker> {
    appointments
        .iter()
        .flat_map(|a| {
            let start = a.start_time.with_timezone(&offset).naive_local();
            let end = a.end_time.with_timezone(&offset).naive_local();
            hours_covered(date, start, Some(end))
        })
        .map(BusyMarker::Hour)
        .collect()
}

fn event_markers(date: NaiveDate, events: &[ExternalEvent]) -> HashSet<BusyMarker> {
    let mut markers = HashSet::new();
    for event in events {
        match (&event.start, &event.end) {
            (EventTime::AllDay(start), end) => {
                let covers = match end {
                    Some(EventTime::AllDay(end)) if end > start => *start <= date && date < *end,
                    _ => *start == date,
                };
                if covers {
                    markers.insert(BusyMarker::WholeDay);
                }
            }
            (EventTime::Timed(start), end) => {
                // The calendar already reports local wall-clock time in the offset.
                let end = match end {
                    Some(EventTime::Timed(e)) => Some(e.naive_local()),
                    _ => None,
                };
                markers.extend(
                    hours_covered(date, start.naive_local(), end)
                        .into_iter()
                        .map(BusyMarker::Hour),
                );
            }
        }
    }
    markers
}

/// Collects busy markers for a date from local storage and the external calendar.
pub struct BusyTimeAggregator {
    pool: SqlitePool,
    calendar: Arc<dyn CalendarApi>,
    calendar_id: Option<String>,
    offset: FixedOffset,
}

impl BusyTimeAggregator {
    pub fn new(state: &Arc<AppState>) -> AppResult<Self> {
        Ok(Self {
            pool: state.db.clone(),
            calendar: state.calendar.clone(),
            calendar_id: state.config.google.calendar_id.clone(),
            offset: provider_offset(state)?,
        })
    }

    pub async fn local_markers(&self, date: NaiveDate) -> AppResult<HashSet<BusyMarker>> {
        let (from, to) = local_day_bounds(date, self.offset)?;
        let appointments = AppointmentRepository::list_active_between(&self.pool, from, to).await?;
        Ok(appointment_markers(date, self.offset, &appointments))
    }

    pub async fn external_markers(&self, date: NaiveDate) -> AppResult<HashSet<BusyMarker>> {
        let calendar_id = self.calendar_id.as_deref().ok_or_else(|| {
            AppError::Configuration("GOOGLE_CALENDAR_ID is not set".to_string())
        })?;
        let (from, to) = local_day_bounds(date, self.offset)?;
        tracing::debug!("Querying calendar {} for [{}, {})", calendar_id, from, to);
        let events = self.calendar.list_events(calendar_id, from, to).await?;
        Ok(event_markers(date, &events))
    }

    /// Both sources, queried concurrently. Any failure fails the whole lookup.
    pub async fn collect(&self, date: NaiveDate) -> AppResult<BusyMarkers> {
        let (local, external) =
            futures::try_join!(self.local_markers(date), self.external_markers(date))?;
        Ok(BusyMarkers { local, external })
    }
}

pub(crate) fn provider_offset(state: &AppState) -> AppResult<FixedOffset> {
    state.config.provider.offset().ok_or_else(|| {
        AppError::Configuration(format!(
            "invalid provider UTC offset: {} minutes",
            state.config.provider.utc_offset_minutes
        ))
    })
}

pub struct AvailabilityResolver {
    pool: SqlitePool,
    aggregator: BusyTimeAggregator,
    offset: FixedOffset,
}

impl AvailabilityResolver {
    pub fn new(state: &Arc<AppState>) -> AppResult<Self> {
        Ok(Self {
            pool: state.db.clone(),
            aggregator: BusyTimeAggregator::new(state)?,
            offset: provider_offset(state)?,
        })
    }

    /// Slots for `date`, ascending by time. A day without shifts is closed:
    /// the result is empty and no busy source is queried.
    pub async fn resolve(&self, date: NaiveDate) -> AppResult<Vec<Slot>> {
        local_day_bounds(date, self.offset)?;
        let weekday = local_weekday(date, self.offset);
        let shifts = WorkShiftRepository::list_for_day(&self.pool, weekday).await?;
        if shifts.is_empty() {
            tracing::debug!("No shifts on {} (weekday {}), day is closed", date, weekday);
            return Ok(Vec::new());
        }

        let busy = self.aggregator.collect(date).await?;
        let slots = SlotGenerator::slots(&shifts, &busy);

        tracing::debug!(
            "Resolved {} slots for {} ({} local busy, {} external busy markers)",
            slots.len(),
            date,
            busy.local.len(),
            busy.external.len()
        );

        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{AppointmentStatus, CreateWorkShift};
    use crate::db::repository::appointment::tests::seed_appointment;
    use crate::db::test_pool;
    use crate::test_support::{test_state, FakeCalendar, FakeNotifier, Failure};
    use std::sync::atomic::Ordering;

    fn bogota() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // 2026-03-02 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn shift(start: NaiveTime, end: NaiveTime) -> WorkShift {
        WorkShift {
            id: "s".into(),
            day_of_week: 1,
            start_time: start,
            end_time: end,
            created_at: Utc::now().naive_utc(),
        }
    }

    fn timed(id: &str, start: &str, end: &str) -> ExternalEvent {
        ExternalEvent {
            id: id.into(),
            summary: None,
            start: EventTime::Timed(DateTime::parse_from_rfc3339(start).unwrap()),
            end: Some(EventTime::Timed(DateTime::parse_from_rfc3339(end).unwrap())),
        }
    }

    fn all_day(id: &str, start: NaiveDate, end: Option<NaiveDate>) -> ExternalEvent {
        ExternalEvent {
            id: id.into(),
            summary: None,
            start: EventTime::AllDay(start),
            end: end.map(EventTime::AllDay),
        }
    }

    async fn add_shift(pool: &SqlitePool, day: i64, start: NaiveTime, end: NaiveTime) {
        WorkShiftRepository::create(
            pool,
            CreateWorkShift {
                day_of_week: day,
                start_time: start,
                end_time: end,
            },
        )
        .await
        .unwrap();
    }

    fn times(slots: &[Slot]) -> Vec<(&str, bool)> {
        slots.iter().map(|s| (s.time.as_str(), s.available)).collect()
    }

    #[test]
    fn weekday_is_taken_in_provider_time() {
        assert_eq!(local_weekday(monday(), bogota()), 1);
        let far_east = FixedOffset::east_opt(14 * 3600).unwrap();
        assert_eq!(local_weekday(monday(), far_east), 1);
    }

    #[test]
    fn day_bounds_follow_the_offset() {
        let (from, to) = local_day_bounds(monday(), bogota()).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2026, 3, 3, 5, 0, 0).unwrap());
    }

    #[test]
    fn dates_at_the_calendar_edges_have_no_bounds() {
        let far_east = FixedOffset::east_opt(14 * 3600).unwrap();
        assert!(matches!(
            local_day_bounds(NaiveDate::MAX, bogota()),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            local_day_bounds(NaiveDate::MIN, far_east),
            Err(AppError::BadRequest(_))
        ));

        let last = NaiveDate::MAX;
        assert_eq!(hours_covered(last, last.and_time(hm(23, 0)), None), vec![23]);
        assert_eq!(
            hours_covered(last, last.and_time(hm(22, 30)), Some(last.and_time(hm(23, 30)))),
            vec![22, 23]
        );
    }

    #[test]
    fn slot_hours_exclude_the_end_hour() {
        let hours = SlotGenerator::hours(&[shift(hm(8, 0), hm(12, 0))]);
        assert_eq!(hours.into_iter().collect::<Vec<_>>(), vec![8, 9, 10, 11]);
    }

    #[test]
    fn overlapping_shifts_do_not_duplicate_slots() {
        let slots = SlotGenerator::slots(
            &[shift(hm(14, 0), hm(17, 0)), shift(hm(8, 0), hm(10, 0)), shift(hm(9, 0), hm(11, 0))],
            &BusyMarkers::default(),
        );
        let times: Vec<_> = slots.iter().map(|s| s.time.as_str()).collect();
        assert_eq!(times, vec!["08:00", "09:00", "10:00", "14:00", "15:00", "16:00"]);
    }

    #[test]
    fn sub_hour_shift_yields_no_slot() {
        assert!(SlotGenerator::hours(&[shift(hm(8, 0), hm(8, 45))]).is_empty());
    }

    #[test]
    fn hours_covered_handles_long_and_degenerate_intervals() {
        let d = monday();
        let at = |h, m| d.and_time(hm(h, m));

        assert_eq!(hours_covered(d, at(9, 0), Some(at(10, 0))), vec![9]);
        assert_eq!(hours_covered(d, at(9, 30), Some(at(11, 15))), vec![9, 10, 11]);
        assert_eq!(hours_covered(d, at(9, 0), Some(at(9, 0))), vec![9]);
        assert_eq!(hours_covered(d, at(9, 0), None), vec![9]);

        let previous_evening = (d - Duration::days(1)).and_time(hm(23, 0));
        assert_eq!(hours_covered(d, previous_evening, Some(at(1, 0))), vec![0]);
        assert!(hours_covered(d, previous_evening, None).is_empty());
    }

    #[test]
    fn external_hours_are_read_from_the_event_offset() {
        let events = vec![timed("a", "2026-03-02T10:00:00-05:00", "2026-03-02T11:00:00-05:00")];
        let markers = event_markers(monday(), &events);
        assert_eq!(markers, HashSet::from([BusyMarker::Hour(10)]));
    }

    #[test]
    fn all_day_events_cover_their_date_range() {
        let d = monday();
        let single = all_day("a", d, Some(d + Duration::days(1)));
        let multi = all_day("b", d - Duration::days(2), Some(d + Duration::days(1)));
        let ended = all_day("c", d - Duration::days(2), Some(d));
        let open = all_day("d", d, None);

        for event in [single, multi, open] {
            assert!(event_markers(d, &[event]).contains(&BusyMarker::WholeDay));
        }
        assert!(event_markers(d, &[ended]).is_empty());
    }

    #[test]
    fn union_semantics() {
        let only_local = BusyMarkers {
            local: HashSet::from([BusyMarker::Hour(9)]),
            external: HashSet::new(),
        };
        let only_external = BusyMarkers {
            local: HashSet::new(),
            external: HashSet::from([BusyMarker::Hour(9)]),
        };
        for busy in [only_local, only_external] {
            assert!(busy.is_busy(9));
            assert!(!busy.is_busy(10));
        }
    }

    #[tokio::test]
    async fn closed_day_is_empty_and_queries_nothing() {
        let pool = test_pool().await;
        let calendar = Arc::new(FakeCalendar::default());
        let state = test_state(pool, calendar.clone(), Arc::new(FakeNotifier::default()));

        let slots = AvailabilityResolver::new(&state)
            .unwrap()
            .resolve(monday())
            .await
            .unwrap();
        assert!(slots.is_empty());
        assert_eq!(calendar.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stored_appointment_blocks_its_local_hour() {
        let pool = test_pool().await;
        add_shift(&pool, 1, hm(8, 0), hm(12, 0)).await;
        // 14:00Z is 09:00 in UTC-05:00.
        seed_appointment(&pool, Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()).await;

        let state = test_state(
            pool,
            Arc::new(FakeCalendar::default()),
            Arc::new(FakeNotifier::default()),
        );
        let slots = AvailabilityResolver::new(&state)
            .unwrap()
            .resolve(monday())
            .await
            .unwrap();

        assert_eq!(
            times(&slots),
            vec![("08:00", true), ("09:00", false), ("10:00", true), ("11:00", true)]
        );
    }

    #[tokio::test]
    async fn rejected_appointments_free_their_slot() {
        let pool = test_pool().await;
        add_shift(&pool, 1, hm(8, 0), hm(10, 0)).await;
        let appt =
            seed_appointment(&pool, Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap()).await;
        AppointmentRepository::transition_from_pending(&pool, &appt.id, AppointmentStatus::Rejected)
            .await
            .unwrap();

        let state = test_state(
            pool,
            Arc::new(FakeCalendar::default()),
            Arc::new(FakeNotifier::default()),
        );
        let slots = AvailabilityResolver::new(&state)
            .unwrap()
            .resolve(monday())
            .await
            .unwrap();
        assert!(slots.iter().all(|s| s.available));
    }

    #[tokio::test]
    async fn external_all_day_event_blocks_every_slot() {
        let pool = test_pool().await;
        add_shift(&pool, 1, hm(8, 0), hm(12, 0)).await;
        add_shift(&pool, 1, hm(14, 0), hm(16, 0)).await;

        let calendar = Arc::new(FakeCalendar::with_events(vec![all_day(
            "holiday",
            monday(),
            Some(monday() + Duration::days(1)),
        )]));
        let state = test_state(pool, calendar, Arc::new(FakeNotifier::default()));

        let slots = AvailabilityResolver::new(&state)
            .unwrap()
            .resolve(monday())
            .await
            .unwrap();
        assert_eq!(slots.len(), 6);
        assert!(slots.iter().all(|s| !s.available));
    }

    #[tokio::test]
    async fn both_sources_are_merged() {
        let pool = test_pool().await;
        add_shift(&pool, 1, hm(8, 0), hm(12, 0)).await;
        seed_appointment(&pool, Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap()).await;

        let calendar = Arc::new(FakeCalendar::with_events(vec![timed(
            "a",
            "2026-03-02T10:30:00-05:00",
            "2026-03-02T11:00:00-05:00",
        )]));
        let state = test_state(pool, calendar, Arc::new(FakeNotifier::default()));

        let slots = AvailabilityResolver::new(&state)
            .unwrap()
            .resolve(monday())
            .await
            .unwrap();
        assert_eq!(
            times(&slots),
            vec![("08:00", false), ("09:00", true), ("10:00", false), ("11:00", true)]
        );
    }

    #[tokio::test]
    async fn external_failure_is_an_error_not_an_open_day() {
        for failure in [Failure::Auth, Failure::Upstream] {
            let pool = test_pool().await;
            add_shift(&pool, 1, hm(8, 0), hm(12, 0)).await;
            let calendar = Arc::new(FakeCalendar::default());
            calendar.fail_list(failure);
            let state = test_state(pool, calendar, Arc::new(FakeNotifier::default()));

            let result = AvailabilityResolver::new(&state)
                .unwrap()
                .resolve(monday())
                .await;
            match failure {
                Failure::Auth => assert!(matches!(result, Err(AppError::AuthExchange(_)))),
                Failure::Upstream => assert!(matches!(result, Err(AppError::UpstreamQuery(_)))),
            }
        }
    }

    #[tokio::test]
    async fn last_representable_date_is_rejected_before_any_lookup() {
        let pool = test_pool().await;
        for day in 0..7 {
            add_shift(&pool, day, hm(8, 0), hm(12, 0)).await;
        }
        let calendar = Arc::new(FakeCalendar::default());
        let state = test_state(pool, calendar.clone(), Arc::new(FakeNotifier::default()));

        let result = AvailabilityResolver::new(&state)
            .unwrap()
            .resolve(NaiveDate::MAX)
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(calendar.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn calendar_is_queried_for_the_provider_local_day() {
        let pool = test_pool().await;
        add_shift(&pool, 1, hm(8, 0), hm(12, 0)).await;
        let calendar = Arc::new(FakeCalendar::default());
        let state = test_state(pool, calendar.clone(), Arc::new(FakeNotifier::default()));

        AvailabilityResolver::new(&state)
            .unwrap()
            .resolve(monday())
            .await
            .unwrap();

        let window = *calendar.last_window.lock().unwrap();
        assert_eq!(
            window,
            Some((
                Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 3, 3, 5, 0, 0).unwrap(),
            ))
        );
    }

    #[tokio::test]
    async fn missing_calendar_id_is_a_configuration_error() {
        let pool = test_pool().await;
        add_shift(&pool, 1, hm(8, 0), hm(12, 0)).await;
        let state = test_state(
            pool,
            Arc::new(FakeCalendar::default()),
            Arc::new(FakeNotifier::default()),
        );
        let mut config = state.config.clone();
        config.google.calendar_id = None;
        let state = Arc::new(AppState {
            db: state.db.clone(),
            config,
            calendar: state.calendar.clone(),
            notifier: state.notifier.clone(),
        });

        let result = AvailabilityResolver::new(&state)
            .unwrap()
            .resolve(monday())
            .await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}

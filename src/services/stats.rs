//! Practice statistics over confirmed appointments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, FixedOffset};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::models::ConfirmedVisit;
use crate::db::AppointmentRepository;
use crate::error::AppResult;
use crate::i18n;
use crate::services::availability::provider_offset;
use crate::AppState;

const TOP_SERVICES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PracticeStats {
    pub confirmed_appointments: usize,
    /// Sum of the current prices of the booked services.
    pub revenue: i64,
    pub unique_patients: usize,
    pub top_services: Vec<ServiceCount>,
    /// Confirmed appointments per provider-local weekday, 0 = Sunday.
    pub appointments_by_weekday: [usize; 7],
}

/// Aggregate confirmed visits. Visits whose service was deleted are counted
/// under `unnamed_service` and add nothing to revenue.
pub fn summarize(
    visits: &[ConfirmedVisit],
    offset: FixedOffset,
    unnamed_service: &str,
) -> PracticeStats {
    let mut per_service: HashMap<&str, usize> = HashMap::new();
    let mut patients = HashSet::new();
    let mut by_weekday = [0usize; 7];
    let mut revenue = 0i64;

    for visit in visits {
        revenue = revenue.saturating_add(visit.service_price.unwrap_or(0));
        if let Some(patient) = visit.patient_id.as_deref() {
            patients.insert(patient);
        }
        let name = visit.service_name.as_deref().unwrap_or(unnamed_service);
        *per_service.entry(name).or_default() += 1;

        let weekday = visit.start_time.with_timezone(&offset).weekday();
        by_weekday[weekday.num_days_from_sunday() as usize] += 1;
    }

    let mut top_services: Vec<ServiceCount> = per_service
        .into_iter()
        .map(|(name, count)| ServiceCount {
            name: name.to_string(),
            count,
        })
        .collect();
    top_services.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    top_services.truncate(TOP_SERVICES);

    PracticeStats {
        confirmed_appointments: visits.len(),
        revenue,
        unique_patients: patients.len(),
        top_services,
        appointments_by_weekday: by_weekday,
    }
}

pub struct StatsService {
    pool: SqlitePool,
    offset: FixedOffset,
    language: String,
}

impl StatsService {
    pub fn new(state: &Arc<AppState>) -> AppResult<Self> {
        Ok(Self {
            pool: state.db.clone(),
            offset: provider_offset(state)?,
            language: state.config.email.language.clone(),
        })
    }

    pub async fn practice_stats(&self) -> AppResult<PracticeStats> {
        let visits = AppointmentRepository::list_confirmed_visits(&self.pool).await?;
        let unnamed = i18n::tr(Some(&self.language), "stats.other_service", None);
        let stats = summarize(&visits, self.offset, &unnamed);

        tracing::debug!(
            "Computed stats over {} confirmed appointments ({} patients)",
            stats.confirmed_appointments,
            stats.unique_patients
        );
        Ok(stats)
    }
}

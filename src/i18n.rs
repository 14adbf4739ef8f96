/*
Small i18n helper for patient-facing text.

This module provides:
- An embedded translations store for ES/EN (compile-time embedded JSON).
- A `tr` function to lookup translations by key + optional params.
- A `t` convenience wrapper using the default language (DEFAULT_LANG).
- Long date and 12-hour time formatting used in confirmation emails.

Usage:
    use crate::i18n;
    let subject = i18n::tr(Some("es"), "email.confirmation.subject", Some(&[("provider", "RootWave")]));
    let date = i18n::format_long_date(Some("es"), date);

Notes:
- Placeholders in translation strings use single-brace format: `{name}`.
- Default language is `es`. If a key is missing for the requested language,
  the fallback language will be used.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

pub const DEFAULT_LANG: &str = "es";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const ES_JSON: &str = r#"
{
  "email.confirmation.subject": "✅ Cita Confirmada - {provider}",
  "email.confirmation.heading": "¡Cita Confirmada!",
  "email.confirmation.greeting": "Hola <strong>{name}</strong>,",
  "email.confirmation.intro": "Tu cita ha sido agendada exitosamente en nuestro sistema.",
  "email.confirmation.date_label": "📅 Fecha:",
  "email.confirmation.time_label": "⏰ Hora:",
  "email.confirmation.service_label": "🧠 Servicio:",
  "email.confirmation.closing": "Te esperamos en el consultorio. Si necesitas cancelar o reagendar, por favor contáctanos con anticipación.",
  "email.confirmation.footer": "Enviado automáticamente por {provider}",
  "calendar.event.description": "Paciente: {name}\nTeléfono: {phone}\nEmail: {email}\n\nAgendado desde {provider}.",
  "calendar.event.default_service": "Consulta",
  "stats.other_service": "Otro",
  "booking.slot_unavailable": "El horario {time} del {date} no está disponible",
  "booking.service_inactive": "El servicio seleccionado no está disponible",
  "booking.already_taken": "Ya existe una cita activa para ese horario",
  "booking.not_pending": "La cita ya fue procesada (estado actual: {status})",
  "sync.missing_start": "Datos de cita incompletos (falta la hora de inicio)",
  "sync.missing_patient": "Datos de cita incompletos (falta el paciente)",
  "sync.not_confirmed": "Solo se pueden sincronizar citas confirmadas (estado actual: {status})",
  "date.long": "{weekday}, {day} de {month} de {year}",
  "time.am": "a. m.",
  "time.pm": "p. m.",
  "weekday.0": "domingo",
  "weekday.1": "lunes",
  "weekday.2": "martes",
  "weekday.3": "miércoles",
  "weekday.4": "jueves",
  "weekday.5": "viernes",
  "weekday.6": "sábado",
  "month.1": "enero",
  "month.2": "febrero",
  "month.3": "marzo",
  "month.4": "abril",
  "month.5": "mayo",
  "month.6": "junio",
  "month.7": "julio",
  "month.8": "agosto",
  "month.9": "septiembre",
  "month.10": "octubre",
  "month.11": "noviembre",
  "month.12": "diciembre"
}
"#;

const EN_JSON: &str = r#"
{
  "email.confirmation.subject": "✅ Appointment Confirmed - {provider}",
  "email.confirmation.heading": "Appointment Confirmed!",
  "email.confirmation.greeting": "Hello <strong>{name}</strong>,",
  "email.confirmation.intro": "Your appointment has been successfully booked.",
  "email.confirmation.date_label": "📅 Date:",
  "email.confirmation.time_label": "⏰ Time:",
  "email.confirmation.service_label": "🧠 Service:",
  "email.confirmation.closing": "We look forward to seeing you. If you need to cancel or reschedule, please contact us in advance.",
  "email.confirmation.footer": "Sent automatically by {provider}",
  "calendar.event.description": "Patient: {name}\nPhone: {phone}\nEmail: {email}\n\nBooked via {provider}.",
  "calendar.event.default_service": "Consultation",
  "stats.other_service": "Other",
  "booking.slot_unavailable": "The {time} slot on {date} is not available",
  "booking.service_inactive": "The selected service is not available",
  "booking.already_taken": "An active appointment already exists at that time",
  "booking.not_pending": "The appointment was already processed (current status: {status})",
  "sync.missing_start": "Incomplete appointment data (missing start time)",
  "sync.missing_patient": "Incomplete appointment data (missing patient)",
  "sync.not_confirmed": "Only confirmed appointments can be synchronized (current status: {status})",
  "date.long": "{weekday}, {month} {day}, {year}",
  "time.am": "AM",
  "time.pm": "PM",
  "weekday.0": "Sunday",
  "weekday.1": "Monday",
  "weekday.2": "Tuesday",
  "weekday.3": "Wednesday",
  "weekday.4": "Thursday",
  "weekday.5": "Friday",
  "weekday.6": "Saturday",
  "month.1": "January",
  "month.2": "February",
  "month.3": "March",
  "month.4": "April",
  "month.5": "May",
  "month.6": "June",
  "month.7": "July",
  "month.8": "August",
  "month.9": "September",
  "month.10": "October",
  "month.11": "November",
  "month.12": "December"
}
"#;

fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    let es_map: HashMap<String, String> = serde_json::from_str(ES_JSON).unwrap_or_else(|e| {
        panic!("failed to parse ES_JSON in i18n module: {}", e);
    });
    out.insert("es".to_string(), es_map);

    let en_map: HashMap<String, String> = serde_json::from_str(EN_JSON).unwrap_or_else(|e| {
        panic!("failed to parse EN_JSON in i18n module: {}", e);
    });
    out.insert("en".to_string(), en_map);

    out
}

/// Returns the global translations map (lang -> (key -> message)).
fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "es-CO" -> "es").
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

/// Returns true if the given language code has translations (e.g. "es", "en").
pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Translate a key using an explicit language (or default if None).
///
/// Missing keys fall back to the default language and then to the key itself.
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang.map(normalize_language);
    let desired = desired.as_deref().unwrap_or(DEFAULT_LANG);

    let val = map
        .get(desired)
        .and_then(|m| m.get(key))
        .cloned()
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        .unwrap_or_else(|| key.to_string());

    if let Some(params) = params {
        let mut s = val;
        for (k, v) in params {
            s = s.replace(&format!("{{{}}}", k), v);
        }
        s
    } else {
        val
    }
}

/// Convenience wrapper: translate using default language (DEFAULT_LANG).
pub fn t(key: &str) -> String {
    tr(None, key, None)
}

/// Long human date, e.g. "lunes, 5 de enero de 2026".
pub fn format_long_date(lang: Option<&str>, date: NaiveDate) -> String {
    let weekday = tr(
        lang,
        &format!("weekday.{}", date.weekday().num_days_from_sunday()),
        None,
    );
    let month = tr(lang, &format!("month.{}", date.month()), None);
    let day = date.day().to_string();
    let year = date.year().to_string();

    tr(
        lang,
        "date.long",
        Some(&[
            ("weekday", weekday.as_str()),
            ("day", day.as_str()),
            ("month", month.as_str()),
            ("year", year.as_str()),
        ]),
    )
}

/// 12-hour clock time with a localized meridiem, e.g. "02:30 p. m.".
pub fn format_time_12h(lang: Option<&str>, time: NaiveTime) -> String {
    let (is_pm, hour) = time.hour12();
    let suffix = if is_pm {
        tr(lang, "time.pm", None)
    } else {
        tr(lang, "time.am", None)
    };
    format!("{:02}:{:02} {}", hour, time.minute(), suffix)
}

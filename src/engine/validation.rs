use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::calendar::Calendar;
use crate::limits::*;
use crate::model::{Ms, Span};

static CONTACT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://vk\.com/\w+/?$").expect("contact link pattern compiles"));

/// Contact details a visitor types into the request form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applicant {
    pub full_name: String,
    pub phone: String,
    pub contact_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every problem found in one submission, reported per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn field(&self, name: &str) -> Option<&FieldError> {
        self.0.iter().find(|e| e.field == name)
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Check a request form before anything is written. Returns the span to book.
pub(crate) fn validate_submission(
    applicant: &Applicant,
    start: Ms,
    end: Ms,
    message: &str,
    calendar: &Calendar,
) -> Result<Span, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let full_name = applicant.full_name.trim();
    if full_name.is_empty() {
        errors.push("full_name", "required");
    } else if full_name.len() > MAX_NAME_LEN {
        errors.push("full_name", "too long");
    }

    check_phone(&applicant.phone, &mut errors);

    let link = applicant.contact_link.trim();
    if link.is_empty() {
        errors.push("contact_link", "required");
    } else if link.len() > MAX_LINK_LEN {
        errors.push("contact_link", "too long");
    } else if !CONTACT_LINK.is_match(link) {
        errors.push("contact_link", "expected https://vk.com/{user_name}");
    }

    let message_len = message.trim().chars().count();
    if message_len < MIN_MESSAGE_LEN {
        errors.push("message", format!("too short, at least {MIN_MESSAGE_LEN} characters"));
    } else if message.len() > MAX_MESSAGE_LEN {
        errors.push("message", "too long");
    }

    let span = Span::try_new(start, end);
    match span {
        None => errors.push("end", "must be after start"),
        Some(_) if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS => {
            errors.push("start", "timestamp out of range")
        }
        Some(_) if !calendar.same_day(start, end - 1) => {
            errors.push("end", "must be on the same day as start")
        }
        Some(_) => {}
    }

    match span {
        Some(span) if errors.is_empty() => Ok(span),
        _ => Err(errors),
    }
}

fn check_phone(phone: &str, errors: &mut ValidationErrors) {
    let phone = phone.trim();
    if phone.is_empty() {
        errors.push("phone", "required");
        return;
    }
    if !phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '+' | '(' | ')' | '-'))
    {
        errors.push("phone", "only digits, spaces and + ( ) - are allowed");
        return;
    }
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    if !(10..=15).contains(&digits) {
        errors.push("phone", "expected 10 to 15 digits");
    }
}

/// Check the descriptive fields of a new place.
pub(crate) fn validate_place(
    name: &str,
    map_link: &str,
    frame_link: Option<&str>,
    description: Option<&str>,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if name.trim().is_empty() {
        errors.push("name", "required");
    } else if name.len() > MAX_NAME_LEN {
        errors.push("name", "too long");
    }
    if map_link.trim().is_empty() {
        errors.push("map_link", "required");
    } else if map_link.len() > MAX_LINK_LEN {
        errors.push("map_link", "too long");
    }
    if frame_link.is_some_and(|l| l.len() > MAX_LINK_LEN) {
        errors.push("frame_link", "too long");
    }
    if description.is_some_and(|d| d.len() > MAX_MESSAGE_LEN) {
        errors.push("description", "too long");
    }
    errors.into_result()
}

pub(crate) fn validate_photo_url(url: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let url = url.trim();
    if url.is_empty() {
        errors.push("url", "required");
    } else if url.len() > MAX_LINK_LEN {
        errors.push("url", "too long");
    } else if !(url.starts_with("https://") || url.starts_with("http://") || url.starts_with('/')) {
        errors.push("url", "expected an http(s) URL or an absolute path");
    }
    errors.into_result()
}

pub(crate) fn validate_admin_name(name: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if name.trim().is_empty() {
        errors.push("name", "required");
    } else if name.len() > MAX_NAME_LEN {
        errors.push("name", "too long");
    }
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HOUR_MS;

    // 2024-05-01T00:00:00Z
    const DAY0: Ms = 1_714_521_600_000;

    fn applicant() -> Applicant {
        Applicant {
            full_name: "Ivan Petrov".into(),
            phone: "+7 (999) 123 45-67".into(),
            contact_link: "https://vk.com/ivan_petrov".into(),
        }
    }

    const MESSAGE: &str = "Rehearsal for the spring concert";

    #[test]
    fn accepts_a_good_submission() {
        let span = validate_submission(
            &applicant(),
            DAY0 + 10 * HOUR_MS,
            DAY0 + 12 * HOUR_MS,
            MESSAGE,
            &Calendar::utc(),
        )
        .unwrap();
        assert_eq!(span, Span::new(DAY0 + 10 * HOUR_MS, DAY0 + 12 * HOUR_MS));
    }

    #[test]
    fn reports_every_bad_field() {
        let bad = Applicant {
            full_name: "  ".into(),
            phone: "call me".into(),
            contact_link: "https://facebook.com/ivan".into(),
        };
        let errors = validate_submission(
            &bad,
            DAY0 + 12 * HOUR_MS,
            DAY0 + 10 * HOUR_MS,
            "too short",
            &Calendar::utc(),
        )
        .unwrap_err();
        for field in ["full_name", "phone", "contact_link", "message", "end"] {
            assert!(errors.field(field).is_some(), "missing error for {field}: {errors}");
        }
    }

    #[test]
    fn rejects_span_across_midnight() {
        let errors = validate_submission(
            &applicant(),
            DAY0 + 20 * HOUR_MS,
            DAY0 + 26 * HOUR_MS,
            MESSAGE,
            &Calendar::utc(),
        )
        .unwrap_err();
        assert!(errors.field("end").unwrap().message.contains("same day"));
    }

    #[test]
    fn contact_link_is_required() {
        let mut a = applicant();
        a.contact_link = "   ".into();
        let errors =
            validate_submission(&a, DAY0 + 10 * HOUR_MS, DAY0 + 11 * HOUR_MS, MESSAGE, &Calendar::utc())
                .unwrap_err();
        assert_eq!(errors.field("contact_link").unwrap().message, "required");
    }

    #[test]
    fn photo_urls() {
        assert!(validate_photo_url("https://cdn.example/hall.jpg").is_ok());
        assert!(validate_photo_url("/static/hall.jpg").is_ok());
        assert!(validate_photo_url("").is_err());
        assert!(validate_photo_url("javascript:alert(1)").is_err());
    }

    #[test]
    fn phone_digit_count_enforced() {
        let mut a = applicant();
        a.phone = "+7 999".into();
        let errors =
            validate_submission(&a, DAY0 + 10 * HOUR_MS, DAY0 + 11 * HOUR_MS, MESSAGE, &Calendar::utc())
                .unwrap_err();
        assert_eq!(errors.iter().count(), 1);
        assert_eq!(errors.field("phone").unwrap().message, "expected 10 to 15 digits");
    }

    #[test]
    fn place_requires_name_and_map_link() {
        let errors = validate_place("", "", None, None).unwrap_err();
        assert!(errors.field("name").is_some());
        assert!(errors.field("map_link").is_some());
        assert!(validate_place("Hall", "https://maps.example/hall", None, Some("Big")).is_ok());
    }

    #[test]
    fn display_joins_fields() {
        let errors = validate_place("", "x", None, None).unwrap_err();
        assert_eq!(errors.to_string(), "name: required");
    }
}

//! Record validation
//!
//! [`validate_record`] turns one raw field mapping into a normalized
//! [`Record`]. Every field is checked independently and all failures are
//! reported together, so a rejected row can be logged with the full list of
//! problems.
//!
//! Text fields accept JSON strings and numbers (numbers are rendered in their
//! decimal form). `null` or an absent key is [`ValidationErrorKind::Missing`].
//! Text containing a NUL character is rejected, since the store cannot hold it.
//!
//! # Example
//!
//! ```
//! use rowpipe_common::{validate_record, Field, ValidationErrorKind};
//! use serde_json::json;
//!
//! let raw = json!({
//!     "name": "Asha", "email": "asha@example.com", "mobile": "9876543210",
//!     "gender": "female", "age": "31", "designation": "Engineer",
//!     "city": "Pune", "pin": "4110", "fav_food": "Dosa", "fav_movie": "Lagaan"
//! });
//!
//! let errors = validate_record(raw.as_object().unwrap()).unwrap_err();
//! assert!(errors.contains(Field::Pin, ValidationErrorKind::FormatMismatch));
//! ```

use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::batch::RawRecord;
use crate::record::{Field, Gender, Record, MAX_AGE, PIN_LENGTH};

/// Why a single field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Key absent or `null`
    Missing,
    /// Value is a bool, array or object
    WrongType,
    /// Longer than the field's character ceiling
    TooLong,
    /// Age is an integer outside 0..=120
    OutOfRange,
    /// Age does not parse as an integer
    NotAnInteger,
    /// Pin is not exactly six ASCII digits
    FormatMismatch,
    /// Gender is not MALE, FEMALE or OTHER
    InvalidEnum,
    /// Text contains a NUL character
    InvalidCharacter,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ValidationErrorKind::Missing => "is required",
            ValidationErrorKind::WrongType => "must be a string or number",
            ValidationErrorKind::TooLong => "is too long",
            ValidationErrorKind::OutOfRange => "must be between 0 and 120",
            ValidationErrorKind::NotAnInteger => "must be an integer",
            ValidationErrorKind::FormatMismatch => "must be exactly 6 digits",
            ValidationErrorKind::InvalidEnum => "must be MALE, FEMALE or OTHER",
            ValidationErrorKind::InvalidCharacter => "must not contain NUL characters",
        };
        f.write_str(text)
    }
}

/// A rejected field and the reason
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} {kind}")]
pub struct ValidationError {
    pub field: Field,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(field: Field, kind: ValidationErrorKind) -> Self {
        Self { field, kind }
    }
}

/// Every field failure found in one raw record (never empty)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `field` was rejected for `kind`
    pub fn contains(&self, field: Field, kind: ValidationErrorKind) -> bool {
        self.0.iter().any(|e| e.field == field && e.kind == kind)
    }

    /// Kind of the first failure recorded for `field`
    pub fn kind_of(&self, field: Field) -> Option<ValidationErrorKind> {
        self.0.iter().find(|e| e.field == field).map(|e| e.kind)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Accumulates per-field failures while a record is being checked
#[derive(Default)]
struct Checker {
    errors: Vec<ValidationError>,
}

impl Checker {
    fn reject(&mut self, field: Field, kind: ValidationErrorKind) {
        self.errors.push(ValidationError::new(field, kind));
    }

    /// Raw value of `field` as text, or `None` after recording why not.
    fn text(&mut self, raw: &RawRecord, field: Field) -> Option<String> {
        match raw.get(field.as_str()) {
            None | Some(Value::Null) => {
                self.reject(field, ValidationErrorKind::Missing);
                None
            }
            Some(Value::String(s)) if s.contains('\0') => {
                self.reject(field, ValidationErrorKind::InvalidCharacter);
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(_) => {
                self.reject(field, ValidationErrorKind::WrongType);
                None
            }
        }
    }

    /// Text field with its configured length ceiling
    fn bounded(&mut self, raw: &RawRecord, field: Field) -> Option<String> {
        let value = self.text(raw, field)?;
        match field.max_len() {
            Some(max) if value.chars().count() > max => {
                self.reject(field, ValidationErrorKind::TooLong);
                None
            }
            _ => Some(value),
        }
    }

    fn gender(&mut self, raw: &RawRecord) -> Option<Gender> {
        let value = self.text(raw, Field::Gender)?;
        match value.parse::<Gender>() {
            Ok(gender) => Some(gender),
            Err(()) => {
                self.reject(Field::Gender, ValidationErrorKind::InvalidEnum);
                None
            }
        }
    }

    fn age(&mut self, raw: &RawRecord) -> Option<i32> {
        let parsed = match raw.get(Field::Age.as_str()) {
            None | Some(Value::Null) => Err(ValidationErrorKind::Missing),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(age) => Ok(age),
                None if n.is_u64() => Err(ValidationErrorKind::OutOfRange),
                None => Err(ValidationErrorKind::NotAnInteger),
            },
            Some(Value::String(s)) => parse_integer(s),
            Some(_) => Err(ValidationErrorKind::WrongType),
        };

        let checked = parsed.and_then(|age| {
            if (0..=i64::from(MAX_AGE)).contains(&age) {
                i32::try_from(age).map_err(|_| ValidationErrorKind::OutOfRange)
            } else {
                Err(ValidationErrorKind::OutOfRange)
            }
        });

        match checked {
            Ok(age) => Some(age),
            Err(kind) => {
                self.reject(Field::Age, kind);
                None
            }
        }
    }

    fn pin(&mut self, raw: &RawRecord) -> Option<String> {
        let value = self.text(raw, Field::Pin)?;
        if value.len() == PIN_LENGTH && value.bytes().all(|b| b.is_ascii_digit()) {
            Some(value)
        } else {
            self.reject(Field::Pin, ValidationErrorKind::FormatMismatch);
            None
        }
    }
}

/// Optionally signed decimal digits. Anything wider than `i64` is still an
/// integer, just out of range.
fn parse_integer(text: &str) -> Result<i64, ValidationErrorKind> {
    let text = text.trim();
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationErrorKind::NotAnInteger);
    }
    text.parse::<i64>().map_err(|_| ValidationErrorKind::OutOfRange)
}

/// Validate and normalize one raw record.
///
/// Pure function of its input: either every field passes and a [`Record`] is
/// returned with `gender` uppercased, or all failing fields are reported.
pub fn validate_record(raw: &RawRecord) -> Result<Record, ValidationErrors> {
    let mut check = Checker::default();

    let name = check.bounded(raw, Field::Name);
    let email = check.bounded(raw, Field::Email);
    let mobile = check.bounded(raw, Field::Mobile);
    let gender = check.gender(raw);
    let age = check.age(raw);
    let designation = check.bounded(raw, Field::Designation);
    let city = check.bounded(raw, Field::City);
    let pin = check.pin(raw);
    let fav_food = check.bounded(raw, Field::FavFood);
    let fav_movie = check.bounded(raw, Field::FavMovie);

    match (
        name,
        email,
        mobile,
        gender,
        age,
        designation,
        city,
        pin,
        fav_food,
        fav_movie,
    ) {
        (
            Some(name),
            Some(email),
            Some(mobile),
            Some(gender),
            Some(age),
            Some(designation),
            Some(city),
            Some(pin),
            Some(fav_food),
            Some(fav_movie),
        ) if check.errors.is_empty() => Ok(Record {
            name,
            email,
            mobile,
            gender,
            age,
            designation,
            city,
            pin,
            fav_food,
            fav_movie,
        }),
        _ => Err(ValidationErrors(check.errors)),
    }
}

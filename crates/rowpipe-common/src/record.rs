//! The `users` row model
//!
//! A [`Record`] is one validated, normalized row ready for persistence. The
//! field order of [`Field::ALL`] is the column order of the `users` table and
//! of every bulk insert statement.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::batch::RawRecord;

/// Maximum accepted age (inclusive)
pub const MAX_AGE: i32 = 120;

/// Exact length of a postal index number
pub const PIN_LENGTH: usize = 6;

/// One column of the `users` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Email,
    Mobile,
    Gender,
    Age,
    Designation,
    City,
    Pin,
    FavFood,
    FavMovie,
}

impl Field {
    /// All fields in table column order
    pub const ALL: [Field; 10] = [
        Field::Name,
        Field::Email,
        Field::Mobile,
        Field::Gender,
        Field::Age,
        Field::Designation,
        Field::City,
        Field::Pin,
        Field::FavFood,
        Field::FavMovie,
    ];

    /// Column / mapping key name
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Email => "email",
            Field::Mobile => "mobile",
            Field::Gender => "gender",
            Field::Age => "age",
            Field::Designation => "designation",
            Field::City => "city",
            Field::Pin => "pin",
            Field::FavFood => "fav_food",
            Field::FavMovie => "fav_movie",
        }
    }

    /// Length ceiling in characters for free-text fields, `None` when unbounded
    /// or when the field has a structural rule instead.
    pub fn max_len(self) -> Option<usize> {
        match self {
            Field::Name => Some(255),
            Field::Email => Some(320),
            Field::Mobile => Some(15),
            Field::Designation => Some(255),
            Field::City => Some(50),
            Field::FavFood => Some(100),
            Field::Gender | Field::Age | Field::Pin | Field::FavMovie => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted gender values, always stored uppercase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
            Gender::Other => "OTHER",
        }
    }
}

impl FromStr for Gender {
    type Err = ();

    /// Case-insensitive parse; the input is uppercased before matching.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MALE" => Ok(Gender::Male),
            "FEMALE" => Ok(Gender::Female),
            "OTHER" => Ok(Gender::Other),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated row of the `users` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub gender: Gender,
    pub age: i32,
    pub designation: String,
    pub city: String,
    pub pin: String,
    pub fav_food: String,
    pub fav_movie: String,
}

impl Record {
    /// Render the record back into the raw mapping form carried by batches.
    ///
    /// Every value is a string, matching what the file producer emits.
    pub fn to_raw(&self) -> RawRecord {
        let mut raw = RawRecord::new();
        for field in Field::ALL {
            let value = match field {
                Field::Name => self.name.clone(),
                Field::Email => self.email.clone(),
                Field::Mobile => self.mobile.clone(),
                Field::Gender => self.gender.as_str().to_string(),
                Field::Age => self.age.to_string(),
                Field::Designation => self.designation.clone(),
                Field::City => self.city.clone(),
                Field::Pin => self.pin.clone(),
                Field::FavFood => self.fav_food.clone(),
                Field::FavMovie => self.fav_movie.clone(),
            };
            raw.insert(field.as_str().to_string(), Value::String(value));
        }
        raw
    }
}

use std::fmt::Display;
use std::str::FromStr;

use lettre::{address::AddressError, Address};
use mongodb::bson::{to_bson, Bson};
use phonenumber::{country, PhoneNumber};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numbering plan used for phone numbers given without an international prefix.
pub const DEFAULT_REGION: country::Id = country::Id::KE;

/// Whoever a code is issued to: an email address or an SMS number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Subject {
    Email(Address),
    Sms(PhoneNumber),
}

impl Subject {
    pub fn is_email(&self) -> bool {
        matches!(self, Self::Email(_))
    }
}

// Parsed phone numbers remember how they were written, so compare canonical forms.
impl PartialEq for Subject {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Subject {}

impl FromStr for Subject {
    type Err = SubjectError;

    /// Anything containing an `@` is treated as an email address, everything else as a phone number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SubjectError::Empty);
        }

        if s.contains('@') {
            return Ok(Self::Email(s.to_lowercase().parse::<Address>()?));
        }

        let number = phonenumber::parse(Some(DEFAULT_REGION), s)?;
        if !phonenumber::is_valid(&number) {
            return Err(SubjectError::InvalidNumber(s.to_string()));
        }
        Ok(Self::Sms(number))
    }
}

impl TryFrom<String> for Subject {
    type Error = SubjectError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.to_string()
    }
}

impl Display for Subject {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email(address) => address.fmt(formatter),
            Self::Sms(number) => number.fmt(formatter),
        }
    }
}

impl From<&Subject> for Bson {
    fn from(subject: &Subject) -> Self {
        to_bson(subject).unwrap() // Valid because a subject always serializes to a string
    }
}

#[derive(Debug, Error)]
pub enum SubjectError {
    #[error("an email address or phone number is required")]
    Empty,
    #[error("invalid email address: {0}")]
    Email(#[from] AddressError),
    #[error("invalid phone number: {0}")]
    Sms(#[from] phonenumber::ParseError),
    #[error("'{0}' is not a valid phone number")]
    InvalidNumber(String),
}

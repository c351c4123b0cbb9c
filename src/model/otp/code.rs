use std::convert::TryInto;
use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use rand::distributions::{Distribution, Uniform};
use sha2::Sha256;
use thiserror::Error;

use crate::model::subject::Subject;

pub type HmacSha256 = Hmac<Sha256>;

pub const LENGTH: usize = 6;

/// A one-time-password code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    code: [u8; LENGTH],
}

impl Code {
    /// Generate a random code. Every digit is uniform, so leading zeros are as likely as any other.
    pub fn random() -> Self {
        let mut code = [0; LENGTH];
        let digit_dist = Uniform::from(0..=9);
        let mut rng = rand::thread_rng();
        for digit in &mut code {
            *digit = digit_dist.sample(&mut rng);
        }
        Self { code }
    }

    /// The digest stored in place of the code, bound to the subject it was issued to.
    pub fn hmac(&self, subject: &Subject, secret: &[u8]) -> Vec<u8> {
        let mut hmac =
            HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
        hmac.update(subject.to_string().as_bytes());
        hmac.update(b":");
        hmac.update(self.to_string().as_bytes());
        hmac.finalize().into_bytes().to_vec()
    }
}

impl Deref for Code {
    type Target = [u8; LENGTH];

    fn deref(&self) -> &Self::Target {
        &self.code
    }
}

impl Display for Code {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            self.code
                .iter()
                .map(|digit| char::from_digit(*digit as u32, 10).unwrap())
                .collect::<String>()
        )
    }
}

impl FromStr for Code {
    type Err = ParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let len = string.chars().count();
        if len != LENGTH {
            return Err(Self::Err::InvalidLength(len));
        }
        let digits = string
            .chars()
            .map(|c| match c {
                '0'..='9' => Ok(c as u8 - b'0'),
                _ => Err(Self::Err::InvalidChar(c)),
            })
            .collect::<Result<Vec<u8>, Self::Err>>()?;
        Ok(Self {
            code: digits.try_into().unwrap(), // Valid because digits.len() == LENGTH
        })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("code must contain exactly 6 digits, got {0} characters")]
    InvalidLength(usize),
    #[error("code must contain only digits, found '{0}'")]
    InvalidChar(char),
}

use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::Id;

/// Department recorded for voters admitted with an access code.
pub const ACCESS_CODE_DEPARTMENT: &str = "Special Unit";

/// Email domain for voters admitted with an access code.
pub const ACCESS_CODE_EMAIL_DOMAIN: &str = "vip.vote";

/// A single-use code admitting one pre-approved voter without a document.
///
/// Codes are provisioned directly in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCodeCore {
    /// Unique. Also becomes the admitted voter's matric number.
    pub code: String,
    pub is_used: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// An access code without an ID.
pub type NewAccessCode = AccessCodeCore;

/// An access code from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCode {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub access_code: AccessCodeCore,
}

impl Deref for AccessCode {
    type Target = AccessCodeCore;

    fn deref(&self) -> &Self::Target {
        &self.access_code
    }
}

impl AccessCodeCore {
    /// Check this code may still admit a voter.
    pub fn ensure_unused(&self) -> Result<()> {
        if self.is_used {
            return Err(Error::BadRequest(
                "This access code has already been used".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check the shape of a submitted code: 3 to 20 letters, digits or hyphens.
pub fn validate_code(code: &str) -> Result<()> {
    let length = code.chars().count();
    if !(3..=20).contains(&length) {
        return Err(Error::BadRequest(
            "Access code must be between 3 and 20 characters".to_string(),
        ));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(Error::BadRequest(
            "Access code can only contain letters, numbers, and hyphens".to_string(),
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_shape() {
        assert!(validate_code("VIP-2024").is_ok());
        assert!(validate_code("ab").is_err());
        assert!(validate_code("a".repeat(21).as_str()).is_err());
        assert!(validate_code("VIP 2024").is_err());
        assert!(validate_code("VIP/2024").is_err());
    }

    #[test]
    fn used_codes_are_refused() {
        let mut code = AccessCodeCore::example("VIP-0001");
        assert!(code.ensure_unused().is_ok());
        code.is_used = true;
        assert!(code
            .ensure_unused()
            .unwrap_err()
            .to_string()
            .contains("already been used"));
    }
}

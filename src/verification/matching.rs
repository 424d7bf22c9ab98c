//! Checks extracted document text against the identity a voter claims.

use serde::{Deserialize, Serialize};

/// What the document is expected to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedIdentity {
    pub matric_number: String,
    pub full_name: String,
    pub department: String,
}

/// Recognised departments and the words that identify each on an ID card.
const DEPARTMENT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Medicine & Surgery (MBBS)",
        &["MBBS", "Surgery", "Medical", "Clinical", "Medicine"],
    ),
    (
        "Pharmacy",
        &["Doctor of Pharmacy", "Pharm.D", "Pharmacology", "B.Pharm", "Pharmacy"],
    ),
    ("Pharmacology", &["Pharmacology", "Pharmaceutical"]),
    ("Nursing Science", &["Nursing", "B.N.Sc", "Midwifery", "Nurse"]),
    (
        "Medical Laboratory Science",
        &["Laboratory", "MLT", "Medical Lab", "B.M.L.S"],
    ),
    ("Radiography", &["Radiography", "Radiology", "X-ray", "Imaging"]),
    ("Physiology", &["Physiology", "Physiological"]),
    ("Anatomy", &["Anatomy", "Anatomical"]),
    (
        "Physiotherapy",
        &["Physiotherapy", "B.Physio", "Rehabilitation", "Physical Therapy"],
    ),
    ("Dentistry", &["BDS", "Dental", "Oral", "Dentistry"]),
];

/// Keywords for a department, or `None` if the department is not one we know.
pub fn department_keywords(department: &str) -> Option<&'static [&'static str]> {
    let department = department.trim();
    DEPARTMENT_KEYWORDS
        .iter()
        .find(|(name, _)| *name == department)
        .map(|(_, keywords)| *keywords)
}

/// Run the identifier, name and department checks in that order.
///
/// Returns the reason for the first failing check.
pub fn check_identity(text: &str, expected: &ExpectedIdentity) -> Result<(), String> {
    let text = text.to_lowercase();

    let matric = expected.matric_number.trim().to_lowercase();
    if !text.contains(&matric) {
        return Err(format!(
            "Matric number {} not found in document.",
            expected.matric_number
        ));
    }

    let name = expected.full_name.trim().to_lowercase();
    let tokens: Vec<&str> = name
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .collect();
    let found = tokens.iter().filter(|t| text.contains(*t)).count();
    let name_matches = match tokens.len() {
        0 => false,
        1 => found == 1,
        n => found * 2 >= n,
    };
    if !name_matches {
        return Err(format!(
            "Name mismatch. Found {found}/{} name parts.",
            tokens.len()
        ));
    }

    let keywords = department_keywords(&expected.department).ok_or_else(|| {
        format!(
            "Department \"{}\" is not recognized. Please verify manually.",
            expected.department
        )
    })?;
    if !keywords.iter().any(|k| text.contains(&k.to_lowercase())) {
        return Err(format!(
            "Department keywords for {} not found in document. Manual review required.",
            expected.department
        ));
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::examples::CARD_TEXT;
    use super::*;

    #[test]
    fn matching_card_passes() {
        assert_eq!(check_identity(CARD_TEXT, &ExpectedIdentity::example()), Ok(()));
    }

    #[test]
    fn missing_matric_number() {
        let text = CARD_TEXT.replace("MAT/2021/0042", "MAT/2021/0043");
        let reason = check_identity(&text, &ExpectedIdentity::example()).unwrap_err();
        assert!(reason.contains("Matric number MAT/2021/0042"));
    }

    #[test]
    fn short_parts_are_counted_in_characters() {
        // "Ọl" is two characters but four bytes, so it is not a name part.
        let expected = ExpectedIdentity {
            full_name: "Ọl Bello Okafor".to_string(),
            ..ExpectedIdentity::example()
        };
        let text = "MAT/2021/0042 BELLO NURSING";
        assert_eq!(check_identity(text, &expected), Ok(()));

        let text = "MAT/2021/0042 NURSING";
        let reason = check_identity(text, &expected).unwrap_err();
        assert_eq!(reason, "Name mismatch. Found 0/2 name parts.");
    }

    #[test]
    fn name_needs_half_the_parts() {
        // One of three parts is not enough.
        let text = CARD_TEXT.replace("ADAEZE ", "");
        let reason = check_identity(&text, &ExpectedIdentity::example()).unwrap_err();
        assert_eq!(reason, "Name mismatch. Found 1/3 name parts.");

        // A single-part name must match exactly that part; short parts are ignored.
        let expected = ExpectedIdentity {
            full_name: "Jo Okafor".to_string(),
            ..ExpectedIdentity::example()
        };
        let reason = check_identity(CARD_TEXT, &expected).unwrap_err();
        assert_eq!(reason, "Name mismatch. Found 0/1 name parts.");
    }

    #[test]
    fn department_checks() {
        let expected = ExpectedIdentity {
            department: "Astrophysics".to_string(),
            ..ExpectedIdentity::example()
        };
        let reason = check_identity(CARD_TEXT, &expected).unwrap_err();
        assert!(reason.contains("not recognized"));

        let expected = ExpectedIdentity {
            department: "Dentistry".to_string(),
            ..ExpectedIdentity::example()
        };
        let reason = check_identity(CARD_TEXT, &expected).unwrap_err();
        assert!(reason.contains("Manual review required"));

        assert!(department_keywords("  Anatomy ").is_some());
    }
}

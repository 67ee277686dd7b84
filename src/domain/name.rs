//! Domain Name Value Types
//!
//! `DomainName` and `Label` are only ever constructed through the
//! normalize-then-validate pipeline, so holding one is proof that the
//! string is a syntactically valid (possibly IDNA-encoded) domain.
//!
//! # Rules
//!
//! - A domain name is 1-253 characters, made of one or more labels
//! - A label is 1-63 characters of ASCII letters, digits and hyphens
//! - A label never starts or ends with a hyphen
//! - `--` at positions 3-4 is reserved for IDNA (`xn--`) labels
//! - An `xn--` label must decode to valid Unicode

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a fully qualified domain name.
pub const DOMAIN_MAX_LEN: usize = 253;

/// Minimum length of a domain name.
pub const DOMAIN_MIN_LEN: usize = 1;

/// Maximum length of a single label.
pub const LABEL_MAX_LEN: usize = 63;

/// Minimum length of a single label.
pub const LABEL_MIN_LEN: usize = 1;

/// Prefix marking an IDNA (Punycode) encoded label.
pub const IDNA_PREFIX: &str = "xn--";

// =============================================================================
// Validation Errors
// =============================================================================

/// Reasons a domain name or label is rejected.
///
/// Label checks run in declaration order and the first failing rule wins.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Domain name is outside 1-253 characters
    #[error("domain name must be between 1 and 253 characters long")]
    Length,

    /// A label is outside 1-63 characters
    #[error("each label must be between 1 and 63 characters long")]
    LabelLength,

    /// A label starts or ends with a hyphen
    #[error("a label cannot start or end with a hyphen")]
    Dash,

    /// A non-IDNA label has `--` at positions 3 and 4
    #[error("a non-IDN label cannot contain two consecutive hyphens at positions 3 and 4")]
    DoubleDash,

    /// An `xn--` label does not decode to Unicode
    #[error("an IDN label must be convertible to Unicode")]
    Idna,

    /// A label contains something other than letters, digits and hyphens
    #[error("a label may only contain ASCII letters, digits and hyphens")]
    Character,
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize raw input before validation.
///
/// Newlines, tabs and carriage returns become spaces, whitespace runs collapse
/// to a single space, one trailing dot is removed, the result is trimmed and
/// lowercased.
pub fn normalize(raw: &str) -> String {
    let spaced = raw.replace(['\n', '\t', '\r'], " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_dot = collapsed.strip_suffix('.').unwrap_or(&collapsed);
    without_dot.trim().to_lowercase()
}

// =============================================================================
// Label
// =============================================================================

/// A single dot-separated segment of a domain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(String);

impl Label {
    /// Validate and wrap a label.
    pub fn new(label: impl Into<String>) -> Result<Self, ValidationError> {
        let label = label.into();
        Self::validate(&label)?;
        Ok(Self(label))
    }

    /// Check a label against the label rules.
    pub fn validate(label: &str) -> Result<(), ValidationError> {
        if label.len() > LABEL_MAX_LEN || label.len() < LABEL_MIN_LEN {
            return Err(ValidationError::LabelLength);
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(ValidationError::Dash);
        }

        let is_idna = label.starts_with(IDNA_PREFIX);
        if label.len() > 3 && !is_idna && label.as_bytes()[2..4] == *b"--" {
            return Err(ValidationError::DoubleDash);
        }

        if is_idna && idna_to_unicode(label).is_none() {
            return Err(ValidationError::Idna);
        }

        if let Some(invalid) = find_invalid_character(label) {
            tracing::trace!(label, %invalid, "label contains invalid character");
            return Err(ValidationError::Character);
        }

        Ok(())
    }

    /// The label as stored (ASCII form).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is an IDNA (`xn--`) label.
    pub fn is_idna(&self) -> bool {
        self.0.starts_with(IDNA_PREFIX)
    }

    /// Unicode form of the label.
    pub fn to_unicode(&self) -> Result<String, ValidationError> {
        idna_to_unicode(&self.0).ok_or(ValidationError::Idna)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First character that is not an ASCII letter, digit or hyphen.
fn find_invalid_character(label: &str) -> Option<char> {
    label
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
}

fn idna_to_unicode(input: &str) -> Option<String> {
    match idna::domain_to_unicode(input) {
        (unicode, Ok(())) => Some(unicode),
        (_, Err(_)) => None,
    }
}

// =============================================================================
// Domain Name
// =============================================================================

/// A normalized, validated, fully qualified domain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    /// Normalize and validate a raw domain string.
    ///
    /// Leading and trailing dots are dropped, so `.example.com.` and
    /// `example.com` are the same name. A single label is a valid name.
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let normalized = normalize(raw);
        let candidate = normalized.trim_matches('.');

        if candidate.len() > DOMAIN_MAX_LEN || candidate.len() < DOMAIN_MIN_LEN {
            return Err(ValidationError::Length);
        }

        for label in candidate.split('.') {
            Label::validate(label)?;
        }

        Ok(Self(candidate.to_string()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The leftmost label, used as the minting identity within a zone.
    pub fn label(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Every label after the first, joined by dots (empty for a single label).
    pub fn parent_domain(&self) -> &str {
        self.0.split_once('.').map(|(_, parent)| parent).unwrap_or("")
    }

    /// All labels, left to right.
    pub fn labels(&self) -> Vec<Label> {
        self.0.split('.').map(|l| Label(l.to_string())).collect()
    }

    /// Unicode (U-label) form of the whole name.
    pub fn to_unicode(&self) -> Result<String, ValidationError> {
        idna_to_unicode(&self.0).ok_or(ValidationError::Idna)
    }

    /// Whether any label is IDNA encoded, i.e. the Unicode form differs.
    pub fn is_idn(&self) -> Result<bool, ValidationError> {
        Ok(self.to_unicode()? != self.0)
    }
}

impl std::fmt::Display for DomainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DomainName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DomainName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<DomainName> for String {
    fn from(name: DomainName) -> Self {
        name.0
    }
}

//! Shipping address reconciliation.
//!
//! A completed checkout can carry up to three addresses that disagree with
//! each other: the shipping details the payment processor collected, the
//! billing/customer details it collected, and whatever stub the client put in
//! the checkout metadata. [`resolve`] picks exactly one of them.
//!
//! Street-level fields are never merged across sources: the winner is taken
//! whole and only contact fields (`name`, `email`, `phone`) may be borrowed
//! from lower-priority candidates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an address candidate came from.
///
/// Variant order is resolution priority: earlier variants win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    /// Shipping details collected by the processor's hosted checkout.
    ProcessorShipping,
    /// Billing/customer details collected by the processor.
    ProcessorBilling,
    /// Address stub supplied by the client in checkout metadata.
    ClientMetadata,
}

/// A required address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressField {
    Street1,
    City,
    State,
    PostalCode,
    Country,
}

impl AddressField {
    /// Every field a complete address must carry.
    pub const REQUIRED: [Self; 5] = [
        Self::Street1,
        Self::City,
        Self::State,
        Self::PostalCode,
        Self::Country,
    ];

    /// Field name as reported to clients.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Street1 => "street1",
            Self::City => "city",
            Self::State => "state",
            Self::PostalCode => "postal_code",
            Self::Country => "country",
        }
    }
}

impl std::fmt::Display for AddressField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// No candidate met the completeness bar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("incomplete address: missing {}", format_fields(.missing))]
pub struct IncompleteAddressError {
    /// Required fields absent from the best-populated candidate.
    pub missing: Vec<AddressField>,
    /// The best-populated candidate's source, if there were any candidates.
    pub closest: Option<AddressSource>,
}

fn format_fields(fields: &[AddressField]) -> String {
    fields
        .iter()
        .map(AddressField::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A partial address from a single source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCandidate {
    pub source: AddressSource,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub street1: Option<String>,
    #[serde(default)]
    pub street2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// The single shipping address an order ships to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalAddress {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street1: String,
    pub street2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl AddressCandidate {
    /// An empty candidate for the given source.
    #[must_use]
    pub const fn empty(source: AddressSource) -> Self {
        Self {
            source,
            name: None,
            email: None,
            phone: None,
            street1: None,
            street2: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
        }
    }

    /// Required fields this candidate is missing. Blank strings count as missing.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<AddressField> {
        AddressField::REQUIRED
            .into_iter()
            .filter(|field| present(self.required(*field)).is_none())
            .collect()
    }

    /// Whether every required field is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    const fn required(&self, field: AddressField) -> Option<&String> {
        match field {
            AddressField::Street1 => self.street1.as_ref(),
            AddressField::City => self.city.as_ref(),
            AddressField::State => self.state.as_ref(),
            AddressField::PostalCode => self.postal_code.as_ref(),
            AddressField::Country => self.country.as_ref(),
        }
    }

    fn into_canonical(self) -> Option<CanonicalAddress> {
        Some(CanonicalAddress {
            street1: present(self.street1.as_ref())?,
            city: present(self.city.as_ref())?,
            state: present(self.state.as_ref())?,
            postal_code: present(self.postal_code.as_ref())?,
            country: present(self.country.as_ref())?,
            street2: present(self.street2.as_ref()),
            name: present(self.name.as_ref()),
            email: present(self.email.as_ref()),
            phone: present(self.phone.as_ref()),
        })
    }
}

impl CanonicalAddress {
    /// Re-enter this address into resolution as a candidate from `source`.
    #[must_use]
    pub fn into_candidate(self, source: AddressSource) -> AddressCandidate {
        AddressCandidate {
            source,
            name: self.name,
            email: self.email,
            phone: self.phone,
            street1: Some(self.street1),
            street2: self.street2,
            city: Some(self.city),
            state: Some(self.state),
            postal_code: Some(self.postal_code),
            country: Some(self.country),
        }
    }
}

fn present(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// Resolve one canonical address from candidates.
///
/// Candidates are considered in [`AddressSource`] priority order regardless of
/// the order they are passed in. The first complete candidate wins as a whole;
/// if it lacks `name`, `email` or `phone`, each is taken from the first
/// lower-priority candidate that has it.
///
/// # Errors
///
/// Returns [`IncompleteAddressError`] naming the fields missing from the
/// best-populated candidate when no candidate is complete.
pub fn resolve(candidates: &[AddressCandidate]) -> Result<CanonicalAddress, IncompleteAddressError> {
    let mut ordered: Vec<&AddressCandidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.source);

    for (index, candidate) in ordered.iter().enumerate() {
        let Some(mut address) = (*candidate).clone().into_canonical() else {
            continue;
        };
        let lower = ordered.get(index + 1..).unwrap_or_default();

        if address.name.is_none() {
            address.name = lower.iter().find_map(|c| present(c.name.as_ref()));
        }
        if address.email.is_none() {
            address.email = lower.iter().find_map(|c| present(c.email.as_ref()));
        }
        if address.phone.is_none() {
            address.phone = lower.iter().find_map(|c| present(c.phone.as_ref()));
        }
        return Ok(address);
    }

    // Ties go to the higher-priority source since `ordered` is sorted.
    let closest = ordered
        .iter()
        .min_by_key(|c| c.missing_fields().len())
        .copied();
    Err(IncompleteAddressError {
        missing: closest.map_or_else(|| AddressField::REQUIRED.to_vec(), AddressCandidate::missing_fields),
        closest: closest.map(|c| c.source),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn complete(source: AddressSource, street: &str) -> AddressCandidate {
        AddressCandidate {
            street1: Some(street.to_string()),
            city: Some("Portland".to_string()),
            state: Some("OR".to_string()),
            postal_code: Some("97201".to_string()),
            country: Some("US".to_string()),
            ..AddressCandidate::empty(source)
        }
    }

    #[test]
    fn test_incomplete_shipping_falls_through_to_billing_untouched() {
        let shipping = AddressCandidate {
            name: Some("Shipping Name".to_string()),
            street1: Some("1 Shipping St".to_string()),
            city: Some("Seattle".to_string()),
            ..AddressCandidate::empty(AddressSource::ProcessorShipping)
        };
        let billing = AddressCandidate {
            name: Some("Billing Name".to_string()),
            ..complete(AddressSource::ProcessorBilling, "2 Billing Ave")
        };
        let metadata = AddressCandidate {
            street2: Some("Apt 9".to_string()),
            phone: Some("555-0100".to_string()),
            ..complete(AddressSource::ClientMetadata, "3 Metadata Rd")
        };

        let address = resolve(&[shipping, billing, metadata]).unwrap();

        assert_eq!(address.street1, "2 Billing Ave");
        assert_eq!(address.city, "Portland");
        assert_eq!(address.street2, None);
        assert_eq!(address.name.as_deref(), Some("Billing Name"));
        // Contact fields may be borrowed from lower priority sources.
        assert_eq!(address.phone.as_deref(), Some("555-0100"));
    }

    #[test]
    fn test_priority_ignores_argument_order() {
        let metadata = complete(AddressSource::ClientMetadata, "3 Metadata Rd");
        let shipping = complete(AddressSource::ProcessorShipping, "1 Shipping St");
        let address = resolve(&[metadata, shipping]).unwrap();
        assert_eq!(address.street1, "1 Shipping St");
    }

    #[test]
    fn test_contact_fields_never_come_from_higher_priority() {
        let shipping = AddressCandidate {
            email: Some("ship@example.com".to_string()),
            ..AddressCandidate::empty(AddressSource::ProcessorShipping)
        };
        let billing = complete(AddressSource::ProcessorBilling, "2 Billing Ave");
        let address = resolve(&[shipping, billing]).unwrap();
        assert_eq!(address.email, None);
    }

    #[test]
    fn test_blank_fields_count_as_missing() {
        let candidate = AddressCandidate {
            state: Some("   ".to_string()),
            ..complete(AddressSource::ProcessorShipping, "1 Main St")
        };
        let err = resolve(&[candidate]).unwrap_err();
        assert_eq!(err.missing, vec![AddressField::State]);
        assert_eq!(err.closest, Some(AddressSource::ProcessorShipping));
    }

    #[test]
    fn test_error_reports_best_populated_candidate() {
        let sparse = AddressCandidate {
            city: Some("Austin".to_string()),
            ..AddressCandidate::empty(AddressSource::ProcessorShipping)
        };
        let nearly = AddressCandidate {
            country: None,
            ..complete(AddressSource::ClientMetadata, "9 Elm St")
        };
        let err = resolve(&[sparse, nearly]).unwrap_err();
        assert_eq!(err.missing, vec![AddressField::Country]);
        assert_eq!(err.closest, Some(AddressSource::ClientMetadata));
        assert_eq!(err.to_string(), "incomplete address: missing country");
    }

    #[test]
    fn test_no_candidates() {
        let err = resolve(&[]).unwrap_err();
        assert_eq!(err.missing.len(), AddressField::REQUIRED.len());
        assert_eq!(err.closest, None);
    }

    #[test]
    fn test_values_are_trimmed() {
        let candidate = AddressCandidate {
            name: Some("  Ada Lovelace ".to_string()),
            ..complete(AddressSource::ProcessorShipping, " 10 Downing St ")
        };
        let address = resolve(&[candidate]).unwrap();
        assert_eq!(address.street1, "10 Downing St");
        assert_eq!(address.name.as_deref(), Some("Ada Lovelace"));
    }
}

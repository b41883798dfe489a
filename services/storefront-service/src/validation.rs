// =============================================================================
// VALIDATION
// =============================================================================
// Pre-write input checks. Everything here runs before any backend call; a
// failure is returned as `AppError::Validation` and nothing is written.
// =============================================================================

use crate::error::{AppError, AppResult};
use crate::models::CustomerDetails;

/// Minimum delivery address length, in characters
pub const MIN_ADDRESS_LEN: usize = 10;

/// `local@domain.tld` with a letters-only TLD of at least two characters.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));

    let domain_chars_ok = domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');

    let tld_ok = match domain.rsplit_once('.') {
        Some((host, tld)) => {
            !host.is_empty() && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
        }
        None => false,
    };

    local_ok && domain_chars_ok && tld_ok
}

/// Ten-digit mobile number starting with 6, 7, 8 or 9.
pub fn is_valid_phone(phone: &str) -> bool {
    phone.len() == 10
        && phone.chars().all(|c| c.is_ascii_digit())
        && matches!(phone.as_bytes().first(), Some(b'6'..=b'9'))
}

/// `#RGB` or `#RRGGBB`
pub fn is_valid_color_hex(hex: &str) -> bool {
    match hex.strip_prefix('#') {
        Some(digits) => {
            matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Checkout form rules.
pub fn validate_customer(customer: &CustomerDetails) -> AppResult<()> {
    if customer.customer_name.trim().is_empty() {
        return Err(AppError::Validation("Please enter your name".into()));
    }

    if !is_valid_email(customer.customer_email.trim()) {
        return Err(AppError::Validation(
            "Please enter a valid email address (e.g., user@example.com)".into(),
        ));
    }

    if !is_valid_phone(customer.customer_phone.trim()) {
        return Err(AppError::Validation(
            "Please enter a valid 10-digit mobile number starting with 6, 7, 8, or 9".into(),
        ));
    }

    if customer.customer_address.trim().chars().count() < MIN_ADDRESS_LEN {
        return Err(AppError::Validation(
            "Please enter a complete delivery address".into(),
        ));
    }

    Ok(())
}

/// Trimmed copy of the customer fields as they will be stored
pub fn normalize_customer(customer: CustomerDetails) -> CustomerDetails {
    CustomerDetails {
        user_id: customer.user_id.filter(|id| !id.trim().is_empty()),
        customer_name: customer.customer_name.trim().to_string(),
        customer_email: customer.customer_email.trim().to_string(),
        customer_phone: customer.customer_phone.trim().to_string(),
        customer_address: customer.customer_address.trim().to_string(),
    }
}

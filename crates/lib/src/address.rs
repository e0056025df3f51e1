//! Recipient address normalisation: phone numbers to the network's chat id form.

use crate::error::GatewayError;

/// Suffix the network uses for individual chats.
pub const USER_SUFFIX: &str = "@c.us";

/// Turn user input into a chat id. Values that already carry a domain (`...@...`) pass through;
/// otherwise common phone punctuation is stripped and the user suffix appended.
pub fn normalize_address(phone: &str) -> Result<String, GatewayError> {
    let trimmed = phone.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::input("phone is required"));
    }
    if trimmed.contains('@') {
        return Ok(trimmed.to_string());
    }
    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(GatewayError::input(format!("invalid phone number: {}", trimmed)));
    }
    Ok(format!("{}{}", digits, USER_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_user_suffix_to_bare_number() {
        assert_eq!(normalize_address("6281234").unwrap(), "6281234@c.us");
    }

    #[test]
    fn strips_phone_punctuation() {
        assert_eq!(
            normalize_address(" +62 (812) 345-67.89 ").unwrap(),
            "628123456789@c.us"
        );
    }

    #[test]
    fn keeps_existing_chat_id() {
        assert_eq!(normalize_address("6281234@c.us").unwrap(), "6281234@c.us");
        assert_eq!(normalize_address("12036302@g.us").unwrap(), "12036302@g.us");
    }

    #[test]
    fn rejects_empty_and_non_numeric() {
        assert!(matches!(normalize_address("  "), Err(GatewayError::Input(_))));
        assert!(matches!(normalize_address("abc"), Err(GatewayError::Input(_))));
        assert!(matches!(normalize_address("+"), Err(GatewayError::Input(_))));
    }
}

/// PhoneError is a reason why a phone number cannot be used to send SMS.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number contains invalid character {0:?}")]
    InvalidCharacter(char),
    /// Holds the masked number.
    #[error("phone number {0:?} has no country code")]
    MissingCountryCode(String),
    #[error("phone number has {0} digits, expected between 8 and 15")]
    InvalidLength(usize),
}

/// Format a phone number as entered by a user into E.164 (`+33612345678`).
///
/// Separators are ignored. An explicit `+` or `00` prefix carries the
/// country code, and national French numbers (`06 12 34 56 78`) are
/// assumed to be in +33.
pub fn format_phone_number(raw: &str) -> Result<String, PhoneError> {
    let mut digits = String::with_capacity(raw.len());
    let mut plus = false;

    for c in raw.trim().chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '.' | '-' | '(' | ')' | '\u{a0}' => {}
            '+' if digits.is_empty() && !plus => plus = true,
            c => return Err(PhoneError::InvalidCharacter(c)),
        }
    }

    if digits.is_empty() {
        return Err(PhoneError::Empty);
    }

    let international = if plus {
        // "+33 (0)6 ..." is a frequent way of writing French numbers.
        match digits.strip_prefix("330") {
            Some(rest) if rest.len() == 9 => format!("33{rest}"),
            _ => digits,
        }
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else if digits.len() == 10 && digits.starts_with('0') {
        format!("33{}", &digits[1..])
    } else if digits.len() == 11 && digits.starts_with("33") {
        digits
    } else {
        return Err(PhoneError::MissingCountryCode(mask_phone_number(raw.trim())));
    };

    if !(8..=15).contains(&international.len()) || international.starts_with('0') {
        return Err(PhoneError::InvalidLength(international.len()));
    }

    Ok(format!("+{international}"))
}

/// Mask all but the leading country prefix and last two digits
/// of a phone number, for use in logs.
pub fn mask_phone_number(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let (head, rest) = chars.split_at(4);
    let (middle, tail) = rest.split_at(rest.len() - 2);

    head.iter()
        .copied()
        .chain(middle.iter().map(|_| '*'))
        .chain(tail.iter().copied())
        .collect()
}

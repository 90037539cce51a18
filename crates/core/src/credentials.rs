//! Generated administrator credentials.

use rand::Rng;

/// Length of a generated administrator password.
pub const GENERATED_PASSWORD_LEN: usize = 24;

/// Generate a random alphanumeric password.
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_password_has_expected_shape() {
        let pw = generate_password();
        assert_eq!(pw.len(), GENERATED_PASSWORD_LEN);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_passwords_differ() {
        assert_ne!(generate_password(), generate_password());
    }
}

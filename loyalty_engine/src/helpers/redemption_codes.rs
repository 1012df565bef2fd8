use std::sync::OnceLock;

use rand::{distributions::Uniform, Rng};
use regex::Regex;

/// Letters and digits that cannot be confused with each other when read aloud or printed (no I, O, 0 or 1).
pub const REDEMPTION_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const REDEMPTION_CODE_LENGTH: usize = 8;

pub fn generate_redemption_code() -> String {
    let mut rng = rand::thread_rng();
    let pick = Uniform::from(0..REDEMPTION_CODE_ALPHABET.len());
    (0..REDEMPTION_CODE_LENGTH).map(|_| REDEMPTION_CODE_ALPHABET[rng.sample(pick)] as char).collect()
}

pub fn is_well_formed_redemption_code(code: &str) -> bool {
    static CODE: OnceLock<Regex> = OnceLock::new();
    let re = CODE.get_or_init(|| Regex::new(r"^[A-HJ-NP-Z2-9]{8}$").unwrap());
    re.is_match(code)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_codes_use_the_unambiguous_alphabet() {
        for _ in 0..200 {
            let code = generate_redemption_code();
            assert_eq!(code.len(), REDEMPTION_CODE_LENGTH);
            assert!(is_well_formed_redemption_code(&code), "{code}");
        }
    }

    #[test]
    fn ambiguous_characters_are_rejected() {
        assert!(!is_well_formed_redemption_code("ABCDEFG0"));
        assert!(!is_well_formed_redemption_code("ABCDEFGI"));
        assert!(!is_well_formed_redemption_code("abcdefgh"));
        assert!(!is_well_formed_redemption_code("ABCDEFG"));
        assert!(is_well_formed_redemption_code("XK7M2PQR"));
    }
}

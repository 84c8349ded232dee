// smartpixl-record: Browser fingerprint hashing

use sha2::{Digest, Sha256};

/// Client-reported attributes feeding the fingerprint hash
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintInput<'a> {
    pub user_agent: &'a str,
    pub accept_language: &'a str,
    pub sec_ch_ua: &'a str,
    pub canvas_hint: Option<&'a str>,
    pub webgl_hint: Option<&'a str>,
}

/// Stable hash of the ordered attribute tuple.
///
/// Field order and the separator byte are part of the contract: changing
/// either changes every stored fingerprint.
pub fn fingerprint_hash(input: &FingerprintInput<'_>) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(input.user_agent.as_bytes());
    hasher.update([0x1f]);
    hasher.update(input.accept_language.as_bytes());
    hasher.update([0x1f]);
    hasher.update(input.sec_ch_ua.as_bytes());
    hasher.update([0x1f]);
    hasher.update(input.canvas_hint.unwrap_or("").as_bytes());
    hasher.update([0x1f]);
    hasher.update(input.webgl_hint.unwrap_or("").as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_tuple_same_hash() {
        let input = FingerprintInput {
            user_agent: "Mozilla/5.0",
            accept_language: "en-US,en;q=0.9",
            sec_ch_ua: "\"Chromium\";v=\"130\"",
            canvas_hint: Some("a1b2"),
            webgl_hint: None,
        };
        assert_eq!(fingerprint_hash(&input), fingerprint_hash(&input));
    }

    #[test]
    fn test_any_field_change_changes_hash() {
        let base = FingerprintInput {
            user_agent: "Mozilla/5.0",
            accept_language: "en-US",
            sec_ch_ua: "",
            canvas_hint: None,
            webgl_hint: None,
        };
        let ua = FingerprintInput {
            user_agent: "Mozilla/5.1",
            ..base
        };
        let lang = FingerprintInput {
            accept_language: "de-DE",
            ..base
        };
        assert_ne!(fingerprint_hash(&base), fingerprint_hash(&ua));
        assert_ne!(fingerprint_hash(&base), fingerprint_hash(&lang));
    }

    #[test]
    fn test_separator_prevents_field_bleed() {
        // "ab" + "c" must not collide with "a" + "bc"
        let left = FingerprintInput {
            user_agent: "ab",
            accept_language: "c",
            ..Default::default()
        };
        let right = FingerprintInput {
            user_agent: "a",
            accept_language: "bc",
            ..Default::default()
        };
        assert_ne!(fingerprint_hash(&left), fingerprint_hash(&right));
    }

    #[test]
    fn test_missing_hints_equal_empty_hints() {
        let missing = FingerprintInput {
            user_agent: "ua",
            ..Default::default()
        };
        let empty = FingerprintInput {
            user_agent: "ua",
            canvas_hint: Some(""),
            webgl_hint: Some(""),
            ..Default::default()
        };
        assert_eq!(fingerprint_hash(&missing), fingerprint_hash(&empty));
    }
}

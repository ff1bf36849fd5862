//! Fingerprints for adb host public keys.
//!
//! A key line looks like `<base64 key material> <user@host>`. Only the first
//! whitespace-delimited token is hashed; the rest is a display label.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use md5::{Digest, Md5};
use tracing::warn;

/// Label shown for keys that carry no `user@host` comment.
pub const DEFAULT_HOSTNAME_LABEL: &str = "nouser@nohostname";

const KEY_MATERIAL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Colon-separated uppercase MD5 of the decoded key material.
///
/// Returns an empty string when the key is blank or its first token is not
/// valid base64. Callers treat the empty fingerprint as a rejection.
pub fn fingerprint(key: &str) -> String {
    let Some(material) = key_material(key) else {
        return String::new();
    };

    let decoded = match KEY_MATERIAL.decode(material) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "Public key material is not valid base64");
            return String::new();
        }
    };

    let digest = Md5::digest(&decoded);
    digest
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// First whitespace-delimited token of a key line.
pub fn key_material(key: &str) -> Option<&str> {
    key.split_whitespace().next()
}

/// The `user@host` comment following the key material.
pub fn hostname_label(key: &str) -> &str {
    key.split_whitespace()
        .nth(1)
        .unwrap_or(DEFAULT_HOSTNAME_LABEL)
}

//! Default sealing primitive: HMAC-SHA256 signed envelopes.
//!
//! Envelope layout: `v1*<password id>*<base64url json>*<base64url mac>`.
//! The payload is integrity-protected, not encrypted. Hosts that need
//! confidentiality inject their own [`Sealer`].

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::auth::collaborators::{AuthIdentity, Sealer};
use crate::config::Password;
use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

const VERSION: &str = "v1";
const SEPARATOR: char = '*';

/// Generate a random sealing password (64 hex chars).
pub fn generate_password() -> Password {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Password::Secret(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Signs JSON-encoded identities with the configured password.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSealer;

impl HmacSealer {
    fn mac(password: &Password, signed: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(password.secret().as_bytes())
            .map_err(|e| AuthError::Seal(e.to_string()))?;
        mac.update(signed.as_bytes());
        Ok(mac)
    }
}

#[async_trait]
impl Sealer for HmacSealer {
    async fn seal(&self, identity: &AuthIdentity, password: &Password) -> Result<String, AuthError> {
        let json = serde_json::to_vec(identity).map_err(|e| AuthError::Seal(e.to_string()))?;
        let signed = format!(
            "{VERSION}{SEPARATOR}{}{SEPARATOR}{}",
            password.id(),
            URL_SAFE_NO_PAD.encode(json)
        );
        let tag = Self::mac(password, &signed)?.finalize().into_bytes();
        Ok(format!("{signed}{SEPARATOR}{}", URL_SAFE_NO_PAD.encode(tag)))
    }

    async fn unseal(&self, sealed: &str, password: &Password) -> Result<AuthIdentity, AuthError> {
        let (signed, tag) = sealed
            .rsplit_once(SEPARATOR)
            .ok_or_else(|| AuthError::Unseal("malformed envelope".into()))?;

        let mut parts = signed.splitn(3, SEPARATOR);
        let (version, id, payload) = match (parts.next(), parts.next(), parts.next()) {
            (Some(version), Some(id), Some(payload)) => (version, id, payload),
            _ => return Err(AuthError::Unseal("malformed envelope".into())),
        };
        if version != VERSION {
            return Err(AuthError::Unseal(format!("unsupported version {version}")));
        }
        if id != password.id() {
            return Err(AuthError::Unseal("unknown password id".into()));
        }

        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|e| AuthError::Unseal(e.to_string()))?;
        Self::mac(password, signed)
            .map_err(|e| AuthError::Unseal(e.to_string()))?
            .verify_slice(&tag)
            .map_err(|_| AuthError::Unseal("bad signature".into()))?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| AuthError::Unseal(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| AuthError::Unseal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn password() -> Password {
        Password::Secret("0123456789abcdef0123456789abcdef".into())
    }

    fn identity() -> AuthIdentity {
        AuthIdentity::new(json!({"user": "john", "scope": ["a"]}), json!({"token": "t"}))
    }

    #[tokio::test]
    async fn unseals_what_it_sealed() {
        let sealer = HmacSealer;
        let sealed = sealer.seal(&identity(), &password()).await.unwrap();
        assert!(sealed.starts_with("v1**"));
        assert_eq!(sealer.unseal(&sealed, &password()).await.unwrap(), identity());
    }

    #[tokio::test]
    async fn tampered_payload_is_rejected() {
        let sealer = HmacSealer;
        let sealed = sealer.seal(&identity(), &password()).await.unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"credentials":{"user":"admin"}}"#);
        let parts: Vec<&str> = sealed.split('*').collect();
        let forged = format!("{}*{}*{}*{}", parts[0], parts[1], forged_payload, parts[3]);

        assert_eq!(
            sealer.unseal(&forged, &password()).await,
            Err(AuthError::Unseal("bad signature".into()))
        );
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let sealer = HmacSealer;
        let sealed = sealer.seal(&identity(), &password()).await.unwrap();
        let other = Password::Secret("fedcba9876543210fedcba9876543210".into());
        assert!(sealer.unseal(&sealed, &other).await.is_err());
    }

    #[tokio::test]
    async fn rotating_password_id_must_match() {
        let sealer = HmacSealer;
        let current = Password::Rotating {
            id: "2".into(),
            secret: "0123456789abcdef0123456789abcdef".into(),
        };
        let previous = Password::Rotating {
            id: "1".into(),
            secret: "0123456789abcdef0123456789abcdef".into(),
        };
        let sealed = sealer.seal(&identity(), &current).await.unwrap();
        assert!(sealed.starts_with("v1*2*"));
        assert_eq!(
            sealer.unseal(&sealed, &previous).await,
            Err(AuthError::Unseal("unknown password id".into()))
        );
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        assert!(HmacSealer.unseal("not-a-token", &password()).await.is_err());
    }

    #[test]
    fn generated_passwords_are_long_and_distinct() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.secret().len(), 64);
        assert_ne!(a, b);
    }
}

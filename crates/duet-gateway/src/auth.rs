use jsonwebtoken::{DecodingKey, Validation, decode};

use duet_types::api::Claims;

/// Identity attached to a verified connection.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub name: String,
}

/// Seam to the external auth service. duet never issues tokens; it only
/// verifies them once, at connection-open time.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<AuthenticatedUser>;
}

pub struct JwtVerifier {
    secret: String,
}

impl JwtVerifier {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Option<AuthenticatedUser> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?;

        Some(AuthenticatedUser {
            id: data.claims.sub,
            name: data.claims.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, sub: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            name: "Alice".to_string(),
            // Far enough out that the default exp validation passes
            exp: 4_102_444_800,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_a_valid_token() {
        let verifier = JwtVerifier::new("secret".into());
        let user = verifier.verify(&token("secret", "alice")).unwrap();
        assert_eq!(user.id, "alice");
        assert_eq!(user.name, "Alice");
    }

    #[test]
    fn rejects_a_token_signed_with_another_secret() {
        let verifier = JwtVerifier::new("secret".into());
        assert!(verifier.verify(&token("other", "alice")).is_none());
        assert!(verifier.verify("not-a-token").is_none());
    }
}

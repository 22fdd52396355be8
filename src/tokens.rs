/// Action and session token issuing
///
/// Tokens are signed HS256 JWTs carrying the owning account id, a purpose
/// and an expiry; email-change tokens additionally embed the candidate
/// address. Sign/verify are pure — persistence of action tokens is the
/// caller's job, wrapping the value in an `ActionToken` row.
use crate::{
    db::models::TokenKind,
    error::{ServiceError, ServiceResult},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

const SESSION_PURPOSE: &str = "session";

/// Claims carried by every token this service signs
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Owning account id
    sub: String,
    purpose: String,
    /// Unique per mint, so re-issuing within the same second still
    /// produces a distinct value
    jti: String,
    iat: i64,
    exp: i64,
    /// Candidate address, present only on email-change tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
}

impl TokenIssuer {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Mint a signed action token for an account
    pub fn issue(
        &self,
        account_id: &str,
        kind: TokenKind,
        ttl: Duration,
    ) -> ServiceResult<String> {
        self.sign(account_id, kind.as_str(), ttl, None)
    }

    /// Mint an email-change token carrying the candidate address
    pub fn issue_email_change(
        &self,
        account_id: &str,
        new_email: &str,
        ttl: Duration,
    ) -> ServiceResult<String> {
        self.sign(
            account_id,
            TokenKind::ConfirmEmail.as_str(),
            ttl,
            Some(new_email.to_string()),
        )
    }

    /// Mint a session credential on successful login
    pub fn issue_session(&self, account_id: &str, ttl: Duration) -> ServiceResult<String> {
        self.sign(account_id, SESSION_PURPOSE, ttl, None)
    }

    /// Check signature, expiry, subject and purpose. Every failure
    /// collapses to `false` so callers cannot tell a forged value from
    /// an expired one.
    pub fn verify(&self, value: &str, account_id: &str, kind: TokenKind) -> bool {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        match decode::<Claims>(
            value,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => data.claims.sub == account_id && data.claims.purpose == kind.as_str(),
            Err(_) => false,
        }
    }

    /// Validate a session credential and return the account id
    pub fn verify_session(&self, value: &str) -> ServiceResult<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(
            value,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|_| ServiceError::InvalidCredentials)?;

        if data.claims.purpose != SESSION_PURPOSE {
            return Err(ServiceError::InvalidCredentials);
        }

        Ok(data.claims.sub)
    }

    /// Decode the embedded account id WITHOUT verifying. For routing
    /// lookups only — callers must still `verify` before trusting it.
    pub fn account_id(&self, value: &str) -> Option<String> {
        self.peek(value).map(|c| c.sub)
    }

    /// Decode the pending email WITHOUT verifying, same caveat as
    /// `account_id`
    pub fn pending_email(&self, value: &str) -> Option<String> {
        self.peek(value).and_then(|c| c.email)
    }

    fn sign(
        &self,
        account_id: &str,
        purpose: &str,
        ttl: Duration,
        email: Option<String>,
    ) -> ServiceResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: account_id.to_string(),
            purpose: purpose.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            email,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ServiceError::Internal(format!("Failed to sign token: {}", e)))
    }

    fn peek(&self, value: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(value, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .ok()
    }
}

/// Wrap a token value for transport in URLs. Reversible encoding for
/// transport safety only — the security guarantee is the signature.
pub fn encode_for_url(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

/// Build the link a notification embeds for an action token
pub fn action_url(public_url: &str, action: &str, token_value: &str) -> String {
    format!(
        "{}/accounts/{}?token={}",
        public_url,
        action,
        encode_for_url(token_value)
    )
}

/// Undo the transport encoding; garbage collapses to "not valid"
pub fn decode_from_url(encoded: &str) -> ServiceResult<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|_| ServiceError::InvalidOrExpiredToken)?;

    String::from_utf8(bytes).map_err(|_| ServiceError::InvalidOrExpiredToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new("test-secret-key-minimum-32-characters-long".to_string())
    }

    #[test]
    fn test_issue_then_verify_round_trip() {
        let issuer = issuer();
        let value = issuer
            .issue("acc-1", TokenKind::Register, Duration::hours(1))
            .unwrap();

        assert!(issuer.verify(&value, "acc-1", TokenKind::Register));
    }

    #[test]
    fn test_verify_rejects_wrong_account_purpose_and_expiry() {
        let issuer = issuer();
        let value = issuer
            .issue("acc-1", TokenKind::Register, Duration::hours(1))
            .unwrap();

        assert!(!issuer.verify(&value, "acc-2", TokenKind::Register));
        assert!(!issuer.verify(&value, "acc-1", TokenKind::ResetPassword));

        // Expired: issue with the ttl already behind us
        let expired = issuer
            .issue("acc-1", TokenKind::Register, Duration::hours(-2))
            .unwrap();
        assert!(!issuer.verify(&expired, "acc-1", TokenKind::Register));
    }

    #[test]
    fn test_verify_rejects_foreign_signature() {
        let issuer = issuer();
        let other = TokenIssuer::new("another-secret-key-minimum-32-chars-xx".to_string());

        let value = other
            .issue("acc-1", TokenKind::Register, Duration::hours(1))
            .unwrap();
        assert!(!issuer.verify(&value, "acc-1", TokenKind::Register));
    }

    #[test]
    fn test_peek_decodes_without_verification() {
        let issuer = issuer();
        let value = issuer
            .issue_email_change("acc-1", "new@example.com", Duration::hours(-1))
            .unwrap();

        // Expired, but routing decode still works
        assert_eq!(issuer.account_id(&value).as_deref(), Some("acc-1"));
        assert_eq!(
            issuer.pending_email(&value).as_deref(),
            Some("new@example.com")
        );
    }

    #[test]
    fn test_session_round_trip() {
        let issuer = issuer();
        let value = issuer.issue_session("acc-1", Duration::minutes(30)).unwrap();

        assert_eq!(issuer.verify_session(&value).unwrap(), "acc-1");

        // Action tokens are not session credentials
        let action = issuer
            .issue("acc-1", TokenKind::Register, Duration::hours(1))
            .unwrap();
        assert!(issuer.verify_session(&action).is_err());
    }

    #[test]
    fn test_url_transport_round_trip() {
        let issuer = issuer();
        let value = issuer
            .issue("acc-1", TokenKind::Register, Duration::hours(1))
            .unwrap();

        let encoded = encode_for_url(&value);
        assert_eq!(decode_from_url(&encoded).unwrap(), value);
        assert!(decode_from_url("!!!not-base64!!!").is_err());
    }
}

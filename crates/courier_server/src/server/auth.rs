#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use courier_domain::{Identity, ParseIdError, UserId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use crate::config::{SecretString, ServerSettings};

const TOKEN_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum AuthError {
	#[error("missing auth token")]
	MissingToken,

	#[error("invalid token: {0}")]
	InvalidToken(String),

	#[error("token expired")]
	Expired,

	#[error("invalid identity: {0}")]
	InvalidIdentity(#[from] ParseIdError),
}

impl AuthError {
	pub const fn code(&self) -> &'static str {
		match self {
			AuthError::MissingToken => "missing_token",
			AuthError::InvalidToken(_) => "invalid_token",
			AuthError::Expired => "token_expired",
			AuthError::InvalidIdentity(_) => "invalid_identity",
		}
	}
}

/// What the client presented in its hello.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
	pub auth_token: String,
	/// Declared identity; ignored by verifiers that carry their own.
	pub user_id: String,
	pub display_name: String,
}

impl Credentials {
	fn declared_identity(&self) -> Result<Identity, AuthError> {
		let user_id = UserId::new(self.user_id.trim())?;
		Ok(Identity::new(user_id, self.display_name.trim()))
	}
}

pub trait Authenticator: Send + Sync {
	fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
	pub sub: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Unix seconds.
	pub exp: u64,
}

/// Verifies `v1.<payload_b64>.<sig_b64>` tokens signed with HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct HmacAuthenticator {
	secret: SecretString,
}

impl HmacAuthenticator {
	pub fn new(secret: SecretString) -> Self {
		Self { secret }
	}
}

impl Authenticator for HmacAuthenticator {
	fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
		let claims = verify_hmac_token(credentials.auth_token.trim(), self.secret.expose())?;
		let user_id = UserId::new(claims.sub)?;
		Ok(Identity::new(user_id, claims.name.unwrap_or_default()))
	}
}

/// Shared-secret mode for development: a matching token admits whatever
/// identity the hello declares.
#[derive(Debug, Clone)]
pub struct StaticTokenAuthenticator {
	token: SecretString,
}

impl StaticTokenAuthenticator {
	pub fn new(token: SecretString) -> Self {
		Self { token }
	}
}

impl Authenticator for StaticTokenAuthenticator {
	fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
		if credentials.auth_token.is_empty() {
			return Err(AuthError::MissingToken);
		}
		if !constant_time_eq(credentials.auth_token.as_bytes(), self.token.expose().as_bytes()) {
			return Err(AuthError::InvalidToken("token mismatch".to_string()));
		}
		credentials.declared_identity()
	}
}

/// Authenticator assembled from `[server]` settings.
///
/// `v1.` tokens go to the HMAC verifier, anything else to the shared secret.
/// With neither configured the declared identity is trusted as-is.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredAuthenticator {
	hmac: Option<HmacAuthenticator>,
	shared: Option<StaticTokenAuthenticator>,
}

impl ConfiguredAuthenticator {
	pub fn new(hmac: Option<HmacAuthenticator>, shared: Option<StaticTokenAuthenticator>) -> Self {
		Self { hmac, shared }
	}

	pub fn from_settings(settings: &ServerSettings) -> Self {
		let auth = Self::new(
			settings.auth_hmac_secret.clone().map(HmacAuthenticator::new),
			settings.dev_auth_token.clone().map(StaticTokenAuthenticator::new),
		);
		if auth.is_open() {
			warn!("no authentication configured; clients are trusted to declare their identity");
		}
		auth
	}

	pub fn is_open(&self) -> bool {
		self.hmac.is_none() && self.shared.is_none()
	}
}

impl Authenticator for ConfiguredAuthenticator {
	fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
		if self.is_open() {
			return credentials.declared_identity();
		}

		let token = credentials.auth_token.trim();
		if token.is_empty() {
			return Err(AuthError::MissingToken);
		}

		let is_signed = token.starts_with("v1.");
		match (&self.hmac, &self.shared) {
			(Some(hmac), _) if is_signed => hmac.authenticate(credentials),
			(_, Some(shared)) => shared.authenticate(credentials),
			(Some(hmac), None) => hmac.authenticate(credentials),
			(None, None) => credentials.declared_identity(),
		}
	}
}

pub fn verify_hmac_token(token: &str, secret: &str) -> Result<AuthClaims, AuthError> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != TOKEN_VERSION {
		return Err(AuthError::InvalidToken("invalid token format".to_string()));
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD
		.decode(payload_b64)
		.map_err(|e| AuthError::InvalidToken(format!("decode token payload: {e}")))?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.as_bytes())?;
	let provided_sig = URL_SAFE_NO_PAD
		.decode(sig_b64)
		.map_err(|e| AuthError::InvalidToken(format!("decode token signature: {e}")))?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(AuthError::InvalidToken("invalid token signature".to_string()));
	}

	let claims: AuthClaims =
		serde_json::from_slice(&payload).map_err(|e| AuthError::InvalidToken(format!("parse token claims: {e}")))?;
	let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
	if claims.exp <= now {
		return Err(AuthError::Expired);
	}

	Ok(claims)
}

/// Mint a token the HMAC verifier accepts.
#[cfg(test)]
pub fn issue_hmac_token(claims: &AuthClaims, secret: &str) -> Result<String, AuthError> {
	let payload = serde_json::to_vec(claims).map_err(|e| AuthError::InvalidToken(format!("encode claims: {e}")))?;
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig = sign(payload_b64.as_bytes(), secret.as_bytes())?;
	Ok(format!("{TOKEN_VERSION}.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig)))
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Result<Vec<u8>, AuthError> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|e| AuthError::InvalidToken(format!("hmac key: {e}")))?;
	mac.update(payload_b64);
	Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

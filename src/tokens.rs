use crate::errors::LudoraError;
use crate::settings::Keys;
use base64ct::Encoding;
use chrono::Utc;
use josekit::jwk::Jwk;
use josekit::jws::{JwsHeader, RS256};
use josekit::jwt;
use josekit::jwt::JwtPayload;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;

/// `type` claim carried by portal-issued admin tokens.
pub const ANONYMOUS_ADMIN_TYPE: &str = "anonymous_admin";

/// Claims of an anonymous-admin token after signature verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminTokenClaims {
    #[serde(rename = "type")]
    pub token_type: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// RFC 7519 `aud`: a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// True when at least one audience value appears in the allow-list.
    pub fn matches(&self, allowed: &[String]) -> bool {
        match self {
            Audience::One(aud) => allowed.iter().any(|a| a == aud),
            Audience::Many(auds) => auds.iter().any(|aud| allowed.iter().any(|a| a == aud)),
        }
    }
}

#[derive(Clone)]
pub struct TokenManager {
    public_jwks_value: Arc<Value>,
    private_jwk: Arc<Jwk>,
    public_jwk: Arc<Jwk>,
}

impl TokenManager {
    pub async fn new(cfg: Keys) -> Result<Self, LudoraError> {
        // Ensure parent dirs exist
        if let Some(parent) = cfg.jwks_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = cfg.private_key_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // If private key exists, load it; otherwise generate and persist both private and public
        let private_jwk = if cfg.private_key_path.exists() {
            let s = fs::read_to_string(&cfg.private_key_path)?;
            // Stored as JSON
            serde_json::from_str::<Jwk>(&s)?
        } else {
            let mut jwk = Jwk::generate_rsa_key(2048)?;
            let kid = cfg.key_id.clone().unwrap_or_else(random_kid);
            jwk.set_key_id(&kid);
            jwk.set_algorithm(cfg.alg.as_str());
            jwk.set_key_use("sig");
            // Persist private key as JSON
            let priv_json = serde_json::to_string_pretty(&jwk)?;
            fs::write(&cfg.private_key_path, priv_json)?;
            jwk
        };

        let public_jwk = private_jwk.to_public_key()?;

        // Ensure JWKS file exists or update from private_jwk
        if !cfg.jwks_path.exists() {
            let jwk_val: Value = serde_json::to_value(&public_jwk)?;
            let jwks = json!({ "keys": [jwk_val] });
            fs::write(&cfg.jwks_path, serde_json::to_string_pretty(&jwks)?)?;
        }

        // Load public JWKS value
        let public_jwks_value: Value = serde_json::from_str(&fs::read_to_string(&cfg.jwks_path)?)?;

        Ok(Self {
            public_jwks_value: Arc::new(public_jwks_value),
            private_jwk: Arc::new(private_jwk),
            public_jwk: Arc::new(public_jwk),
        })
    }

    pub fn jwks_json(&self) -> Value {
        (*self.public_jwks_value).clone()
    }

    pub fn sign_rs256(&self, payload: &JwtPayload) -> Result<String, LudoraError> {
        let signer = RS256.signer_from_jwk(&self.private_jwk)?;
        let mut header = JwsHeader::new();
        if let Some(kid) = self.private_jwk.key_id() {
            header.set_key_id(kid);
        }
        header.set_algorithm("RS256");
        let token = jwt::encode_with_signer(payload, &header, &signer)?;
        Ok(token)
    }

    /// Mint a short-lived anonymous-admin token for an allow-listed portal.
    pub fn issue_anonymous_admin(
        &self,
        audience: &str,
        ttl_secs: i64,
    ) -> Result<String, LudoraError> {
        let now = Utc::now().timestamp();
        let mut payload = JwtPayload::new();
        payload.set_claim("type", Some(json!(ANONYMOUS_ADMIN_TYPE)))?;
        payload.set_audience(vec![audience.to_string()]);
        payload.set_claim("iat", Some(json!(now)))?;
        payload.set_claim("exp", Some(json!(now + ttl_secs)))?;
        payload.set_claim("jti", Some(json!(random_kid())))?;
        self.sign_rs256(&payload)
    }

    /// Validate an anonymous-admin token. Returns `None` on any failure:
    /// bad signature, wrong `type`, expired `exp`, or an audience outside the
    /// allow-list. Never errors.
    pub fn verify_anonymous_admin(
        &self,
        token: &str,
        allowed_audiences: &[String],
    ) -> Option<AdminTokenClaims> {
        let verifier = RS256.verifier_from_jwk(&self.public_jwk).ok()?;
        let (payload, _header) = jwt::decode_with_verifier(token, &verifier).ok()?;
        let claims: AdminTokenClaims =
            serde_json::from_value(Value::Object(payload.claims_set().clone())).ok()?;
        if claims.token_type != ANONYMOUS_ADMIN_TYPE {
            return None;
        }
        if Utc::now().timestamp() >= claims.exp {
            return None;
        }
        if !claims.aud.matches(allowed_audiences) {
            return None;
        }
        Some(claims)
    }
}

fn random_kid() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

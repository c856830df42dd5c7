// HS256 access tokens carried by diagram clients as `?token=`.
//
// Claims follow the access-token layout most web back ends already issue:
// `token_type: "access"`, the user in `user_id` (or `sub`), `iat`, `exp` and
// a `jti`. Refresh tokens signed with the same secret are refused.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;
pub const MIN_SECRET_BYTES: usize = 32;

const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    exp: i64,
    #[serde(default)]
    iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
}

impl AccessClaims {
    fn user(&self) -> anyhow::Result<Uuid> {
        if let Some(token_type) = self.token_type.as_deref() {
            if token_type != ACCESS_TOKEN_TYPE {
                bail!("token type '{token_type}' is not an access token");
            }
        }

        let subject = self
            .user_id
            .as_deref()
            .or(self.sub.as_deref())
            .ok_or_else(|| anyhow!("access token names no user"))?;

        Uuid::parse_str(subject)
            .with_context(|| format!("access token user '{subject}' is not a UUID"))
    }
}

#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < MIN_SECRET_BYTES {
            bail!("jwt secret must be at least {MIN_SECRET_BYTES} bytes long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Issue an access token for `user_id`. Used by tests and local tooling;
    /// production tokens normally come from the account service.
    pub fn issue_user_token(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = unix_now()?;
        self.sign(&AccessClaims {
            token_type: Some(ACCESS_TOKEN_TYPE.to_string()),
            user_id: Some(user_id.to_string()),
            sub: None,
            exp: now + ACCESS_TOKEN_TTL_SECONDS,
            iat: now,
            jti: Some(Uuid::new_v4().simple().to_string()),
        })
    }

    pub fn validate_user_token(&self, token: &str) -> anyhow::Result<Uuid> {
        decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims
            .user()
    }

    fn sign(&self, claims: &AccessClaims) -> anyhow::Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .context("failed to encode access token")
    }
}

fn unix_now() -> anyhow::Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;
    i64::try_from(elapsed.as_secs()).context("unix timestamp overflow")
}

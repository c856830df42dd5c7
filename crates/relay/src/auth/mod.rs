pub mod jwt;

use tracing::debug;
use uuid::Uuid;

use self::jwt::JwtAccessTokenService;

/// Actor for a connection: the token's user, or anonymous (`None`) when the
/// token is missing or does not validate. Connections are never refused here.
pub fn resolve_actor(jwt: &JwtAccessTokenService, token: Option<&str>) -> Option<Uuid> {
    let token = token.map(str::trim).filter(|token| !token.is_empty())?;

    match jwt.validate_user_token(token) {
        Ok(user_id) => Some(user_id),
        Err(error) => {
            debug!(error = %format!("{error:#}"), "ignoring invalid access token; connecting anonymously");
            None
        }
    }
}

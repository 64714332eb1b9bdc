use crate::application::services::trading_service::{ApiResponse, FailureKind};
use crate::domain::entities::account::AccountId;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Header carrying the caller's validated account id
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";

/// Caller identity established upstream and forwarded in `x-account-id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountIdentity(pub AccountId);

impl AccountIdentity {
    pub fn account_id(&self) -> AccountId {
        self.0
    }
}

fn parse_account_id(raw: &str) -> Option<AccountId> {
    match raw.trim().parse::<AccountId>() {
        Ok(id) if id > 0 => Some(id),
        _ => None,
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AccountIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiResponse<()>;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(ACCOUNT_ID_HEADER)
            .and_then(|v| v.to_str().ok());

        match header {
            Some(raw) => match parse_account_id(raw) {
                Some(id) => Ok(AccountIdentity(id)),
                None => {
                    tracing::warn!("Invalid {} header: {:?}", ACCOUNT_ID_HEADER, raw);
                    Err(ApiResponse::fail(
                        FailureKind::Unauthorized,
                        "Invalid account identity",
                    ))
                }
            },
            None => {
                tracing::warn!("Missing {} header", ACCOUNT_ID_HEADER);
                Err(ApiResponse::fail(
                    FailureKind::Unauthorized,
                    "Missing account identity",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<AccountIdentity, ApiResponse<()>> {
        let mut builder = Request::builder().uri("/dashboard");
        if let Some(value) = header {
            builder = builder.header(ACCOUNT_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AccountIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_valid_identity() {
        assert_eq!(extract(Some("7")).await.unwrap(), AccountIdentity(7));
        assert_eq!(extract(Some(" 12 ")).await.unwrap().account_id(), 12);
    }

    #[tokio::test]
    async fn test_missing_or_invalid_identity() {
        for header in [None, Some(""), Some("abc"), Some("0"), Some("-3")] {
            let rejection = extract(header).await.unwrap_err();
            assert!(!rejection.success);
            assert_eq!(rejection.failure, Some(FailureKind::Unauthorized));
        }
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Control-plane and request-plane error kinds. Control-loop callers log and
/// continue; HTTP handlers map each kind onto a status code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config parse: {0}")]
    ConfigParse(String),

    #[error("cluster api unavailable: {0}")]
    ApiUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("proxy: {0}")]
    Proxy(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Proxy(_) => StatusCode::BAD_GATEWAY,
            Error::ConfigParse(_) | Error::ApiUnavailable(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) => match resp.code {
                404 => Error::NotFound(resp.message.clone()),
                409 => Error::Conflict(resp.message.clone()),
                403 => Error::Forbidden(resp.message.clone()),
                _ => Error::ApiUnavailable(e.to_string()),
            },
            _ => Error::ApiUnavailable(e.to_string()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.http_status(), self.to_string()).into_response()
    }
}

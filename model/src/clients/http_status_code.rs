pub use http::StatusCode;
use kube::Error;

/// Classifies errors by the HTTP status code the Kubernetes API server answered with, if any.
pub trait HttpStatusCode {
    fn status_code(&self) -> Option<StatusCode>;

    fn is_status_code(&self, status_code: StatusCode) -> bool {
        self.status_code()
            .map(|some| some == status_code)
            .unwrap_or_default()
    }

    /// The object does not exist (404).
    fn is_not_found(&self) -> bool {
        self.is_status_code(StatusCode::NOT_FOUND)
    }

    /// The object already exists (409).
    fn is_conflict(&self) -> bool {
        self.is_status_code(StatusCode::CONFLICT)
    }
}

impl HttpStatusCode for kube::Error {
    fn status_code(&self) -> Option<StatusCode> {
        if let Error::Api(error_response) = self {
            StatusCode::from_u16(error_response.code).ok()
        } else {
            None
        }
    }
}

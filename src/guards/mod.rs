mod authenticated_user;
mod basic_auth;

use anyhow::anyhow;
pub use authenticated_user::*;
pub use basic_auth::*;
use rocket::http::Status;

/// Why a guard refused the request, and the status to answer with.
type Rejection = (Status, anyhow::Error);

trait RejectWith<T> {
    fn reject_with(self, status: Status, reason: &'static str) -> Result<T, Rejection>;
}

impl<T, E> RejectWith<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn reject_with(self, status: Status, reason: &'static str) -> Result<T, Rejection> {
        self.map_err(|e| (status, e.into().context(reason)))
    }
}

impl<T> RejectWith<T> for Option<T> {
    fn reject_with(self, status: Status, reason: &'static str) -> Result<T, Rejection> {
        self.ok_or_else(|| (status, anyhow!(reason)))
    }
}

mod health;
mod subscriptions;
mod workflows;

pub use health::*;
pub use subscriptions::*;
pub use workflows::*;

/// Success envelope shared by every JSON endpoint.
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(serde::Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

pub(crate) fn json_error(
    status: rocket::http::Status,
    message: impl Into<String>,
) -> rocket::response::Result<'static> {
    let body = serde_json::to_string(&ErrorBody::new(message))
        .map_err(|_| rocket::http::Status::InternalServerError)?;
    rocket::Response::build()
        .status(status)
        .header(rocket::http::ContentType::JSON)
        .sized_body(body.len(), std::io::Cursor::new(body))
        .ok()
}

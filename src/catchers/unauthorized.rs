use crate::routes::ErrorBody;
use rocket::http::Header;
use rocket::serde::json::Json;
use rocket::Request;

const REALM: &str = r#"Basic realm="subscriptions", charset="UTF-8""#;

/// Every 401 carries a Basic challenge so clients know to send credentials.
#[catch(401)]
pub fn unauthorized_request_credentials(req: &Request) -> CredentialsChallenge {
    CredentialsChallenge {
        body: Json(ErrorBody::new(format!(
            "Valid credentials are required for {}",
            req.uri().path()
        ))),
        challenge: Header::new("WWW-Authenticate", REALM),
    }
}

#[derive(Responder)]
#[response(status = 401)]
pub struct CredentialsChallenge {
    body: Json<ErrorBody>,
    challenge: Header<'static>,
}

use crate::routes::ErrorBody;
use rocket::response::status;
use rocket::response::status::BadRequest;
use rocket::serde::json::Json;
use rocket::Request;

/// Rocket answers 422 when a JSON body does not deserialize; clients get a
/// plain 400 like any other validation failure.
#[catch(422)]
pub fn unprocessable_entity_to_bad_request(_req: &Request) -> BadRequest<Json<ErrorBody>> {
    status::BadRequest(Some(Json(ErrorBody::new("The request body is malformed"))))
}

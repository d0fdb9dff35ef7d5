use crate::routes::ErrorBody;
use rocket::serde::json::Json;
use rocket::Request;

#[catch(404)]
pub fn not_found(req: &Request) -> Json<ErrorBody> {
    Json(ErrorBody::new(format!("No route for {}", req.uri().path())))
}

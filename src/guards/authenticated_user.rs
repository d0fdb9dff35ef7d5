use crate::guards::{BasicAuth, Rejection, RejectWith};
use crate::models::User;
use crate::startup::TrackerDbConn;
use anyhow::anyhow;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use diesel::OptionalExtension;
use diesel::{ExpressionMethods, PgConnection, QueryDsl, RunQueryDsl};
use rocket::http::Status;
use rocket::outcome::try_outcome;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;
use secrecy::ExposeSecret;
use uuid::Uuid;

/// A user whose Basic credentials matched a stored argon2 hash.
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    // prevents construction outside of this module
    _private: (),
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = anyhow::Error;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let conn = try_outcome!(request
            .guard::<TrackerDbConn>()
            .await
            .map_failure(|_| (
                Status::InternalServerError,
                anyhow!("Failed to retrieve a connection from the DB pool.")
            )));
        let basic_auth = try_outcome!(request.guard::<BasicAuth>().await);

        match from_request_result(basic_auth, conn).await {
            Ok(user) => Outcome::Success(user),
            Err(failure) => Outcome::Failure(failure),
        }
    }
}

#[tracing::instrument(name = "Validate credentials", skip(basic_auth, conn), fields(email = %basic_auth.email))]
async fn from_request_result(
    basic_auth: BasicAuth,
    conn: TrackerDbConn,
) -> Result<AuthenticatedUser, Rejection> {
    conn.run(move |conn: &mut PgConnection| {
        use crate::schema::users;

        let user = users::table
            .filter(users::email.eq(&basic_auth.email))
            .first::<User>(conn)
            .optional()
            .reject_with(
                Status::InternalServerError,
                "Failed to perform a query to validate auth credentials.",
            )?
            .reject_with(Status::Unauthorized, "Invalid email or password.")?;

        verify_password_hash(&user.password_hash, basic_auth.password.expose_secret())?;

        Ok(AuthenticatedUser {
            user_id: user.user_id,
            name: user.name,
            email: user.email,
            _private: (),
        })
    })
    .await
}

fn verify_password_hash(
    expected_password_hash: &str,
    password_candidate: &str,
) -> Result<(), Rejection> {
    let expected_password_hash = PasswordHash::new(expected_password_hash)
        .map_err(|e| anyhow!(e.to_string()))
        .reject_with(Status::InternalServerError, "Failed to parse hash in PHC string format.")?;
    Argon2::default()
        .verify_password(password_candidate.as_bytes(), &expected_password_hash)
        .map_err(|e| anyhow!(e.to_string()))
        .reject_with(Status::Unauthorized, "Invalid email or password.")
}

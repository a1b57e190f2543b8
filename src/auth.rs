use crate::config::Config;
use crate::db::Db;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;

/// The authenticated caller, resolved from the `x-api-key` header via a single
/// key-to-agent lookup. Unknown or missing key -> request guard failure, which
/// route handlers turn into a 401 by matching on `Outcome::Error`.
pub struct Caller(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Caller {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(key) = req.headers().get_one("x-api-key") else {
            return Outcome::Error((rocket::http::Status::Unauthorized, ()));
        };
        let db = req.guard::<&State<Db>>().await.unwrap();
        let conn = db.conn.lock().unwrap();
        let name: Option<String> = conn
            .query_row("SELECT name FROM agents WHERE api_key = ?1", [key], |r| r.get(0))
            .ok();
        match name {
            Some(name) => Outcome::Success(Caller(name)),
            None => Outcome::Error((rocket::http::Status::Unauthorized, ())),
        }
    }
}

/// Same resolution as `Caller`, but missing/invalid key is not a failure —
/// used by the handful of read-only endpoints that allow anonymous access.
pub struct OptionalCaller(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for OptionalCaller {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(key) = req.headers().get_one("x-api-key") else {
            return Outcome::Success(OptionalCaller(None));
        };
        let db = req.guard::<&State<Db>>().await.unwrap();
        let conn = db.conn.lock().unwrap();
        let name: Option<String> = conn
            .query_row("SELECT name FROM agents WHERE api_key = ?1", [key], |r| r.get(0))
            .ok();
        Outcome::Success(OptionalCaller(name))
    }
}

/// Marker guard for admin-only endpoints: the `x-admin-secret` header must
/// match the configured secret. If no secret is configured, admin endpoints
/// always reject.
pub struct AdminAuthorized;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminAuthorized {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = req.guard::<&State<Config>>().await.unwrap();
        let Some(expected) = &config.admin_secret else {
            return Outcome::Error((rocket::http::Status::Forbidden, ()));
        };
        match req.headers().get_one("x-admin-secret") {
            Some(provided) if provided == expected => Outcome::Success(AdminAuthorized),
            _ => Outcome::Error((rocket::http::Status::Forbidden, ())),
        }
    }
}

/// Checks a secret supplied in a request body (used by `POST /register`,
/// which accepts the admin secret either as a header or inline).
pub fn admin_secret_matches(config: &Config, provided: Option<&str>) -> bool {
    match (&config.admin_secret, provided) {
        (Some(expected), Some(provided)) => expected == provided,
        _ => false,
    }
}

use rocket::{
    serde::json::{Error as JsonError, Json},
    Route,
};

use crate::error::{Error, Result};

pub mod public;
pub mod session;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(public::routes());
    routes.extend(session::routes());
    routes
}

/// Unwrap a JSON request body, reporting a malformed one as a JSON error
/// rather than through rocket's default catcher.
///
/// Parser messages can quote the offending value, which may be an identity
/// number, so only its position is reported.
fn body<T>(request: std::result::Result<Json<T>, JsonError<'_>>) -> Result<T> {
    request.map(Json::into_inner).map_err(|e| match e {
        JsonError::Io(_) => Error::BadRequest("Failed to read request body".to_string()),
        JsonError::Parse(_, e) => Error::BadRequest(format!(
            "Malformed request body at line {} column {}",
            e.line(),
            e.column()
        )),
    })
}

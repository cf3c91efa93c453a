use rocket::{
    http::{Cookie, CookieJar, SameSite, Status},
    serde::json::Json,
    Route, State,
};

use crate::error::{Error, Result};
use crate::model::{
    api::{BallotReceipt, SelectRequest, VerifyRequest},
    service::SharedService,
    session::{SessionId, SessionStore, SharedSession},
    workflow::{SessionView, VerificationSession},
};

use super::body;

/// Private cookie holding the caller's [`SessionId`].
pub const SESSION_COOKIE: &str = "session";

pub fn routes() -> Vec<Route> {
    routes![start, view, end, verify, proceed, select, back, confirm, cancel]
}

fn session_cookie(id: SessionId) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, id.to_string())
        .http_only(true)
        .same_site(SameSite::Strict)
        .finish()
}

/// The session named by the caller's cookie, if it is still live.
fn current_session(
    cookies: &CookieJar<'_>,
    sessions: &SessionStore,
) -> Result<(SessionId, SharedSession)> {
    let id = cookies
        .get_private(SESSION_COOKIE)
        .and_then(|cookie| cookie.value().parse::<SessionId>().ok())
        .ok_or(Error::NoSession)?;
    let session = sessions.get(id).ok_or(Error::NoSession)?;
    Ok((id, session))
}

/// Begin a new session, replacing any the caller already had.
#[post("/session")]
async fn start(
    cookies: &CookieJar<'_>,
    sessions: &State<SessionStore>,
) -> (Status, Json<SessionView>) {
    if let Ok((old, _)) = current_session(cookies, sessions) {
        sessions.end(old);
    }
    let id = sessions.start();
    cookies.add_private(session_cookie(id));
    debug!("Started session {id}");
    (Status::Created, Json(VerificationSession::new().view()))
}

#[get("/session")]
async fn view(
    cookies: &CookieJar<'_>,
    sessions: &State<SessionStore>,
) -> Result<Json<SessionView>> {
    let (_, session) = current_session(cookies, sessions)?;
    let view = session.lock().await.view();
    Ok(Json(view))
}

/// Discard the session and anything entered into it.
#[delete("/session")]
async fn end(cookies: &CookieJar<'_>, sessions: &State<SessionStore>) -> Result<Status> {
    let (id, _) = current_session(cookies, sessions)?;
    sessions.end(id);
    cookies.remove_private(Cookie::named(SESSION_COOKIE));
    debug!("Ended session {id}");
    Ok(Status::NoContent)
}

/// Enter an identity and check it.
///
/// A `not_eligible` or `already_voted` finding is a successful check; it is
/// reported in the returned view rather than as an error.
#[post("/session/verify", data = "<request>", format = "json")]
async fn verify(
    request: std::result::Result<Json<VerifyRequest>, rocket::serde::json::Error<'_>>,
    cookies: &CookieJar<'_>,
    sessions: &State<SessionStore>,
    service: &State<SharedService>,
) -> Result<Json<SessionView>> {
    let request = body(request)?;
    let (_, session) = current_session(cookies, sessions)?;
    let mut session = session.lock().await;
    session.set_input(request.identity.as_str(), request.consent)?;
    service.run_verify(&mut session).await?;
    Ok(Json(session.view()))
}

#[post("/session/proceed")]
async fn proceed(
    cookies: &CookieJar<'_>,
    sessions: &State<SessionStore>,
) -> Result<Json<SessionView>> {
    let (_, session) = current_session(cookies, sessions)?;
    let mut session = session.lock().await;
    session.proceed_to_vote()?;
    Ok(Json(session.view()))
}

#[post("/session/select", data = "<request>", format = "json")]
async fn select(
    request: std::result::Result<Json<SelectRequest>, rocket::serde::json::Error<'_>>,
    cookies: &CookieJar<'_>,
    sessions: &State<SessionStore>,
    service: &State<SharedService>,
) -> Result<Json<SessionView>> {
    let request = body(request)?;
    if !service.choices().contains(&request.choice) {
        return Err(Error::UnknownChoice(request.choice));
    }
    let (_, session) = current_session(cookies, sessions)?;
    let mut session = session.lock().await;
    session.select_choice(request.choice)?;
    Ok(Json(session.view()))
}

#[post("/session/back")]
async fn back(
    cookies: &CookieJar<'_>,
    sessions: &State<SessionStore>,
) -> Result<Json<SessionView>> {
    let (_, session) = current_session(cookies, sessions)?;
    let mut session = session.lock().await;
    session.back()?;
    Ok(Json(session.view()))
}

/// Commit the selected choice.
#[post("/session/confirm")]
async fn confirm(
    cookies: &CookieJar<'_>,
    sessions: &State<SessionStore>,
    service: &State<SharedService>,
) -> Result<Json<BallotReceipt>> {
    let (_, session) = current_session(cookies, sessions)?;
    let mut session = session.lock().await;
    let record = service.run_commit(&mut session).await?;
    Ok(Json(record.into()))
}

/// Return to a blank `input` state without ending the session.
#[post("/session/cancel")]
async fn cancel(
    cookies: &CookieJar<'_>,
    sessions: &State<SessionStore>,
) -> Result<Json<SessionView>> {
    let (_, session) = current_session(cookies, sessions)?;
    let mut session = session.lock().await;
    session.cancel();
    Ok(Json(session.view()))
}

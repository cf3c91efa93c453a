use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use rocket::{
    fairing::{Fairing, Info, Kind},
    http::{Header, StatusClass},
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};

use crate::model::service::SharedService;

/// Response header carrying the [`RequestId`], for matching client reports to server logs.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// A unique identifier for a particular request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub u64);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// Atomically get the next ID.
    pub fn next() -> RequestId {
        static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        RequestId(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r RequestId {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(req.local_cache(RequestId::next))
    }
}

/// A rocket fairing that logs every request and response, and the state of
/// the election at launch and shutdown.
///
/// Nothing logged here ever includes a request body, so identity numbers
/// cannot leak through it.
#[derive(Debug, Copy, Clone)]
pub struct LoggerFairing;

#[rocket::async_trait]
impl Fairing for LoggerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Logger",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let protocol = if rocket.config().tls_enabled() {
            "https"
        } else {
            "http"
        };
        let ip = &rocket.config().address;
        let port = &rocket.config().port;
        info!("Server launched on {protocol}://{ip}:{port}");
        if let Some(service) = rocket.state::<SharedService>() {
            info!(
                "Election is {} with {} choices on the ballot",
                service.phase(),
                service.choices().len()
            );
        }
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        let id = req.local_cache(RequestId::next);
        let method = req.method();
        // Only the path; query strings are never logged.
        let path = req.uri().path();
        info!("->req{id} {method} {path}");
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let id = req.local_cache(RequestId::next);
        let code = res.status();
        let route = match req.route() {
            Some(r) => match r.name {
                Some(ref name) => format!("{name} ({})", r.uri),
                None => r.uri.to_string(),
            },
            None => "UNKNOWN ROUTE".to_string(),
        };
        res.set_header(Header::new(REQUEST_ID_HEADER, id.to_string()));

        let log_msg = format!("<-rsp{id} {code} {route}");
        match code.class() {
            StatusClass::ServerError => error!("{log_msg}"),
            StatusClass::ClientError => warn!("{log_msg}"),
            _ => info!("{log_msg}"),
        }
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested, stopping gracefully...");
        if let Some(service) = rocket.state::<SharedService>() {
            match service.tally().await {
                Ok(tally) => info!(
                    "Final ledger: {} ballots committed, {} duplicates blocked",
                    tally.total_committed, tally.blocked_duplicates
                ),
                Err(e) => warn!("Could not read ledger on shutdown: {e}"),
            }
        }
    }
}

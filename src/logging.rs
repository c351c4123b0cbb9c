use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{error, info, warn, Level};
use rocket::{
    fairing::{Fairing, Info, Kind},
    http::{Status, StatusClass},
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};

/// A unique identifier for a particular request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub usize);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// Atomically get the next ID, wrapping back to zero past `usize::MAX`.
    pub fn next() -> RequestId {
        static REQUEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
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

/// When a request arrived.
#[derive(Debug, Copy, Clone)]
struct Arrival(Instant);

impl Arrival {
    fn now() -> Self {
        Self(Instant::now())
    }
}

/// What a response means for the code it concerns, for the OTP routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OtpOutcome {
    Issued,
    Resent,
    Verified,
    Malformed,
    NoCode,
    Rejected,
    RateLimited,
    Undelivered,
    StoreDown,
}

impl OtpOutcome {
    /// Classify a response from the route named `route`.
    /// Returns `None` for routes that do not handle codes and for unexpected statuses.
    pub fn classify(route: &str, status: Status) -> Option<Self> {
        if !matches!(route, "issue" | "resend" | "verify") {
            return None;
        }
        let outcome = match status.code {
            200 => match route {
                "issue" => Self::Issued,
                "resend" => Self::Resent,
                _ => Self::Verified,
            },
            400 | 422 => Self::Malformed,
            401 => Self::Rejected,
            404 => Self::NoCode,
            429 => Self::RateLimited,
            502 => Self::Undelivered,
            503 => Self::StoreDown,
            _ => return None,
        };
        Some(outcome)
    }

    /// Rejections and rate limiting are logged as ordinary traffic.
    fn level(self) -> Level {
        match self {
            Self::Undelivered | Self::StoreDown => Level::Error,
            Self::Malformed | Self::NoCode => Level::Warn,
            _ => Level::Info,
        }
    }
}

impl Display for OtpOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Issued => "code issued",
            Self::Resent => "code resent",
            Self::Verified => "code verified",
            Self::Malformed => "malformed request",
            Self::NoCode => "no code to resend",
            Self::Rejected => "code rejected",
            Self::RateLimited => "resend limit reached",
            Self::Undelivered => "code not delivered",
            Self::StoreDown => "store unavailable",
        };
        f.write_str(label)
    }
}

/// A rocket fairing that logs every request and response, tagging OTP
/// responses with their outcome.
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
        info!("OurWill verification service listening on {protocol}://{ip}:{port}");
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        let id = req.local_cache(RequestId::next);
        req.local_cache(Arrival::now);
        info!("->req{id} {} {}", req.method(), req.uri());
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let id = req.local_cache(RequestId::next);
        let elapsed = req.local_cache(Arrival::now).0.elapsed().as_millis();
        let status = res.status();
        let name = req.route().and_then(|route| route.name.as_deref());

        match name.and_then(|name| OtpOutcome::classify(name, status)) {
            Some(outcome) => log::log!(
                outcome.level(),
                "<-rsp{id} {status} {outcome} in {elapsed}ms"
            ),
            None => {
                let route = match req.route() {
                    Some(route) => route.uri.to_string(),
                    None => "UNKNOWN ROUTE".to_string(),
                };
                let message = format!("<-rsp{id} {status} {route} in {elapsed}ms");
                match status.class() {
                    StatusClass::ServerError => error!("{message}"),
                    StatusClass::ClientError => warn!("{message}"),
                    _ => info!("{message}"),
                }
            }
        }
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested, stopping gracefully...");
    }
}

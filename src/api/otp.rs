use log::debug;
use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    logging::RequestId,
    model::{
        api::otp::{IssueResponse, SubjectRequest, VerifyRequest, VerifyResponse},
        subject::Subject,
    },
    service::OtpService,
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![issue, resend, verify]
}

#[post("/otp/issue", data = "<request>", format = "json")]
pub async fn issue(
    id: &RequestId,
    request: Json<SubjectRequest>,
    service: &State<OtpService>,
    config: &State<Config>,
) -> Result<Json<IssueResponse>> {
    let subject: Subject = request.subject.parse()?;
    let issued = service.issue(&subject).await?;
    debug!("req{id} code valid until {}", issued.expires_at);
    Ok(Json(IssueResponse::new(issued, config.expose_codes())))
}

#[post("/otp/resend", data = "<request>", format = "json")]
pub async fn resend(
    id: &RequestId,
    request: Json<SubjectRequest>,
    service: &State<OtpService>,
    config: &State<Config>,
) -> Result<Json<IssueResponse>> {
    let subject: Subject = request.subject.parse()?;
    let issued = service.resend(&subject).await?;
    debug!("req{id} code valid until {}", issued.expires_at);
    Ok(Json(IssueResponse::new(issued, config.expose_codes())))
}

#[post("/otp/verify", data = "<request>", format = "json")]
pub async fn verify(
    id: &RequestId,
    request: Json<VerifyRequest>,
    service: &State<OtpService>,
) -> Result<Json<VerifyResponse>> {
    let subject: Subject = request.subject.parse()?;
    let verified = service.verify(&subject, &request.code).await?;
    let channel = if verified.is_email() { "email" } else { "SMS" };
    debug!("req{id} verified {channel} subject");
    Ok(Json(VerifyResponse::new(verified)))
}

use rocket::{http::Status, serde::json::Json, Catcher, Request};

use crate::model::api::otp::Failure;

pub fn catchers() -> Vec<Catcher> {
    catchers![unreadable, malformed, fallback]
}

const MALFORMED_BODY: &str = "Invalid input: malformed request body";

/// Bodies that are not JSON at all.
#[catch(400)]
fn unreadable(_req: &Request) -> Json<Failure> {
    Json(Failure::new(MALFORMED_BODY))
}

/// JSON bodies without the shape a route expects.
#[catch(422)]
fn malformed(_req: &Request) -> Json<Failure> {
    Json(Failure::new(MALFORMED_BODY))
}

/// Everything else keeps its status and gets the usual failure body.
#[catch(default)]
fn fallback(status: Status, _req: &Request) -> (Status, Json<Failure>) {
    let reason = status.reason().unwrap_or("Unknown error");
    (status, Json(Failure::new(reason)))
}

#[cfg(test)]
mod tests {
    use rocket::{http::ContentType, local::asynchronous::Client};

    use super::*;

    #[backend_test]
    async fn malformed_body_is_json_failure(client: Client) {
        let response = client
            .post("/otp/issue")
            .header(ContentType::JSON)
            .body("{\"not_subject\": 1}")
            .dispatch()
            .await;

        assert_eq!(Status::UnprocessableEntity, response.status());
        let failure: Failure = response.into_json().await.unwrap();
        assert!(!failure.success);
        assert!(failure.error.starts_with("Invalid input"));
    }

    #[backend_test]
    async fn unparseable_body_matches_wrong_shape(client: Client) {
        let unparseable = client
            .post("/otp/verify")
            .header(ContentType::JSON)
            .body("{not json}")
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, unparseable.status());
        let unparseable: Failure = unparseable.into_json().await.unwrap();

        let wrong_shape = client
            .post("/otp/verify")
            .header(ContentType::JSON)
            .body("{\"subject\": \"alice@example.com\"}")
            .dispatch()
            .await;
        assert_eq!(Status::UnprocessableEntity, wrong_shape.status());
        let wrong_shape: Failure = wrong_shape.into_json().await.unwrap();

        assert_eq!(unparseable, wrong_shape);
        assert_eq!(unparseable, Failure::new(MALFORMED_BODY));
    }

    #[backend_test]
    async fn unknown_route_is_json_failure(client: Client) {
        let response = client.get("/otp/nothing-here").dispatch().await;

        assert_eq!(Status::NotFound, response.status());
        let failure: Failure = response.into_json().await.unwrap();
        assert_eq!(failure, Failure::new("Not Found"));
    }
}

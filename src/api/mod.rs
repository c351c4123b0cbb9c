use rocket::{Catcher, Route};

pub mod catchers;
pub mod otp;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(otp::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers::catchers()
}

pub mod daemons;
pub mod handlers;
pub mod middleware;
pub mod records;
pub mod reports;
pub mod repositories;
pub mod routes;
pub mod ws;

pub use routes::create_router;

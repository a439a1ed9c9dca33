pub mod files;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod stats;

pub use routes::create_router;

//! Google Smart Home fulfillment HTTP endpoint and outbound Home Graph
//! client.

pub mod debounce;
pub mod homegraph;
pub mod intent;
pub mod router;
pub mod routes;

pub use router::FulfillmentRouter;
pub use routes::{build_router, AppState};

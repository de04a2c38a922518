//! Query facade and its HTTP surface

pub mod facade;
pub mod http;

pub use facade::{QueryError, QueryFacade, StreamPage, StreamQuery};
pub use http::router;

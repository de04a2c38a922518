pub mod alerts;
pub mod connectors;
pub mod index;
pub mod pipeline;
pub mod providers;
pub mod query;
pub mod risk;
pub mod wallet;

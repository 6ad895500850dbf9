pub mod feed_client;
pub mod store;

pub mod client;
pub mod heartbeat;
pub mod http;
pub mod messages;
pub mod poller;
pub mod status;

pub mod negotiator;
pub mod orchestrator;
pub mod poller;
pub mod uploader;

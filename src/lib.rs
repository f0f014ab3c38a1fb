pub mod classify;
pub mod config;
pub mod errors;
pub mod fileserver;
pub mod logging;
pub mod ngrok;
pub mod poller;
pub mod process;
pub mod sendable;
pub mod sender;
pub mod tunnel;
pub mod twilio;

#[cfg(test)]
mod testutil;

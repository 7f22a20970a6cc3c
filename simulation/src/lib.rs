//! Thin attack-scenario roles: a server that distributes (possibly crafted)
//! model payloads, a user that computes honest local updates, and a report
//! that scores reconstructions against the ground truth.

pub mod error;
pub mod report;
pub mod server;
pub mod user;

pub use error::{Result, SimErr};
pub use report::{Metrics, ReportConfig, evaluate};
pub use server::Server;
pub use user::User;

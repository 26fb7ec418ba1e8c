//! Browser automation over the Chrome DevTools Protocol
//!
//! `session` acquires a browser (attached, launched or remote) and guarantees
//! cleanup; `page` drives a single tab; `actions` exposes page operations as
//! tools; `agent` lets a model use those tools to complete a task.

pub mod actions;
pub mod agent;
pub mod cdp;
pub mod page;
pub mod session;

pub use agent::{BrowserAgent, BrowserAgentSettings};
pub use session::{BrowserSession, BrowserSource, SessionTimeouts};

//! Status server: the launcher backend the proxy routes to before deployment

pub mod handlers;
pub mod serve;
pub mod state;

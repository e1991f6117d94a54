//! symmsync-atproto — the AT Protocol client surface: XRPC plumbing over
//! reqwest, session login/refresh policy, typed record builders, the graph
//! API the agents consume, and the outbound rate governor.

pub mod api;
pub mod governor;
pub mod records;
pub mod session;
pub mod xrpc;

pub use api::{AtpClient, BlocksPage, ListItemView, ListPage, ListView, ProfileViewBasic};
pub use governor::RateGovernor;
pub use session::{establish_session, plan_session, SessionPlan};
pub use xrpc::{SessionTokens, XrpcClient};

// SPDX-License-Identifier: MIT
//! Multi-chain JSON-RPC wallet router.
//!
//! The router sits between dApp clients and per-chain wallets. Every call
//! is authenticated against an origin-bound session, admitted by a
//! per-origin rate limiter, authorized against wildcard permission grants,
//! optionally held for an explicit user approval, and then forwarded to
//! the wallet proxy registered for its chain. Wallet events flow back out
//! through one broadcast stream.
//!
//! Start with [`Router::new`] and either attach the router to your own
//! [`rpc::engine::RpcEngine`] (embedded hosts) or hand it to
//! [`server::run`] for the WebSocket front end.

pub mod approval;
pub mod autoconnect;
pub mod config;
pub mod error;
pub mod events;
pub mod origin;
pub mod permissions;
pub mod rate_limit;
pub mod router;
pub mod rpc;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;
pub mod wallet;

pub use config::RouterConfig;
pub use error::RouterError;
pub use router::Router;

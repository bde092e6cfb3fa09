//! Per-request USDC payments for HTTP resources over the [x402 protocol](https://www.x402.org).
//!
//! A client asks for a resource and gets `402 Payment Required` with the accepted payment
//! terms. It signs an EIP-3009 `transferWithAuthorization` off-chain, retries with the signed
//! payment in the `X-PAYMENT` header, and the server verifies, records and settles the payment
//! before serving the resource.
//!
//! # Modules
//!
//! - [`types`], [`timestamp`], [`network`]: the wire data model and the static network table.
//! - [`codec`]: base64 JSON header encoding.
//! - [`crypto`]: EIP-712 hashing, signature recovery and the signing counterpart.
//! - [`engine`]: the [`PaymentEngine`](engine::PaymentEngine), which creates requirements,
//!   verifies payments, guards against replay and owns payment records.
//! - [`chain`]: routing settlement to the home chain or to `transferWithAuthorization` on any
//!   other EVM network.
//! - [`store`]: payment record persistence, in memory or in SQLite.
//! - [`policy`]: the pre-settlement policy check.
//! - [`gate`]: the axum middleware protecting a route.
//! - [`handlers`]: `/verify`, `/settle`, `/supported` and `/health`.
//! - [`config`], [`util`]: configuration, telemetry, shutdown and helpers.

pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod gate;
pub mod handlers;
pub mod network;
pub mod policy;
pub mod store;
pub mod timestamp;
pub mod types;
pub mod util;

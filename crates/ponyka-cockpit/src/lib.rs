//! `ponyka-cockpit` – HTTP command surface for the teleop dashboard.
//!
//! Boots a small HTTP/1.1 server (default port `3001`) in front of the
//! [`CommandMultiplexer`] and the one-shot task command client:
//!
//! | Route | Body | Effect |
//! |---|---|---|
//! | `POST /api/movement` | `{"speed": 0..100, "direction": "forward"}` | replace the velocity setpoint |
//! | `POST /api/command` | `{"command": "Start" \| "Stop" \| "E-STOP"}` | open or half-close the command stream |
//! | `POST /api/sendRobotCommand` | `{"cmd_mode", "arg", "arg_n", "arg_f"}` | unary `RobotCommand` to the task server |
//! | `GET /api/status` | – | command stream state and current setpoint |
//!
//! Every response carries permissive CORS headers; `OPTIONS` preflights get
//! `204 No Content`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ponyka_cockpit::CockpitServer;
//! use ponyka_middleware::{CommandMultiplexer, GrpcCommandConnector, GrpcTaskCommander};
//!
//! #[tokio::main]
//! async fn main() {
//!     let commands = CommandMultiplexer::new(
//!         Arc::new(GrpcCommandConnector::default()),
//!         "192.168.10.9:50056",
//!     );
//!     let tasks = Arc::new(GrpcTaskCommander::new("192.168.10.9:50052"));
//!     CockpitServer::new(commands, tasks)
//!         .run()
//!         .await
//!         .expect("command surface failed");
//! }
//! ```
//!
//! [`CommandMultiplexer`]: ponyka_middleware::CommandMultiplexer

pub mod server;

pub use server::{CockpitServer, CockpitState, DEFAULT_PORT};

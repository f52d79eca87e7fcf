//! Outbound delivery: circuit breaker, classifying client, Graph HTTP transport.

pub mod breaker;
pub mod client;
pub mod graph;

pub use breaker::{BreakerSettings, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use client::{DeliveryClient, DeliveryFailure, DeliveryReceipt, FailureKind, classify};
pub use graph::{GraphMessagingApi, GraphSettings};

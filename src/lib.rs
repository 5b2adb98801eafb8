//! Durable lifecycle orchestration for citizen benefit cards.
//!
//! A card moves `PENDING → ACTIVATED → REVOKED | EXPIRED`. Each transition
//! runs as a replayable orchestration ([`orchestrator::CardLifecycleOrchestrator`])
//! on the in-process [`runtime::Runtime`], which retries activities, classifies
//! their failures and compensates when a step fails for good.

pub mod activity;
pub mod app;
pub mod card;
pub mod cli;
pub mod config;
pub mod error;
pub mod expiration;
pub mod eyca;
pub mod notification;
pub mod orchestrator;
pub mod runtime;
pub mod state_machine;
pub mod sweep;
pub mod trigger;
pub mod ui;

//! Rampart — security incident detection and automated response.
//!
//! Rampart watches authentication traffic and request payloads for attack
//! signals, opens incidents for the ones that matter, and runs playbook-
//! driven remediation against them. State lives behind the [`store::Store`]
//! adapter so single-node deployments can run on the in-process
//! [`store::MemoryStore`] and clustered ones on a shared store.
//!
//! The pieces:
//!
//! - [`detect`]: stateless injection pattern classifiers and the
//!   store-backed sliding-window detector for brute force, distributed
//!   attacks, and credential stuffing.
//! - [`incident`]: the incident model, its forward-only status machine,
//!   and the ledger interface.
//! - [`escalation`]: the rule engine that routes reported content to
//!   review queues.
//! - [`response`]: playbooks, action handlers, and the remediation engine.
//! - [`quarantine`]: entity-level restriction of users, IPs, sessions, and
//!   resources.
//! - [`notify`]: store-backed notification channels.

pub mod config;
pub mod detect;
pub mod error;
pub mod escalation;
pub mod incident;
pub mod notify;
pub mod quarantine;
pub mod response;
pub mod store;
pub mod threat;

pub use config::RampartConfig;
pub use detect::{WindowDetector, detect_all_injections, scan_body};
pub use error::RampartError;
pub use escalation::{Escalation, EscalationContext, EscalationEngine, EscalationLevel};
pub use incident::{Incident, IncidentLedger, IncidentStatus, MemoryLedger};
pub use quarantine::{QuarantineService, QuarantineType};
pub use response::{PlaybookRegistry, RemediationEngine, RemediationResult, builtin_handlers};
pub use store::{MemoryStore, Store};
pub use threat::{Threat, ThreatLevel, ThreatType};

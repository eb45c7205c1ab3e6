//! Observability for the relay service.
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit safe fields.
//! Metric labels are bounded:
//! - `actor_type`: 2 values (relay, connection)
//! - `event`: bounded by the signaling event enum
//! - `kind`: bounded by `RelayError::kind`
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_connections_active` | Gauge | none | Open signaling sockets |
//! | `relay_meetings_active` | Gauge | none | Meetings in the registry |
//! | `relay_participants_active` | Gauge | none | Participants across meetings |
//! | `relay_messages_total` | Counter | `event` | Client messages handled |
//! | `relay_message_latency_seconds` | Histogram | `event` | Relay processing time |
//! | `relay_signaling_errors_total` | Counter | `kind` | Rejected client messages |
//! | `relay_health_probes_total` | Counter | none | Liveness probes sent |
//! | `relay_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `relay_messages_dropped_total` | Counter | `actor_type` | Deliveries dropped on full mailboxes |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;

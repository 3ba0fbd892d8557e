//! Webhook boundary: signature verification, payload decoding and event
//! classification. Nothing past [`WebhookRouter::route`] sees raw JSON.

mod events;
mod router;
mod signature;

pub use events::{
    DELIVERY_HEADER, EVENT_HEADER, IgnoreReason, IssueEvent, IssuePayload, LabelPayload,
    SIGNATURE_HEADER, WebhookEvent, WebhookPayload,
};
pub use router::{
    DEFAULT_TRIGGER_TOKEN, IGNORE_LABEL, URGENT_LABEL, WebhookHeaders, WebhookRouter,
};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};

//! Concrete delivery collaborators: the card template registry and the
//! Feishu webhook transports.

pub mod template;
pub mod webhook;

pub use template::{CardTemplate, TemplateRegistry};
pub use webhook::{BlockingWebhookTransport, TRANSPORT_NAME, WebhookTransport};

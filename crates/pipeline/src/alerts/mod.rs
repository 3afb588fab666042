//! Alert materialization and fan-out.

pub mod channels;
pub mod model;
pub mod repository;
pub mod service;

pub use channels::{validate_webhook_url, AlertMessage, EmailSender, WebhookSender};
pub use model::Alert;
pub use repository::AlertRepository;
pub use service::AlertDispatchService;

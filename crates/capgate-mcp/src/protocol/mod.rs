//! Protocol layer: negotiation, request handling, validation and error
//! classification.

pub mod error_mapper;
pub mod handler;
pub mod negotiation;
pub mod validator;

pub use error_mapper::ErrorMapper;
pub use handler::ProtocolHandler;
pub use negotiation::{negotiate, Negotiated};

//! Appointment booking core: calendar events double as vacancies, bookings
//! claim them, cancellations free them back up with adjacent-vacancy merge.
//!
//! Layering, bottom to top:
//! - [`model`]: entities, half-open time ranges, version stamps.
//! - [`store`]: repository and transaction contracts plus the in-memory
//!   reference store.
//! - [`command`]: generic add/update/delete/get executors with
//!   authorization and optimistic concurrency.
//! - [`booking`]: the domain workflows (open, claim, cancel, reopen).
//!
//! All I/O paths take a [`tokio_util::sync::CancellationToken`]; outbound
//! notifications go through the bounded queue in [`mailer`].

pub mod auth;
pub mod booking;
pub mod command;
pub mod config;
pub mod error;
pub mod mailer;
pub mod model;
pub mod observability;
pub mod store;

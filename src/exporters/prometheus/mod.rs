// SPDX-License-Identifier: Apache-2.0

//! Prometheus remote-write exporter for keyword alerts.

pub mod client;
pub mod config;
pub mod errors;
pub mod exporter;
pub mod labels;
pub mod proto;

pub use client::RemoteWriteClient;
pub use config::{Authentication, RemoteWriteConfig};
pub use errors::ExporterError;
pub use exporter::{BackgroundDispatcher, RemoteWriteExporter};
pub use labels::AlertLabels;

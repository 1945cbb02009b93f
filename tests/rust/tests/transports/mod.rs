//! Transport integration tests
//!
//! HTTP against a wiremock server, shell and gateway through scripted
//! sessions, all driven through pooled connectors.

mod gateway;
